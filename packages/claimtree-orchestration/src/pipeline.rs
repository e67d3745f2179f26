use crate::error::ErrorCategory;
use crate::job::{StageName, TokenUsage};
use crate::model::{ApiKey, Comment, CruxReport, SortStrategy, StageConfig, TopicSummary};
use crate::taxonomy::{ClaimsTree, SortedTree, Taxonomy};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Typed output of each stage, persisted in `completedResults`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "data", rename_all = "snake_case")]
pub enum StageOutput {
    Clustering(Taxonomy),
    Claims(ClaimsTree),
    SortAndDeduplicate(SortedTree),
    Summaries(Vec<TopicSummary>),
    Cruxes(CruxReport),
}

impl StageOutput {
    pub fn stage(&self) -> StageName {
        match self {
            StageOutput::Clustering(_) => StageName::Clustering,
            StageOutput::Claims(_) => StageName::Claims,
            StageOutput::SortAndDeduplicate(_) => StageName::SortAndDeduplicate,
            StageOutput::Summaries(_) => StageName::Summaries,
            StageOutput::Cruxes(_) => StageName::Cruxes,
        }
    }
}

/// Stage failure. Returned as a value; ends the run with `success = false`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StageError {
    #[error("Model call failed: {0}")]
    Model(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Invalid stage output: {0}")]
    InvalidOutput(String),

    #[error("Missing output from prior stage {0}")]
    MissingInput(StageName),

    #[error("Stage timed out after {0}ms")]
    Timeout(u64),

    #[error("All {0} comments failed claim extraction")]
    AllCommentsFailed(usize),

    #[error("Run cancelled")]
    Cancelled,
}

impl StageError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            StageError::Model(_) => ErrorCategory::Infrastructure,
            StageError::RateLimited(_)
            | StageError::Timeout(_)
            | StageError::Cancelled
            | StageError::AllCommentsFailed(_) => ErrorCategory::Transient,
            StageError::InvalidOutput(_) | StageError::MissingInput(_) => ErrorCategory::Permanent,
        }
    }
}

/// What a stage function hands back on success
#[derive(Debug, Clone, PartialEq)]
pub struct StageSuccess {
    pub output: StageOutput,
    pub usage: TokenUsage,
    pub cost: f64,
}

/// `{data, usage, cost}` from a single model call inside a stage
#[derive(Debug, Clone, PartialEq)]
pub struct ModelResponse<T> {
    pub data: T,
    pub usage: TokenUsage,
    pub cost: f64,
}

/// Read-only view over the outputs of stages that already completed
#[derive(Debug, Clone, Copy)]
pub struct CompletedResults<'a> {
    results: &'a BTreeMap<StageName, StageOutput>,
}

impl<'a> CompletedResults<'a> {
    pub fn new(results: &'a BTreeMap<StageName, StageOutput>) -> Self {
        Self { results }
    }

    pub fn get(&self, stage: StageName) -> Option<&'a StageOutput> {
        self.results.get(&stage)
    }

    pub fn taxonomy(&self) -> Result<&'a Taxonomy, StageError> {
        match self.get(StageName::Clustering) {
            Some(StageOutput::Clustering(taxonomy)) => Ok(taxonomy),
            _ => Err(StageError::MissingInput(StageName::Clustering)),
        }
    }

    pub fn claims_tree(&self) -> Result<&'a ClaimsTree, StageError> {
        match self.get(StageName::Claims) {
            Some(StageOutput::Claims(tree)) => Ok(tree),
            _ => Err(StageError::MissingInput(StageName::Claims)),
        }
    }

    pub fn sorted_tree(&self) -> Result<&'a SortedTree, StageError> {
        match self.get(StageName::SortAndDeduplicate) {
            Some(StageOutput::SortAndDeduplicate(tree)) => Ok(tree),
            _ => Err(StageError::MissingInput(StageName::SortAndDeduplicate)),
        }
    }

    pub fn summaries(&self) -> Result<&'a [TopicSummary], StageError> {
        match self.get(StageName::Summaries) {
            Some(StageOutput::Summaries(summaries)) => Ok(summaries.as_slice()),
            _ => Err(StageError::MissingInput(StageName::Summaries)),
        }
    }

    pub fn cruxes(&self) -> Result<&'a CruxReport, StageError> {
        match self.get(StageName::Cruxes) {
            Some(StageOutput::Cruxes(report)) => Ok(report),
            _ => Err(StageError::MissingInput(StageName::Cruxes)),
        }
    }
}

/// Stage input
pub struct StageInput<'a> {
    pub report_id: &'a str,
    pub comments: &'a [Comment],
    /// Outputs of every stage completed so far
    pub prior: CompletedResults<'a>,
    pub config: &'a StageConfig,
    pub sort_strategy: SortStrategy,
    pub api_key: &'a ApiKey,
    /// Cancelled when the caller stops the run or the run lock is lost
    pub cancel: &'a CancellationToken,
}

/// Stage handler trait (pluggable stages)
#[async_trait]
pub trait StageHandler: Send + Sync {
    /// Stage this handler implements
    fn stage(&self) -> StageName;

    /// Execute stage
    async fn execute(&self, input: StageInput<'_>) -> Result<StageSuccess, StageError>;
}
