//! Shared fixtures for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use claimtree_orchestration::{
    ApiKey, Claim, ClaimsTree, Comment, Crux, CruxReport, OrchestrationConfig, PipelineInput,
    PipelineRunner, PipelineStateStore, SortStrategy, SortedTree, StageConfig, StageError,
    StageHandler, StageInput, StageName, StageOutput, StageSuccess, Subtopic, Taxonomy,
    TokenUsage, Topic, TopicSummary,
};
use claimtree_storage::{InMemoryStore, KeyValueStore, StorageError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub fn stage_config(name: &str) -> StageConfig {
    StageConfig {
        model_name: "test-model".to_string(),
        system_prompt: format!("You run the {} step", name),
        user_prompt_template: "{comments}".to_string(),
    }
}

pub fn input(comments: Vec<Comment>, enable_cruxes: bool) -> PipelineInput {
    PipelineInput {
        comments,
        clustering: stage_config("clustering"),
        claims: stage_config("claims"),
        dedup: stage_config("dedup"),
        summaries: stage_config("summaries"),
        cruxes: enable_cruxes.then(|| stage_config("cruxes")),
        enable_cruxes,
        sort_strategy: SortStrategy::NumPeople,
        api_key: ApiKey::new("sk-test"),
    }
}

pub fn comments() -> Vec<Comment> {
    vec![
        Comment::new("c1", "We need more buses at night").with_speaker("alice"),
        Comment::new("c2", "More buses please, and cheaper fares").with_speaker("bob"),
        Comment::new("c3", "Trains are always late").with_speaker("alice"),
    ]
}

/// Taxonomy every scripted clustering stage returns
pub fn transit_taxonomy() -> Taxonomy {
    Taxonomy::new(vec![Topic::new(
        "Transit",
        vec![Subtopic::new("Buses"), Subtopic::new("Trains")],
    )])
}

/// Stage handler with a fixed cost that derives its output from prior
/// outputs, so resumed runs can be compared byte for byte
pub struct ScriptedStage {
    stage: StageName,
    cost: f64,
    calls: AtomicUsize,
    failures_left: AtomicUsize,
}

impl ScriptedStage {
    pub fn new(stage: StageName, cost: f64) -> Arc<Self> {
        Self::failing(stage, cost, 0)
    }

    pub fn failing(stage: StageName, cost: f64, times: usize) -> Arc<Self> {
        Arc::new(Self {
            stage,
            cost,
            calls: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(times),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn output(&self, input: &StageInput<'_>) -> Result<StageOutput, StageError> {
        Ok(match self.stage {
            StageName::Clustering => StageOutput::Clustering(transit_taxonomy()),
            StageName::Claims => {
                let mut taxonomy = input.prior.taxonomy()?.clone();
                for (i, comment) in input.comments.iter().enumerate() {
                    let subtopic = &mut taxonomy.topics[0].subtopics[i % 2];
                    subtopic.claims.push(
                        Claim::new(
                            Claim::id_for(&comment.id, 0),
                            format!("Claim from {}", comment.id),
                            comment.text.clone(),
                            comment.id.clone(),
                        )
                        .in_subtopic("Transit", subtopic.subtopic_name.clone()),
                    );
                }
                StageOutput::Claims(ClaimsTree {
                    taxonomy,
                    ..Default::default()
                })
            }
            StageName::SortAndDeduplicate => StageOutput::SortAndDeduplicate(SortedTree {
                taxonomy: input.prior.claims_tree()?.taxonomy.clone(),
                ..Default::default()
            }),
            StageName::Summaries => StageOutput::Summaries(
                input
                    .prior
                    .sorted_tree()?
                    .taxonomy
                    .topics
                    .iter()
                    .map(|t| TopicSummary {
                        topic_name: t.topic_name.clone(),
                        summary: format!("{} claims", t.subtopics.len()),
                    })
                    .collect(),
            ),
            StageName::Cruxes => StageOutput::Cruxes(CruxReport {
                cruxes: vec![Crux {
                    topic_name: "Transit".to_string(),
                    subtopic_name: "Buses".to_string(),
                    crux_claim: "Night buses are worth the cost".to_string(),
                    agree: vec!["alice".to_string()],
                    disagree: vec!["bob".to_string()],
                    explanation: String::new(),
                }],
            }),
        })
    }
}

#[async_trait]
impl StageHandler for ScriptedStage {
    fn stage(&self) -> StageName {
        self.stage
    }

    async fn execute(&self, input: StageInput<'_>) -> Result<StageSuccess, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(StageError::RateLimited(format!(
                "{} hit the provider limit",
                self.stage
            )));
        }
        Ok(StageSuccess {
            output: self.output(&input)?,
            usage: TokenUsage::new(100, 25),
            cost: self.cost,
        })
    }
}

/// One scripted handler per stage, with the given costs in stage order
pub fn scripted(costs: [f64; 5]) -> Vec<Arc<ScriptedStage>> {
    StageName::ALL
        .into_iter()
        .zip(costs)
        .map(|(stage, cost)| ScriptedStage::new(stage, cost))
        .collect()
}

pub fn runner(store: Arc<dyn KeyValueStore>, handlers: &[Arc<ScriptedStage>]) -> PipelineRunner {
    let config = OrchestrationConfig::default();
    let mut runner =
        PipelineRunner::new(PipelineStateStore::from_config(store, &config), &config).unwrap();
    for handler in handlers {
        runner.register_handler(handler.clone());
    }
    runner
}

/// Key-value store that starts failing writes after `healthy_writes` saves
pub struct FlakyStore {
    inner: InMemoryStore,
    healthy_writes: AtomicUsize,
}

impl FlakyStore {
    pub fn new(healthy_writes: usize) -> Self {
        Self {
            inner: InMemoryStore::new(),
            healthy_writes: AtomicUsize::new(healthy_writes),
        }
    }
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn get(&self, key: &str) -> claimtree_storage::Result<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> claimtree_storage::Result<()> {
        let healthy = self
            .healthy_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !healthy {
            return Err(StorageError::unavailable("connection refused"));
        }
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> claimtree_storage::Result<bool> {
        self.inner.delete(key).await
    }
}
