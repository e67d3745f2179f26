use crate::error::{ErrorCategory, OrchestratorError, Result};
use crate::pipeline::StageOutput;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::AddAssign;

/// Pipeline stage, ordered by execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Clustering,
    Claims,
    SortAndDeduplicate,
    Summaries,
    Cruxes,
}

impl StageName {
    /// Fixed execution order. Also the progress denominator.
    pub const ALL: [StageName; 5] = [
        StageName::Clustering,
        StageName::Claims,
        StageName::SortAndDeduplicate,
        StageName::Summaries,
        StageName::Cruxes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Clustering => "clustering",
            StageName::Claims => "claims",
            StageName::SortAndDeduplicate => "sort_and_deduplicate",
            StageName::Summaries => "summaries",
            StageName::Cruxes => "cruxes",
        }
    }

    /// Only cruxes can be switched off per run
    pub fn is_optional(&self) -> bool {
        matches!(self, StageName::Cruxes)
    }
}

impl std::str::FromStr for StageName {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "clustering" => Ok(StageName::Clustering),
            "claims" => Ok(StageName::Claims),
            "sort_and_deduplicate" => Ok(StageName::SortAndDeduplicate),
            "summaries" => Ok(StageName::Summaries),
            "cruxes" => Ok(StageName::Cruxes),
            _ => Err(OrchestratorError::InvalidState(format!(
                "Invalid stage name: {}",
                s
            ))),
        }
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl PipelineStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStatus::Completed | PipelineStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
            StageStatus::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Token counts reported by a model call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.input_tokens += rhs.input_tokens;
        self.output_tokens += rhs.output_tokens;
        self.total_tokens += rhs.total_tokens;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageAnalytics {
    pub status: StageStatus,
    pub duration_ms: u64,
    pub usage: TokenUsage,
    pub cost: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageAnalytics {
    pub fn pending() -> Self {
        Self {
            status: StageStatus::Pending,
            duration_ms: 0,
            usage: TokenUsage::default(),
            cost: 0.0,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }
}

/// Which stage failed and why
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineFailure {
    pub step: StageName,
    pub message: String,
    pub category: ErrorCategory,
}

/// Persisted record of one report's pipeline, keyed by `report_id`.
///
/// `completed_results[stage]` exists iff `step_analytics[stage].status` is
/// `completed`. The transition methods below are the only writers and keep
/// that true; [`PipelineState::repair`] restores it on records written by
/// something else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineState {
    pub report_id: String,
    pub user_id: String,
    pub status: PipelineStatus,
    pub step_analytics: BTreeMap<StageName, StageAnalytics>,
    pub completed_results: BTreeMap<StageName, StageOutput>,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub total_duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<PipelineFailure>,
    /// Number of `run` invocations that started on this record
    #[serde(default)]
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineState {
    pub fn new(report_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            report_id: report_id.into(),
            user_id: user_id.into(),
            status: PipelineStatus::Pending,
            step_analytics: StageName::ALL
                .iter()
                .map(|stage| (*stage, StageAnalytics::pending()))
                .collect(),
            completed_results: BTreeMap::new(),
            total_tokens: 0,
            total_cost: 0.0,
            total_duration_ms: 0,
            error: None,
            attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn stage_status(&self, stage: StageName) -> StageStatus {
        self.step_analytics
            .get(&stage)
            .map(|a| a.status)
            .unwrap_or(StageStatus::Pending)
    }

    pub fn is_stage_completed(&self, stage: StageName) -> bool {
        self.stage_status(stage) == StageStatus::Completed
            && self.completed_results.contains_key(&stage)
    }

    /// Stages that count toward progress (completed or skipped)
    pub fn settled_stage_count(&self) -> usize {
        StageName::ALL
            .iter()
            .filter(|stage| {
                matches!(
                    self.stage_status(**stage),
                    StageStatus::Completed | StageStatus::Skipped
                )
            })
            .count()
    }

    /// Settled stages up to and including `stage`, plus skipped stages
    /// anywhere. Progress counts this so reused stages report in order.
    pub fn settled_through(&self, stage: StageName) -> usize {
        StageName::ALL
            .iter()
            .filter(|s| match self.stage_status(**s) {
                StageStatus::Skipped => true,
                StageStatus::Completed => **s <= stage,
                _ => false,
            })
            .count()
    }

    /// Transition: any → RUNNING at the start of a run attempt.
    ///
    /// Completed stages are kept; running, failed and skipped stages go back
    /// to pending so the attempt re-plans them.
    pub fn start_attempt(&mut self) {
        for analytics in self.step_analytics.values_mut() {
            if analytics.status != StageStatus::Completed {
                *analytics = StageAnalytics::pending();
            }
        }
        for stage in StageName::ALL {
            self.step_analytics
                .entry(stage)
                .or_insert_with(StageAnalytics::pending);
        }
        self.status = PipelineStatus::Running;
        self.error = None;
        self.attempts += 1;
        self.touch();
    }

    /// Transition: PENDING → RUNNING for one stage
    pub fn begin_stage(&mut self, stage: StageName) -> Result<()> {
        let analytics = self.analytics_in(stage, StageStatus::Pending, StageStatus::Running)?;
        analytics.status = StageStatus::Running;
        analytics.started_at = Some(Utc::now());
        self.completed_results.remove(&stage);
        self.touch();
        Ok(())
    }

    /// Transition: RUNNING → COMPLETED, storing the stage output
    pub fn complete_stage(
        &mut self,
        stage: StageName,
        output: StageOutput,
        usage: TokenUsage,
        cost: f64,
        duration_ms: u64,
    ) -> Result<()> {
        if output.stage() != stage {
            return Err(OrchestratorError::InvalidState(format!(
                "Output for {} recorded under stage {}",
                output.stage(),
                stage
            )));
        }
        let analytics = self.analytics_in(stage, StageStatus::Running, StageStatus::Completed)?;
        analytics.status = StageStatus::Completed;
        analytics.duration_ms = duration_ms;
        analytics.usage = usage;
        analytics.cost = cost;
        analytics.finished_at = Some(Utc::now());
        analytics.error = None;
        self.completed_results.insert(stage, output);
        self.touch();
        Ok(())
    }

    /// Transition: RUNNING → FAILED for one stage; records `state.error`
    pub fn fail_stage(
        &mut self,
        stage: StageName,
        message: String,
        category: ErrorCategory,
        duration_ms: u64,
    ) -> Result<()> {
        let analytics = self.analytics_in(stage, StageStatus::Running, StageStatus::Failed)?;
        analytics.status = StageStatus::Failed;
        analytics.duration_ms = duration_ms;
        analytics.finished_at = Some(Utc::now());
        analytics.error = Some(message.clone());
        self.error = Some(PipelineFailure {
            step: stage,
            message,
            category,
        });
        self.touch();
        Ok(())
    }

    /// Transition: PENDING → SKIPPED
    pub fn skip_stage(&mut self, stage: StageName) -> Result<()> {
        let analytics = self.analytics_in(stage, StageStatus::Pending, StageStatus::Skipped)?;
        analytics.status = StageStatus::Skipped;
        self.completed_results.remove(&stage);
        self.touch();
        Ok(())
    }

    /// Record a failure that happened between stages (cancellation).
    /// The stage itself stays pending.
    pub fn interrupt(&mut self, stage: StageName, message: String, category: ErrorCategory) {
        self.error = Some(PipelineFailure {
            step: stage,
            message,
            category,
        });
        self.touch();
    }

    /// Transition: RUNNING → COMPLETED | FAILED. Aggregates totals over
    /// completed stages; skipped and pending stages contribute nothing.
    pub fn finish(&mut self, status: PipelineStatus, total_duration_ms: u64) -> Result<()> {
        if self.status != PipelineStatus::Running || !status.is_terminal() {
            return Err(OrchestratorError::InvalidStateTransition {
                stage: self
                    .error
                    .as_ref()
                    .map(|e| e.step)
                    .unwrap_or(StageName::Clustering),
                from: format!("{:?}", self.status).to_lowercase(),
                to: format!("{:?}", status).to_lowercase(),
            });
        }

        let (tokens, cost) = self
            .step_analytics
            .values()
            .filter(|a| a.status == StageStatus::Completed)
            .fold((0u64, 0.0f64), |(tokens, cost), a| {
                (tokens + a.usage.total_tokens, cost + a.cost)
            });
        self.total_tokens = tokens;
        self.total_cost = cost;
        self.total_duration_ms = total_duration_ms;
        self.status = status;
        self.touch();
        Ok(())
    }

    /// Restore the analytics/results invariant on a loaded record.
    /// Returns the stages that were demoted to pending.
    pub fn repair(&mut self) -> Vec<StageName> {
        let mut demoted = Vec::new();
        for stage in StageName::ALL {
            let analytics = self
                .step_analytics
                .entry(stage)
                .or_insert_with(StageAnalytics::pending);
            let has_result = self.completed_results.contains_key(&stage);
            let is_completed = analytics.status == StageStatus::Completed;

            if is_completed != has_result {
                *analytics = StageAnalytics::pending();
                self.completed_results.remove(&stage);
                demoted.push(stage);
            }
        }
        // Results stored under the wrong key cannot be trusted either
        let mismatched: Vec<StageName> = self
            .completed_results
            .iter()
            .filter(|(stage, output)| output.stage() != **stage)
            .map(|(stage, _)| *stage)
            .collect();
        for stage in mismatched {
            self.completed_results.remove(&stage);
            self.step_analytics.insert(stage, StageAnalytics::pending());
            demoted.push(stage);
        }

        // Later outputs were built on the demoted ones
        if let Some(&earliest) = demoted.iter().min() {
            for stage in StageName::ALL.into_iter().filter(|s| *s > earliest) {
                if self.completed_results.remove(&stage).is_some() {
                    self.step_analytics.insert(stage, StageAnalytics::pending());
                    demoted.push(stage);
                }
            }
        }
        demoted.sort();
        demoted.dedup();
        demoted
    }

    /// True when the analytics/results invariant holds for every stage
    pub fn is_consistent(&self) -> bool {
        StageName::ALL.iter().all(|stage| {
            (self.stage_status(*stage) == StageStatus::Completed)
                == self.completed_results.contains_key(stage)
        })
    }

    fn analytics_in(
        &mut self,
        stage: StageName,
        expected: StageStatus,
        to: StageStatus,
    ) -> Result<&mut StageAnalytics> {
        let analytics = self
            .step_analytics
            .entry(stage)
            .or_insert_with(StageAnalytics::pending);
        if analytics.status != expected {
            return Err(OrchestratorError::InvalidStateTransition {
                stage,
                from: analytics.status.to_string(),
                to: to.to_string(),
            });
        }
        Ok(analytics)
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TopicSummary;
    use crate::taxonomy::Taxonomy;

    fn clustering_output() -> StageOutput {
        StageOutput::Clustering(Taxonomy::default())
    }

    #[test]
    fn test_stage_name_roundtrip() {
        for stage in StageName::ALL {
            let parsed: StageName = stage.as_str().parse().unwrap();
            assert_eq!(stage, parsed);
        }
        assert!("l1_ir".parse::<StageName>().is_err());
    }

    #[test]
    fn test_stage_order_matches_pipeline_order() {
        let mut sorted = StageName::ALL.to_vec();
        sorted.reverse();
        sorted.sort();
        assert_eq!(sorted, StageName::ALL.to_vec());
    }

    #[test]
    fn test_new_state_has_all_stages_pending() {
        let state = PipelineState::new("r1", "u1");

        assert_eq!(state.status, PipelineStatus::Pending);
        assert_eq!(state.step_analytics.len(), 5);
        assert!(state
            .step_analytics
            .values()
            .all(|a| a.status == StageStatus::Pending));
        assert!(state.is_consistent());
    }

    #[test]
    fn test_stage_transition_pending_to_completed() {
        let mut state = PipelineState::new("r1", "u1");
        state.start_attempt();

        state.begin_stage(StageName::Clustering).unwrap();
        assert_eq!(state.stage_status(StageName::Clustering), StageStatus::Running);

        state
            .complete_stage(
                StageName::Clustering,
                clustering_output(),
                TokenUsage::new(100, 50),
                0.01,
                42,
            )
            .unwrap();

        assert!(state.is_stage_completed(StageName::Clustering));
        assert_eq!(state.step_analytics[&StageName::Clustering].duration_ms, 42);
        assert!(state.is_consistent());
    }

    #[test]
    fn test_complete_without_begin_is_rejected() {
        let mut state = PipelineState::new("r1", "u1");
        state.start_attempt();

        let err = state
            .complete_stage(
                StageName::Clustering,
                clustering_output(),
                TokenUsage::default(),
                0.0,
                0,
            )
            .unwrap_err();

        assert!(matches!(
            err,
            OrchestratorError::InvalidStateTransition { stage: StageName::Clustering, .. }
        ));
        assert!(state.completed_results.is_empty());
    }

    #[test]
    fn test_output_under_wrong_stage_is_rejected() {
        let mut state = PipelineState::new("r1", "u1");
        state.start_attempt();
        state.begin_stage(StageName::Summaries).unwrap();

        let result = state.complete_stage(
            StageName::Summaries,
            clustering_output(),
            TokenUsage::default(),
            0.0,
            0,
        );

        assert!(result.is_err());
        assert!(state.completed_results.is_empty());
    }

    #[test]
    fn test_fail_stage_records_error() {
        let mut state = PipelineState::new("r1", "u1");
        state.start_attempt();
        state.begin_stage(StageName::Claims).unwrap();

        state
            .fail_stage(
                StageName::Claims,
                "model exploded".to_string(),
                ErrorCategory::Transient,
                7,
            )
            .unwrap();
        state.finish(PipelineStatus::Failed, 10).unwrap();

        let failure = state.error.as_ref().unwrap();
        assert_eq!(failure.step, StageName::Claims);
        assert_eq!(failure.message, "model exploded");
        assert_eq!(state.stage_status(StageName::Claims), StageStatus::Failed);
        assert_eq!(state.status, PipelineStatus::Failed);
        assert!(state.is_consistent());
    }

    #[test]
    fn test_start_attempt_keeps_completed_and_resets_others() {
        let mut state = PipelineState::new("r1", "u1");
        state.start_attempt();
        state.begin_stage(StageName::Clustering).unwrap();
        state
            .complete_stage(
                StageName::Clustering,
                clustering_output(),
                TokenUsage::default(),
                0.0,
                1,
            )
            .unwrap();
        state.begin_stage(StageName::Claims).unwrap();
        state
            .fail_stage(StageName::Claims, "x".into(), ErrorCategory::Permanent, 1)
            .unwrap();
        state.finish(PipelineStatus::Failed, 2).unwrap();

        state.start_attempt();

        assert_eq!(state.attempts, 2);
        assert_eq!(state.status, PipelineStatus::Running);
        assert!(state.error.is_none());
        assert!(state.is_stage_completed(StageName::Clustering));
        assert_eq!(state.stage_status(StageName::Claims), StageStatus::Pending);
    }

    #[test]
    fn test_finish_aggregates_only_completed_stages() {
        let mut state = PipelineState::new("r1", "u1");
        state.start_attempt();

        state.begin_stage(StageName::Clustering).unwrap();
        state
            .complete_stage(
                StageName::Clustering,
                clustering_output(),
                TokenUsage::new(10, 5),
                0.25,
                1,
            )
            .unwrap();
        state.begin_stage(StageName::Summaries).unwrap();
        state
            .complete_stage(
                StageName::Summaries,
                StageOutput::Summaries(vec![TopicSummary {
                    topic_name: "t".into(),
                    summary: "s".into(),
                }]),
                TokenUsage::new(1, 1),
                0.5,
                1,
            )
            .unwrap();
        state.skip_stage(StageName::Cruxes).unwrap();

        state.finish(PipelineStatus::Completed, 99).unwrap();

        assert_eq!(state.total_tokens, 17);
        assert!((state.total_cost - 0.75).abs() < 1e-12);
        assert_eq!(state.total_duration_ms, 99);
    }

    #[test]
    fn test_finish_requires_running() {
        let mut state = PipelineState::new("r1", "u1");
        assert!(state.finish(PipelineStatus::Completed, 0).is_err());

        state.start_attempt();
        assert!(state.finish(PipelineStatus::Running, 0).is_err());
    }

    #[test]
    fn test_repair_demotes_inconsistent_stages() {
        let mut state = PipelineState::new("r1", "u1");
        // Completed without a result
        state
            .step_analytics
            .get_mut(&StageName::Clustering)
            .unwrap()
            .status = StageStatus::Completed;
        // Result without completion
        state
            .completed_results
            .insert(StageName::Summaries, StageOutput::Summaries(vec![]));
        // Result stored under the wrong key
        state
            .step_analytics
            .get_mut(&StageName::Claims)
            .unwrap()
            .status = StageStatus::Completed;
        state
            .completed_results
            .insert(StageName::Claims, clustering_output());

        let demoted = state.repair();

        assert!(demoted.contains(&StageName::Clustering));
        assert!(demoted.contains(&StageName::Summaries));
        assert!(demoted.contains(&StageName::Claims));
        assert!(state.is_consistent());
        assert!(state.completed_results.is_empty());
    }

    #[test]
    fn test_repair_demotes_downstream_stages() {
        let mut state = PipelineState::new("r1", "u1");
        for (stage, output) in [
            (StageName::Clustering, clustering_output()),
            (StageName::Summaries, StageOutput::Summaries(vec![])),
        ] {
            state.step_analytics.get_mut(&stage).unwrap().status = StageStatus::Completed;
            state.completed_results.insert(stage, output);
        }
        // Claims marked completed but its output is gone
        state
            .step_analytics
            .get_mut(&StageName::Claims)
            .unwrap()
            .status = StageStatus::Completed;

        let demoted = state.repair();

        assert_eq!(demoted, vec![StageName::Claims, StageName::Summaries]);
        assert!(state.is_stage_completed(StageName::Clustering));
        assert!(state.is_consistent());
    }

    #[test]
    fn test_settled_stage_count_counts_skipped() {
        let mut state = PipelineState::new("r1", "u1");
        state.start_attempt();
        state.skip_stage(StageName::Cruxes).unwrap();

        assert_eq!(state.settled_stage_count(), 1);
    }

    #[test]
    fn test_settled_through_ignores_later_completed_stages() {
        let mut state = PipelineState::new("r1", "u1");
        state.start_attempt();
        let outputs = [
            (StageName::Clustering, clustering_output()),
            (StageName::Claims, StageOutput::Claims(Default::default())),
        ];
        for (stage, output) in outputs {
            state.begin_stage(stage).unwrap();
            state
                .complete_stage(stage, output, TokenUsage::default(), 0.0, 1)
                .unwrap();
        }
        state.skip_stage(StageName::Cruxes).unwrap();

        assert_eq!(state.settled_through(StageName::Clustering), 2);
        assert_eq!(state.settled_through(StageName::Claims), 3);
        assert_eq!(state.settled_stage_count(), 3);
    }

    #[test]
    fn test_state_json_roundtrip_preserves_cost_bits() {
        let mut state = PipelineState::new("r1", "u1");
        state.start_attempt();
        state.begin_stage(StageName::Clustering).unwrap();
        state
            .complete_stage(
                StageName::Clustering,
                clustering_output(),
                TokenUsage::new(3, 4),
                0.1 + 0.2,
                5,
            )
            .unwrap();
        state.finish(PipelineStatus::Completed, 5).unwrap();

        let bytes = serde_json::to_vec(&state).unwrap();
        let decoded: PipelineState = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(decoded, state);
        assert_eq!(decoded.total_cost.to_bits(), state.total_cost.to_bits());
    }
}
