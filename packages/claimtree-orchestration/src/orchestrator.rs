use crate::checkpoint::PipelineStateStore;
use crate::config::OrchestrationConfig;
use crate::error::{ErrorCategory, OrchestratorError, Result};
use crate::job::{PipelineState, PipelineStatus, StageName};
#[cfg(feature = "metrics")]
use crate::metrics::PipelineMetrics;
use crate::model::{Comment, CruxReport, PipelineInput, SortStrategy, TopicSummary};
use crate::pipeline::{CompletedResults, StageError, StageHandler, StageInput, StageSuccess};
use crate::progress::{percent, ProgressReporter, ProgressUpdate};
use crate::taxonomy::{presentation_order, SortedTree, TopicView};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

/// Per-run settings
#[derive(Clone)]
pub struct PipelineRunnerConfig {
    /// Unique job key
    pub report_id: String,
    pub user_id: String,
    /// Load saved state and reuse completed stages
    pub resume_from_state: bool,
    pub on_progress: Option<Arc<dyn ProgressReporter>>,
    /// Checked before each stage; stages may also watch it
    pub cancellation: Option<CancellationToken>,
}

impl PipelineRunnerConfig {
    pub fn new(report_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            report_id: report_id.into(),
            user_id: user_id.into(),
            resume_from_state: false,
            on_progress: None,
            cancellation: None,
        }
    }

    pub fn resume(mut self, resume_from_state: bool) -> Self {
        self.resume_from_state = resume_from_state;
        self
    }

    pub fn with_progress(mut self, reporter: impl ProgressReporter + 'static) -> Self {
        self.on_progress = Some(Arc::new(reporter));
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

impl std::fmt::Debug for PipelineRunnerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRunnerConfig")
            .field("report_id", &self.report_id)
            .field("user_id", &self.user_id)
            .field("resume_from_state", &self.resume_from_state)
            .field("on_progress", &self.on_progress.is_some())
            .field("cancellation", &self.cancellation)
            .finish()
    }
}

/// What a successful run hands to report assembly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineOutputs {
    pub topic_tree: SortedTree,
    pub summaries: Vec<TopicSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cruxes: Option<CruxReport>,
}

impl PipelineOutputs {
    pub fn from_state(state: &PipelineState, include_cruxes: bool) -> Result<Self> {
        let prior = CompletedResults::new(&state.completed_results);
        let missing = |e: StageError| OrchestratorError::InvalidState(e.to_string());

        Ok(Self {
            topic_tree: prior.sorted_tree().map_err(missing)?.clone(),
            summaries: prior.summaries().map_err(missing)?.to_vec(),
            cruxes: if include_cruxes {
                Some(prior.cruxes().map_err(missing)?.clone())
            } else {
                None
            },
        })
    }

    /// Topics and subtopics in display order
    pub fn display_order<'a>(
        &'a self,
        strategy: SortStrategy,
        comments: &[Comment],
    ) -> Vec<TopicView<'a>> {
        presentation_order(&self.topic_tree.taxonomy, strategy, comments)
    }
}

/// Result of one `run` call
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub success: bool,
    pub state: PipelineState,
    /// Present only when `success`
    pub outputs: Option<PipelineOutputs>,
}

/// Sequences the stages of one report, persisting state after each
pub struct PipelineRunner {
    state_store: PipelineStateStore,
    stage_handlers: HashMap<StageName, Arc<dyn StageHandler>>,
    stage_timeout: Duration,
    #[cfg(feature = "metrics")]
    metrics: Option<Arc<PipelineMetrics>>,
}

impl PipelineRunner {
    /// Fails with [`OrchestratorError::Config`] when `config` is out of range
    pub fn new(state_store: PipelineStateStore, config: &OrchestrationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            state_store,
            stage_handlers: HashMap::new(),
            stage_timeout: config.stage_timeout(),
            #[cfg(feature = "metrics")]
            metrics: None,
        })
    }

    /// Register a stage handler, replacing any previous one for that stage
    pub fn register_handler(&mut self, handler: Arc<dyn StageHandler>) {
        self.stage_handlers.insert(handler.stage(), handler);
    }

    pub fn with_handler(mut self, handler: Arc<dyn StageHandler>) -> Self {
        self.register_handler(handler);
        self
    }

    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn state_store(&self) -> &PipelineStateStore {
        &self.state_store
    }

    /// Run (or resume) the pipeline for `config.report_id`.
    ///
    /// `Ok` with `success = false` when a stage fails or the run is
    /// cancelled; state is persisted and resumable. `Err` only when the run
    /// cannot proceed at all (store unavailable, missing handler, bad input).
    pub async fn run(
        &self,
        input: &PipelineInput,
        config: &PipelineRunnerConfig,
    ) -> Result<RunOutcome> {
        let span = info_span!(
            "pipeline_run",
            report_id = %config.report_id,
            user_id = %config.user_id
        );
        self.run_inner(input, config).instrument(span).await
    }

    async fn run_inner(
        &self,
        input: &PipelineInput,
        config: &PipelineRunnerConfig,
    ) -> Result<RunOutcome> {
        input.validate()?;
        let required = input.required_stages();
        if let Some(stage) = required
            .iter()
            .find(|stage| !self.stage_handlers.contains_key(*stage))
        {
            return Err(OrchestratorError::MissingHandler(*stage));
        }

        let report_id = config.report_id.as_str();
        let run_start = Instant::now();
        let cancel = config.cancellation.clone().unwrap_or_default();

        let mut state = self.load_or_init(config).await?;
        state.start_attempt();
        for stage in StageName::ALL {
            if !input.is_required(stage) && !state.is_stage_completed(stage) {
                state.skip_stage(stage)?;
                self.record_stage(stage, &state);
            }
        }
        // Nothing runs unless the store takes writes
        self.state_store.save(report_id, &state).await?;

        info!(
            "Report {}: attempt {} started ({} stages)",
            report_id,
            state.attempts,
            required.len()
        );

        for stage in required {
            if state.is_stage_completed(stage) {
                info!("Report {}: stage {} reused from saved state", report_id, stage);
                report_progress(config, stage, &state);
                continue;
            }

            if cancel.is_cancelled() {
                warn!("Report {}: cancelled before stage {}", report_id, stage);
                state.interrupt(
                    stage,
                    StageError::Cancelled.to_string(),
                    ErrorCategory::Transient,
                );
                return self
                    .finish(report_id, state, PipelineStatus::Failed, run_start, input)
                    .await;
            }

            let handler = self
                .stage_handlers
                .get(&stage)
                .ok_or(OrchestratorError::MissingHandler(stage))?;
            let stage_config = input.stage_config(stage).ok_or_else(|| {
                OrchestratorError::invalid_input(format!("no config for stage {}", stage))
            })?;

            state.begin_stage(stage)?;
            self.state_store.save(report_id, &state).await?;
            info!("Report {}: executing stage {}", report_id, stage);

            let started = Instant::now();
            let result = self
                .execute_stage(
                    handler.as_ref(),
                    stage,
                    StageInput {
                        report_id,
                        comments: &input.comments,
                        prior: CompletedResults::new(&state.completed_results),
                        config: stage_config,
                        sort_strategy: input.sort_strategy,
                        api_key: &input.api_key,
                        cancel: &cancel,
                    },
                )
                .await;
            let duration_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(success) => {
                    info!(
                        "Report {}: stage {} completed in {}ms ({} tokens, cost {:.4})",
                        report_id, stage, duration_ms, success.usage.total_tokens, success.cost
                    );
                    state.complete_stage(
                        stage,
                        success.output,
                        success.usage,
                        success.cost,
                        duration_ms,
                    )?;
                    self.record_stage(stage, &state);
                    self.state_store.save(report_id, &state).await?;
                    report_progress(config, stage, &state);
                }
                Err(e) => {
                    error!(
                        "Report {}: stage {} failed after {}ms: {}",
                        report_id, stage, duration_ms, e
                    );
                    state.fail_stage(stage, e.to_string(), e.category(), duration_ms)?;
                    self.record_stage(stage, &state);
                    return self
                        .finish(report_id, state, PipelineStatus::Failed, run_start, input)
                        .await;
                }
            }
        }

        self.finish(report_id, state, PipelineStatus::Completed, run_start, input)
            .await
    }

    async fn load_or_init(&self, config: &PipelineRunnerConfig) -> Result<PipelineState> {
        if config.resume_from_state {
            if let Some(mut state) = self.state_store.get(&config.report_id).await? {
                let demoted = state.repair();
                if !demoted.is_empty() {
                    warn!(
                        "Report {}: saved state inconsistent, re-running {:?}",
                        config.report_id, demoted
                    );
                }
                info!(
                    "Report {}: resuming after {} attempt(s), {} stage(s) settled",
                    config.report_id,
                    state.attempts,
                    state.settled_stage_count()
                );
                return Ok(state);
            }
            info!(
                "Report {}: no saved state, starting fresh",
                config.report_id
            );
        }
        Ok(PipelineState::new(&config.report_id, &config.user_id))
    }

    /// Execute one stage under the stage timeout
    async fn execute_stage(
        &self,
        handler: &dyn StageHandler,
        stage: StageName,
        input: StageInput<'_>,
    ) -> std::result::Result<StageSuccess, StageError> {
        let success = match tokio::time::timeout(self.stage_timeout, handler.execute(input)).await
        {
            Ok(result) => result?,
            Err(_) => return Err(StageError::Timeout(self.stage_timeout.as_millis() as u64)),
        };

        if success.output.stage() != stage {
            return Err(StageError::InvalidOutput(format!(
                "handler for {} returned {} output",
                stage,
                success.output.stage()
            )));
        }
        if !success.cost.is_finite() || success.cost < 0.0 {
            return Err(StageError::InvalidOutput(format!(
                "invalid cost {}",
                success.cost
            )));
        }
        Ok(success)
    }

    async fn finish(
        &self,
        report_id: &str,
        mut state: PipelineState,
        status: PipelineStatus,
        run_start: Instant,
        input: &PipelineInput,
    ) -> Result<RunOutcome> {
        state.finish(status, run_start.elapsed().as_millis() as u64)?;
        self.state_store.save(report_id, &state).await?;

        let success = status == PipelineStatus::Completed;
        let outputs = if success {
            Some(PipelineOutputs::from_state(&state, input.enable_cruxes)?)
        } else {
            None
        };

        match &state.error {
            Some(failure) => info!(
                "Report {}: run failed at {} ({}) after {}ms",
                report_id, failure.step, failure.category, state.total_duration_ms
            ),
            None => info!(
                "Report {}: run completed in {}ms ({} tokens, cost {:.4})",
                report_id, state.total_duration_ms, state.total_tokens, state.total_cost
            ),
        }

        Ok(RunOutcome {
            success,
            state,
            outputs,
        })
    }

    #[cfg(feature = "metrics")]
    fn record_stage(&self, stage: StageName, state: &PipelineState) {
        if let (Some(metrics), Some(analytics)) = (&self.metrics, state.step_analytics.get(&stage))
        {
            metrics.observe_stage(stage, analytics);
        }
    }

    #[cfg(not(feature = "metrics"))]
    fn record_stage(&self, _stage: StageName, _state: &PipelineState) {}
}

fn report_progress(config: &PipelineRunnerConfig, stage: StageName, state: &PipelineState) {
    if let Some(reporter) = &config.on_progress {
        reporter.report(ProgressUpdate {
            current_step: stage,
            percent_complete: percent(state.settled_through(stage), StageName::ALL.len()),
        });
    }
}
