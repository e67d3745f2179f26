//! Prometheus metrics for pipeline runs

use crate::job::{StageAnalytics, StageName, StageStatus};
use prometheus::{
    register_counter_vec_with_registry, register_histogram_vec_with_registry,
    register_int_counter_vec_with_registry, CounterVec, HistogramOpts, HistogramVec,
    IntCounterVec, Opts, Registry,
};

/// Per-stage counters, labelled by `stage`
#[derive(Clone)]
pub struct PipelineMetrics {
    pub completed: IntCounterVec,
    pub failed: IntCounterVec,
    pub skipped: IntCounterVec,
    pub tokens: IntCounterVec,
    pub cost: CounterVec,
    pub duration: HistogramVec,
}

impl PipelineMetrics {
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        Ok(Self {
            completed: register_int_counter_vec_with_registry!(
                Opts::new("pipeline_stage_completed_total", "Stages completed"),
                &["stage"],
                registry
            )?,
            failed: register_int_counter_vec_with_registry!(
                Opts::new("pipeline_stage_failed_total", "Stages failed"),
                &["stage"],
                registry
            )?,
            skipped: register_int_counter_vec_with_registry!(
                Opts::new("pipeline_stage_skipped_total", "Stages skipped"),
                &["stage"],
                registry
            )?,
            tokens: register_int_counter_vec_with_registry!(
                Opts::new("pipeline_stage_tokens_total", "Model tokens used by completed stages"),
                &["stage"],
                registry
            )?,
            cost: register_counter_vec_with_registry!(
                Opts::new("pipeline_stage_cost_total", "Model cost of completed stages"),
                &["stage"],
                registry
            )?,
            duration: register_histogram_vec_with_registry!(
                HistogramOpts::new("pipeline_stage_duration_seconds", "Stage wall time")
                    .buckets(vec![1.0, 5.0, 15.0, 60.0, 180.0, 600.0, 1800.0]),
                &["stage"],
                registry
            )?,
        })
    }

    /// Record a stage that just settled
    pub fn observe_stage(&self, stage: StageName, analytics: &StageAnalytics) {
        let label = [stage.as_str()];
        let seconds = analytics.duration_ms as f64 / 1000.0;

        match analytics.status {
            StageStatus::Completed => {
                self.completed.with_label_values(&label).inc();
                self.tokens
                    .with_label_values(&label)
                    .inc_by(analytics.usage.total_tokens);
                self.cost.with_label_values(&label).inc_by(analytics.cost);
                self.duration.with_label_values(&label).observe(seconds);
            }
            StageStatus::Failed => {
                self.failed.with_label_values(&label).inc();
                self.duration.with_label_values(&label).observe(seconds);
            }
            StageStatus::Skipped => self.skipped.with_label_values(&label).inc(),
            StageStatus::Pending | StageStatus::Running => {}
        }
    }
}
