//! Progress reporting
//!
//! The runner reports once per stage that completes during a run, and once
//! per stage reused from a previous attempt. `percent_complete` counts the
//! stages settled up to the reported one, plus skipped stages, over the fixed
//! five, so it never decreases and the last report of a successful run is
//! exactly 100.

use crate::job::StageName;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub current_step: StageName,
    pub percent_complete: f64,
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, update: ProgressUpdate);
}

impl<F> ProgressReporter for F
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    fn report(&self, update: ProgressUpdate) {
        self(update)
    }
}

/// Discards every update
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _update: ProgressUpdate) {}
}

/// Progress tagged with the report it belongs to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub report_id: String,
    #[serde(flatten)]
    pub update: ProgressUpdate,
}

/// Fans progress out to any number of subscribers (UI streams).
/// Slow subscribers lag and drop old events; the runner never blocks.
#[derive(Debug, Clone)]
pub struct BroadcastProgress {
    report_id: String,
    sender: broadcast::Sender<ProgressEvent>,
}

impl BroadcastProgress {
    pub fn new(report_id: impl Into<String>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            report_id: report_id.into(),
            sender,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, update: ProgressUpdate) {
        // No subscribers is fine
        let _ = self.sender.send(ProgressEvent {
            report_id: self.report_id.clone(),
            update,
        });
    }
}

pub(crate) fn percent(settled: usize, total: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    100.0 * settled as f64 / total as f64
}
