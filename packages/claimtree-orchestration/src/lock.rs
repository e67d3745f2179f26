//! At-most-one active run per report
//!
//! The runner never takes locks itself; callers wrap it with
//! [`run_exclusive`], or manage a [`RunLock`] by hand.

use crate::config::OrchestrationConfig;
use crate::error::{OrchestratorError, Result};
use crate::model::PipelineInput;
use crate::orchestrator::{PipelineRunner, PipelineRunnerConfig, RunOutcome};
use claimtree_storage::LockStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Held lock on one key, identified by a random token
pub struct RunLock {
    store: Arc<dyn LockStore>,
    key: String,
    token: String,
    ttl: Duration,
    heartbeat: Option<Heartbeat>,
    lost: CancellationToken,
}

struct Heartbeat {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl RunLock {
    /// `None` if someone else holds a live lock on `key`
    pub async fn acquire(
        store: Arc<dyn LockStore>,
        key: impl Into<String>,
        ttl: Duration,
    ) -> Result<Option<Self>> {
        let key = key.into();
        let token = Uuid::new_v4().to_string();

        if !store.acquire_lock(&key, &token, ttl).await? {
            debug!("Lock {} is held elsewhere", key);
            return Ok(None);
        }

        debug!("Acquired lock {}", key);
        Ok(Some(Self {
            store,
            key,
            token,
            ttl,
            heartbeat: None,
            lost: CancellationToken::new(),
        }))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Push expiry out by one TTL. `false` means the lock is gone.
    pub async fn extend(&self) -> Result<bool> {
        Ok(self
            .store
            .extend_lock(&self.key, &self.token, self.ttl)
            .await?)
    }

    /// Cancelled once the heartbeat finds the lock gone
    pub fn lost(&self) -> CancellationToken {
        self.lost.clone()
    }

    pub fn is_lost(&self) -> bool {
        self.lost.is_cancelled()
    }

    /// Extend every `interval` in a background task. On the first failed
    /// extension both [`RunLock::lost`] and `on_loss` are cancelled.
    pub fn start_heartbeat(&mut self, interval: Duration, on_loss: CancellationToken) {
        if self.heartbeat.is_some() {
            return;
        }

        let stop = CancellationToken::new();
        let store = Arc::clone(&self.store);
        let key = self.key.clone();
        let token = self.token.clone();
        let ttl = self.ttl;
        let lost = self.lost.clone();
        let stopped = stop.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stopped.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                match store.extend_lock(&key, &token, ttl).await {
                    Ok(true) => debug!("Extended lock {}", key),
                    Ok(false) => {
                        warn!("Lock {} lost to expiry or another holder", key);
                        lost.cancel();
                        on_loss.cancel();
                        break;
                    }
                    Err(e) => {
                        warn!("Lock {} could not be extended: {}", key, e);
                        lost.cancel();
                        on_loss.cancel();
                        break;
                    }
                }
            }
        });

        self.heartbeat = Some(Heartbeat { stop, handle });
    }

    /// Stop the heartbeat and release. `false` if the lock was no longer ours.
    pub async fn release(mut self) -> Result<bool> {
        self.stop_heartbeat().await;
        let released = self.store.release_lock(&self.key, &self.token).await?;
        if released {
            debug!("Released lock {}", self.key);
        } else {
            warn!("Lock {} was not held at release", self.key);
        }
        Ok(released)
    }

    async fn stop_heartbeat(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.stop.cancel();
            if let Err(e) = heartbeat.handle.await {
                warn!("Heartbeat task for {} ended abnormally: {}", self.key, e);
            }
        }
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        // Without release() the lock stays until its TTL runs out
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.stop.cancel();
        }
    }
}

/// `"{lock_key_prefix}:{report_id}"`
pub fn lock_key(config: &OrchestrationConfig, report_id: &str) -> String {
    format!("{}:{}", config.lock_key_prefix, report_id)
}

/// Run the pipeline while holding the report's lock.
///
/// Fails fast with [`OrchestratorError::LockContention`] if another run holds
/// it. The lock is extended in the background and released on every exit
/// path. If it is lost mid-run the run is cancelled before its next stage and
/// [`OrchestratorError::LockLost`] is returned; the persisted state stays
/// resumable.
pub async fn run_exclusive(
    runner: &PipelineRunner,
    locks: Arc<dyn LockStore>,
    config: &OrchestrationConfig,
    input: &PipelineInput,
    run_config: &PipelineRunnerConfig,
) -> Result<RunOutcome> {
    let report_id = run_config.report_id.as_str();
    let key = lock_key(config, report_id);

    let mut lock = RunLock::acquire(locks, key, config.lock_ttl())
        .await?
        .ok_or_else(|| OrchestratorError::LockContention(report_id.to_string()))?;
    info!("Report {}: lock acquired", report_id);

    let cancel = run_config
        .cancellation
        .clone()
        .unwrap_or_default()
        .child_token();
    lock.start_heartbeat(config.lock_extend_interval(), cancel.clone());

    let guarded = run_config.clone().with_cancellation(cancel);
    let result = runner.run(input, &guarded).await;
    let lost = lock.is_lost();

    if let Err(e) = lock.release().await {
        warn!("Report {}: lock release failed: {}", report_id, e);
    }

    let outcome = result?;
    if lost {
        return Err(OrchestratorError::LockLost(report_id.to_string()));
    }
    Ok(outcome)
}
