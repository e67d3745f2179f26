use crate::config::OrchestrationConfig;
use crate::error::{OrchestratorError, Result};
use crate::job::PipelineState;
use claimtree_storage::KeyValueStore;
use std::sync::Arc;
use tracing::debug;

/// Persists one `PipelineState` per report as a single JSON blob.
///
/// Every save overwrites the whole record, so readers see either the previous
/// state or the new one. Records never expire; retention of terminal states is
/// left to whoever calls [`PipelineStateStore::delete`].
#[derive(Clone)]
pub struct PipelineStateStore {
    store: Arc<dyn KeyValueStore>,
    prefix: String,
}

impl PipelineStateStore {
    pub fn new(store: Arc<dyn KeyValueStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    pub fn from_config(store: Arc<dyn KeyValueStore>, config: &OrchestrationConfig) -> Self {
        Self::new(store, config.state_key_prefix.clone())
    }

    /// `"{prefix}:{report_id}"`
    pub fn key_for(&self, report_id: &str) -> String {
        format!("{}:{}", self.prefix, report_id)
    }

    pub async fn get(&self, report_id: &str) -> Result<Option<PipelineState>> {
        let key = self.key_for(report_id);
        match self.store.get(&key).await? {
            Some(bytes) => {
                let state = serde_json::from_slice(&bytes).map_err(|e| {
                    OrchestratorError::serialization(format!("state {}: {}", key, e))
                })?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    pub async fn save(&self, report_id: &str, state: &PipelineState) -> Result<()> {
        let key = self.key_for(report_id);
        let bytes = serde_json::to_vec(state).map_err(OrchestratorError::serialization)?;
        debug!("Saving {} ({} bytes)", key, bytes.len());
        self.store.set(&key, bytes, None).await?;
        Ok(())
    }

    /// Returns whether a record existed
    pub async fn delete(&self, report_id: &str) -> Result<bool> {
        Ok(self.store.delete(&self.key_for(report_id)).await?)
    }
}
