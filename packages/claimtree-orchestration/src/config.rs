//! Orchestration settings
//!
//! Loaded from YAML (`version: 1` at the top) or built in code; every field
//! has a default. Call [`OrchestrationConfig::validate`] before use; the
//! loaders do it for you.
//!
//! ```yaml
//! version: 1
//! claims_batch_size: 8
//! stage_timeout_ms: 900000
//! lock_ttl_secs: 120
//! lock_extend_interval_secs: 30
//! state_key_prefix: pipeline_state
//! lock_key_prefix: pipeline_lock
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const SUPPORTED_VERSIONS: &[u32] = &[1];

#[derive(Error, Debug)]
pub enum ConfigError {
    /// Range validation error
    #[error("Invalid range for field '{field}': {value} not in {min}..={max}. {hint}")]
    Range {
        field: String,
        value: String,
        min: String,
        max: String,
        hint: String,
    },

    #[error("Invalid value for field '{field}': {reason}")]
    Invalid { field: String, reason: String },

    #[error("Unsupported configuration version {found}. Supported versions: {}", supported.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", "))]
    UnsupportedVersion { found: u32, supported: Vec<u32> },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

impl ConfigError {
    /// Create a range error with a hint
    pub fn range_with_hint(
        field: impl Into<String>,
        value: impl ToString,
        min: impl ToString,
        max: impl ToString,
        hint: impl Into<String>,
    ) -> Self {
        Self::Range {
            field: field.into(),
            value: value.to_string(),
            min: min.to_string(),
            max: max.to_string(),
            hint: hint.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrchestrationConfig {
    pub version: u32,
    /// Comments per concurrent batch in the claims stage
    pub claims_batch_size: usize,
    /// Upper bound on a single stage invocation
    pub stage_timeout_ms: u64,
    pub lock_ttl_secs: u64,
    /// Heartbeat period; must be shorter than the TTL
    pub lock_extend_interval_secs: u64,
    pub state_key_prefix: String,
    pub lock_key_prefix: String,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            version: 1,
            claims_batch_size: 8,
            stage_timeout_ms: 15 * 60 * 1000,
            lock_ttl_secs: 120,
            lock_extend_interval_secs: 30,
            state_key_prefix: "pipeline_state".to_string(),
            lock_key_prefix: "pipeline_lock".to_string(),
        }
    }
}

impl OrchestrationConfig {
    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if !SUPPORTED_VERSIONS.contains(&self.version) {
            return Err(ConfigError::UnsupportedVersion {
                found: self.version,
                supported: SUPPORTED_VERSIONS.to_vec(),
            });
        }

        check_range(
            "claims_batch_size",
            self.claims_batch_size as u64,
            1,
            256,
            "Larger batches hit provider rate limits; 8 is a safe start",
        )?;
        check_range(
            "stage_timeout_ms",
            self.stage_timeout_ms,
            1_000,
            86_400_000,
            "A stage must finish within a finite budget",
        )?;
        check_range(
            "lock_ttl_secs",
            self.lock_ttl_secs,
            5,
            3_600,
            "TTL bounds how long a crashed worker blocks the report",
        )?;
        check_range(
            "lock_extend_interval_secs",
            self.lock_extend_interval_secs,
            1,
            self.lock_ttl_secs.saturating_sub(1),
            "Extend the lock well before it expires, e.g. TTL / 4",
        )?;

        check_prefix("state_key_prefix", &self.state_key_prefix)?;
        check_prefix("lock_key_prefix", &self.lock_key_prefix)?;
        if self.state_key_prefix == self.lock_key_prefix {
            return Err(ConfigError::Invalid {
                field: "lock_key_prefix".to_string(),
                reason: "must differ from state_key_prefix".to_string(),
            });
        }
        Ok(())
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_millis(self.stage_timeout_ms)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn lock_extend_interval(&self) -> Duration {
        Duration::from_secs(self.lock_extend_interval_secs)
    }
}

fn check_range(field: &str, value: u64, min: u64, max: u64, hint: &str) -> ConfigResult<()> {
    if value < min || value > max {
        return Err(ConfigError::range_with_hint(field, value, min, max, hint));
    }
    Ok(())
}

fn check_prefix(field: &str, prefix: &str) -> ConfigResult<()> {
    if prefix.is_empty() {
        return Err(ConfigError::Invalid {
            field: field.to_string(),
            reason: "must not be empty".to_string(),
        });
    }
    if prefix.contains(':') {
        return Err(ConfigError::Invalid {
            field: field.to_string(),
            reason: format!("'{}' must not contain ':'", prefix),
        });
    }
    Ok(())
}
