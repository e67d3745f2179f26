use crate::config::ConfigError;
use crate::job::StageName;
use claimtree_storage::StorageError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Fatal conditions for a run attempt.
///
/// Stage failures are not represented here; they travel as
/// [`StageError`](crate::pipeline::StageError) values and end the run with
/// `success = false`.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid state transition for stage {stage}: {from} -> {to}")]
    InvalidStateTransition {
        stage: StageName,
        from: String,
        to: String,
    },

    #[error("Inconsistent pipeline state: {0}")]
    InvalidState(String),

    #[error("No handler registered for stage {0}")]
    MissingHandler(StageName),

    #[error("Report {0} is already being processed")]
    LockContention(String),

    #[error("Lock lost for report {0}")]
    LockLost(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid pipeline input: {0}")]
    InvalidInput(String),

    #[cfg(feature = "metrics")]
    #[error("Metrics registration failed: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OrchestratorError {
    pub fn serialization<E: std::fmt::Display>(e: E) -> Self {
        Self::Serialization(e.to_string())
    }

    pub fn invalid_input<E: std::fmt::Display>(e: E) -> Self {
        Self::InvalidInput(e.to_string())
    }
}

/// Error category for retry decisions made outside the runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Transient error - a resume is likely to succeed (timeout, rate limit, cancellation)
    Transient,
    /// Permanent error - resuming will fail the same way (invalid output, missing input)
    Permanent,
    /// Infrastructure error - alert ops
    Infrastructure,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Permanent => "permanent",
            ErrorCategory::Infrastructure => "infrastructure",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCategory::Transient)
    }
}

impl std::str::FromStr for ErrorCategory {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "transient" => Ok(ErrorCategory::Transient),
            "permanent" => Ok(ErrorCategory::Permanent),
            "infrastructure" => Ok(ErrorCategory::Infrastructure),
            _ => Err(OrchestratorError::InvalidState(format!(
                "Invalid error category: {}",
                s
            ))),
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
