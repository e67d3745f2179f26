/*
 * Claimtree Orchestration - Resumable Report Pipeline
 *
 * Turns a set of consultation comments into a numbered, deduplicated claim
 * tree with summaries and optional cruxes.
 *
 * Architecture:
 * - Stage state machine persisted per report (KeyValueStore)
 * - Run lock with heartbeat (LockStore)
 * - Resume from the first unfinished stage
 * - Pluggable stages (StageHandler)
 * - Taxonomy assembly: claim binding, duplicate nesting, numbering
 * - Observability (tracing, optional prometheus metrics)
 */

// Public modules
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod job;
pub mod lock;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod model;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod quote;
pub mod stages;
pub mod taxonomy;
pub mod telemetry;

// Re-exports
pub use checkpoint::PipelineStateStore;
pub use config::{ConfigError, OrchestrationConfig};
pub use error::{ErrorCategory, OrchestratorError, Result};
pub use job::{
    PipelineFailure, PipelineState, PipelineStatus, StageAnalytics, StageName, StageStatus,
    TokenUsage,
};
pub use lock::{lock_key, run_exclusive, RunLock};
#[cfg(feature = "metrics")]
pub use metrics::PipelineMetrics;
pub use model::{
    ApiKey, Comment, Crux, CruxReport, PipelineInput, SortStrategy, StageConfig, TopicSummary,
};
pub use orchestrator::{PipelineOutputs, PipelineRunner, PipelineRunnerConfig, RunOutcome};
pub use pipeline::{
    CompletedResults, ModelResponse, StageError, StageHandler, StageInput, StageOutput,
    StageSuccess,
};
pub use progress::{
    BroadcastProgress, NoopProgress, ProgressEvent, ProgressReporter, ProgressUpdate,
};
pub use quote::{locate, slice_chars, QuoteIndex, QuoteRef, QuoteSpan, SourceMap};
pub use stages::{
    ClaimExtractor, ClaimsStage, DuplicateGrouper, DuplicateGroups, ExtractedClaim,
    SortAndDeduplicateStage,
};
pub use taxonomy::{
    nest_claims, presentation_order, Claim, ClaimNumberer, ClaimTracker, ClaimsTree,
    FailedComment, SortedTree, Subtopic, SubtopicView, Taxonomy, TaxonomyBuilder, TaxonomyIndex,
    Topic, TopicView,
};
pub use telemetry::init_tracing;
