// Provided stage adapters; clustering, summaries and cruxes are supplied by callers
pub mod claims_stage;
pub mod dedup_stage;

// Re-exports
pub use claims_stage::{ClaimExtractor, ClaimsStage, ExtractedClaim};
pub use dedup_stage::{DuplicateGrouper, DuplicateGroups, SortAndDeduplicateStage};
