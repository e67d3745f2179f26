use crate::config::OrchestrationConfig;
use crate::job::{StageName, TokenUsage};
use crate::model::{ApiKey, Comment, StageConfig};
use crate::pipeline::{
    ModelResponse, StageError, StageHandler, StageInput, StageOutput, StageSuccess,
};
use crate::taxonomy::{Claim, ClaimsTree, FailedComment, Taxonomy, TaxonomyBuilder};
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Claim as returned by the extraction model, before it is given an id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedClaim {
    pub claim: String,
    pub quote: String,
    pub topic_name: String,
    pub subtopic_name: String,
}

/// Per-comment extraction call
#[async_trait]
pub trait ClaimExtractor: Send + Sync {
    async fn extract_claims(
        &self,
        comment: &Comment,
        taxonomy: &Taxonomy,
        config: &StageConfig,
        api_key: &ApiKey,
    ) -> Result<ModelResponse<Vec<ExtractedClaim>>, StageError>;
}

/// Claim extraction stage
///
/// Comments are processed in batches of `batch_size`; calls within a batch
/// run concurrently and the next batch starts only once all of them are
/// done. A failing comment is recorded in `failed_comments` and does not
/// affect its siblings. The stage fails only when every attempted comment
/// failed, or when the run is cancelled between batches.
pub struct ClaimsStage<E> {
    extractor: E,
    batch_size: usize,
}

impl<E: ClaimExtractor> ClaimsStage<E> {
    pub fn new(extractor: E, batch_size: usize) -> Self {
        Self {
            extractor,
            batch_size: batch_size.max(1),
        }
    }

    pub fn from_config(extractor: E, config: &OrchestrationConfig) -> Self {
        Self::new(extractor, config.claims_batch_size)
    }
}

#[async_trait]
impl<E: ClaimExtractor> StageHandler for ClaimsStage<E> {
    fn stage(&self) -> StageName {
        StageName::Claims
    }

    async fn execute(&self, input: StageInput<'_>) -> Result<StageSuccess, StageError> {
        let start = Instant::now();
        let taxonomy = input.prior.taxonomy()?;

        let comments: Vec<&Comment> = input
            .comments
            .iter()
            .filter(|c| !c.text.trim().is_empty())
            .collect();
        info!(
            "ClaimsStage: extracting from {} comments in batches of {}",
            comments.len(),
            self.batch_size
        );

        let mut builder = TaxonomyBuilder::new(taxonomy.clone());
        let mut failed_comments = Vec::new();
        let mut usage = TokenUsage::default();
        let mut cost = 0.0;
        let mut extracted = 0usize;

        for (batch_no, batch) in comments.chunks(self.batch_size).enumerate() {
            if input.cancel.is_cancelled() {
                warn!("ClaimsStage: cancelled before batch {}", batch_no);
                return Err(StageError::Cancelled);
            }

            let responses = join_all(batch.iter().map(|comment| {
                self.extractor
                    .extract_claims(comment, taxonomy, input.config, input.api_key)
            }))
            .await;

            for (comment, response) in batch.iter().zip(responses) {
                match response {
                    Ok(response) => {
                        usage += response.usage;
                        cost += response.cost;
                        for (seq, raw) in response.data.into_iter().enumerate() {
                            let claim = Claim::new(
                                Claim::id_for(&comment.id, seq),
                                raw.claim,
                                raw.quote,
                                comment.id.clone(),
                            )
                            .in_subtopic(raw.topic_name, raw.subtopic_name);
                            builder.insert_claim(claim);
                            extracted += 1;
                        }
                    }
                    Err(e) => {
                        warn!("ClaimsStage: comment {} failed: {}", comment.id, e);
                        failed_comments.push(FailedComment {
                            comment_id: comment.id.clone(),
                            message: e.to_string(),
                        });
                    }
                }
            }
            debug!("ClaimsStage: batch {} done", batch_no);
        }

        if !comments.is_empty() && failed_comments.len() == comments.len() {
            return Err(StageError::AllCommentsFailed(failed_comments.len()));
        }

        let (taxonomy, tracker) = builder.finish();
        info!(
            "ClaimsStage: {} claims ({} unmatched) from {} comments, {} failed, in {}ms",
            extracted,
            tracker.unmatched_claims.len(),
            comments.len(),
            failed_comments.len(),
            start.elapsed().as_millis()
        );

        Ok(StageSuccess {
            output: StageOutput::Claims(ClaimsTree {
                taxonomy,
                unmatched_claims: tracker.unmatched_claims,
                failed_comments,
            }),
            usage,
            cost,
        })
    }
}
