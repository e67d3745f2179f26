use crate::job::{StageName, TokenUsage};
use crate::model::{ApiKey, StageConfig};
use crate::pipeline::{
    ModelResponse, StageError, StageHandler, StageInput, StageOutput, StageSuccess,
};
use crate::quote::{QuoteIndex, SourceMap};
use crate::taxonomy::{nest_claims, Claim, ClaimNumberer, SortedTree, Subtopic};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Canonical claim id → ids of the claims it absorbs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateGroups {
    pub nesting: BTreeMap<String, Vec<String>>,
}

/// Per-subtopic duplicate detection call
#[async_trait]
pub trait DuplicateGrouper: Send + Sync {
    async fn group_duplicates(
        &self,
        topic_name: &str,
        subtopic: &Subtopic,
        config: &StageConfig,
        api_key: &ApiKey,
    ) -> Result<ModelResponse<DuplicateGroups>, StageError>;
}

/// Sort-and-deduplicate stage
///
/// Nests duplicates under their canonical claims, numbers every claim
/// `1..=N` across the whole tree and anchors quotes in the source comments.
/// Subtopics with fewer than two claims are not sent to the grouper.
pub struct SortAndDeduplicateStage<G> {
    grouper: G,
}

impl<G: DuplicateGrouper> SortAndDeduplicateStage<G> {
    pub fn new(grouper: G) -> Self {
        Self { grouper }
    }
}

#[async_trait]
impl<G: DuplicateGrouper> StageHandler for SortAndDeduplicateStage<G> {
    fn stage(&self) -> StageName {
        StageName::SortAndDeduplicate
    }

    async fn execute(&self, input: StageInput<'_>) -> Result<StageSuccess, StageError> {
        let start = Instant::now();
        let tree = input.prior.claims_tree()?;

        let sources = SourceMap::from_comments(input.comments);
        let quotes = QuoteIndex::build(
            &sources,
            tree.taxonomy
                .claims()
                .into_iter()
                .chain(tree.unmatched_claims.iter()),
        );
        debug!(
            "SortAndDeduplicateStage: resolved {} quotes",
            quotes.len()
        );

        let mut taxonomy = tree.taxonomy.clone();
        let mut usage = TokenUsage::default();
        let mut cost = 0.0;
        let mut grouped = 0usize;

        for topic in &mut taxonomy.topics {
            for subtopic in topic.subtopics.iter_mut() {
                if subtopic.claims.len() < 2 {
                    continue;
                }
                if input.cancel.is_cancelled() {
                    warn!("SortAndDeduplicateStage: cancelled");
                    return Err(StageError::Cancelled);
                }

                let response = self
                    .grouper
                    .group_duplicates(&topic.topic_name, subtopic, input.config, input.api_key)
                    .await?;
                usage += response.usage;
                cost += response.cost;
                nest_claims(subtopic, &response.data.nesting);
                grouped += 1;
            }
        }

        let mut numberer = ClaimNumberer::new();
        for topic in &mut taxonomy.topics {
            for subtopic in topic.subtopics.iter_mut() {
                subtopic.claims = subtopic
                    .claims
                    .iter()
                    .map(|claim| numberer.number_claim(claim, &claim.duplicates, &quotes))
                    .collect();
            }
        }

        let unverified_quotes: Vec<String> = taxonomy
            .claims()
            .into_iter()
            .filter(|claim| claim.quote_ref.is_none())
            .map(|claim| claim.claim_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let unmatched_claims: Vec<Claim> = tree
            .unmatched_claims
            .iter()
            .map(|claim| Claim {
                quote_ref: quotes.resolve(claim),
                ..claim.clone()
            })
            .collect();

        info!(
            "SortAndDeduplicateStage: {} subtopics grouped, {} claims numbered ({} visible), {} unverified quotes in {}ms",
            grouped,
            numberer.assigned(),
            taxonomy.visible_claim_count(),
            unverified_quotes.len(),
            start.elapsed().as_millis()
        );

        Ok(StageSuccess {
            output: StageOutput::SortAndDeduplicate(SortedTree {
                taxonomy,
                unmatched_claims,
                unverified_quotes,
            }),
            usage,
            cost,
        })
    }
}
