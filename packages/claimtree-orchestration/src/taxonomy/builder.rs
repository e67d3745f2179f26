use super::{Claim, Taxonomy};
use std::collections::HashMap;
use tracing::warn;

/// Exact-name lookup table over a taxonomy, built once per stage
#[derive(Debug, Default)]
pub struct TaxonomyIndex {
    topics: HashMap<String, usize>,
    subtopics: HashMap<(usize, String), usize>,
}

impl TaxonomyIndex {
    /// First occurrence wins when names repeat
    pub fn build(taxonomy: &Taxonomy) -> Self {
        let mut index = Self::default();
        for (t, topic) in taxonomy.topics.iter().enumerate() {
            index.topics.entry(topic.topic_name.clone()).or_insert(t);
            for (s, subtopic) in topic.subtopics.iter().enumerate() {
                index
                    .subtopics
                    .entry((t, subtopic.subtopic_name.clone()))
                    .or_insert(s);
            }
        }
        index
    }

    pub fn topic(&self, topic_name: &str) -> Option<usize> {
        self.topics.get(topic_name).copied()
    }

    /// `(topic_idx, subtopic_idx)` for an exact name pair
    pub fn locate(&self, topic_name: &str, subtopic_name: &str) -> Option<(usize, usize)> {
        let t = self.topic(topic_name)?;
        let s = self
            .subtopics
            .get(&(t, subtopic_name.to_string()))
            .copied()?;
        Some((t, s))
    }
}

/// Claims that named a topic/subtopic the taxonomy does not have
#[derive(Debug, Default, Clone)]
pub struct ClaimTracker {
    pub unmatched_claims: Vec<Claim>,
}

impl ClaimTracker {
    pub fn is_empty(&self) -> bool {
        self.unmatched_claims.is_empty()
    }
}

/// Populates a clustering taxonomy with extracted claims
pub struct TaxonomyBuilder {
    taxonomy: Taxonomy,
    index: TaxonomyIndex,
    tracker: ClaimTracker,
}

impl TaxonomyBuilder {
    pub fn new(taxonomy: Taxonomy) -> Self {
        let index = TaxonomyIndex::build(&taxonomy);
        Self {
            taxonomy,
            index,
            tracker: ClaimTracker::default(),
        }
    }

    /// Append `claim` to its subtopic. Returns `false` and records the claim
    /// as unmatched, leaving the taxonomy untouched, if either name misses.
    pub fn insert_claim(&mut self, claim: Claim) -> bool {
        match self.index.locate(&claim.topic_name, &claim.subtopic_name) {
            Some((t, s)) => {
                self.taxonomy.topics[t].subtopics[s].claims.push(claim);
                true
            }
            None => {
                warn!(
                    "Claim {} references unknown topic/subtopic {:?}/{:?}",
                    claim.claim_id, claim.topic_name, claim.subtopic_name
                );
                self.tracker.unmatched_claims.push(claim);
                false
            }
        }
    }

    pub fn tracker(&self) -> &ClaimTracker {
        &self.tracker
    }

    pub fn finish(self) -> (Taxonomy, ClaimTracker) {
        (self.taxonomy, self.tracker)
    }
}
