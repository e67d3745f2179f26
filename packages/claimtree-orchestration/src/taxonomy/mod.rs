//! Taxonomy assembly
//!
//! Deterministic functions that turn per-stage model output into the final
//! claim tree:
//!
//! - [`TaxonomyBuilder`]: binds extracted claims to topics/subtopics by exact
//!   name through a [`TaxonomyIndex`] built once; misses go to the
//!   [`ClaimTracker`] instead of failing.
//! - [`nest_claims`]: folds a subtopic's duplicate groups into their
//!   canonical claims and reorders the visible list.
//! - [`ClaimNumberer`]: run-wide stable numbering `1..=N` in first-seen order.
//! - [`presentation_order`]: display ordering only; never changes membership.

mod builder;
mod nesting;
mod numbering;
mod presentation;

pub use builder::{ClaimTracker, TaxonomyBuilder, TaxonomyIndex};
pub use nesting::nest_claims;
pub use numbering::ClaimNumberer;
pub use presentation::{presentation_order, SubtopicView, TopicView};

use crate::quote::QuoteRef;
use serde::{Deserialize, Serialize};

/// Topic tree produced by clustering, later populated with claims
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Taxonomy {
    pub topics: Vec<Topic>,
}

impl Taxonomy {
    pub fn new(topics: Vec<Topic>) -> Self {
        Self { topics }
    }

    /// Every claim, visible ones first in tree order, each followed by its
    /// nested duplicates (pre-order)
    pub fn claims(&self) -> Vec<&Claim> {
        let mut out = Vec::new();
        for topic in &self.topics {
            for subtopic in &topic.subtopics {
                for claim in &subtopic.claims {
                    claim.walk(&mut out);
                }
            }
        }
        out
    }

    pub fn visible_claim_count(&self) -> usize {
        self.topics
            .iter()
            .flat_map(|t| &t.subtopics)
            .map(|s| s.claims.len())
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
    pub topic_name: String,
    #[serde(default)]
    pub topic_short_description: String,
    #[serde(default)]
    pub subtopics: Vec<Subtopic>,
}

impl Topic {
    pub fn new(name: impl Into<String>, subtopics: Vec<Subtopic>) -> Self {
        Self {
            topic_name: name.into(),
            topic_short_description: String::new(),
            subtopics,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subtopic {
    pub subtopic_name: String,
    #[serde(default)]
    pub subtopic_short_description: String,
    #[serde(default)]
    pub claims: Vec<Claim>,
}

impl Subtopic {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            subtopic_name: name.into(),
            subtopic_short_description: String::new(),
            claims: Vec::new(),
        }
    }
}

/// Atomic assertion extracted from one comment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    /// `"{comment_id}-{seq}"`, stable across runs
    pub claim_id: String,
    pub claim: String,
    pub quote: String,
    #[serde(default)]
    pub topic_name: String,
    #[serde(default)]
    pub subtopic_name: String,
    pub comment_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<u32>,
    #[serde(default)]
    pub duplicates: Vec<Claim>,
    #[serde(default)]
    pub duplicated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote_ref: Option<QuoteRef>,
}

impl Claim {
    pub fn new(
        claim_id: impl Into<String>,
        claim: impl Into<String>,
        quote: impl Into<String>,
        comment_id: impl Into<String>,
    ) -> Self {
        Self {
            claim_id: claim_id.into(),
            claim: claim.into(),
            quote: quote.into(),
            topic_name: String::new(),
            subtopic_name: String::new(),
            comment_id: comment_id.into(),
            number: None,
            duplicates: Vec::new(),
            duplicated: false,
            quote_ref: None,
        }
    }

    pub fn in_subtopic(mut self, topic: impl Into<String>, subtopic: impl Into<String>) -> Self {
        self.topic_name = topic.into();
        self.subtopic_name = subtopic.into();
        self
    }

    /// Stable id for the `seq`-th claim of a comment
    pub fn id_for(comment_id: &str, seq: usize) -> String {
        format!("{}-{}", comment_id, seq)
    }

    /// This claim plus all nested duplicates
    pub fn weight(&self) -> usize {
        1 + self.duplicates.iter().map(Claim::weight).sum::<usize>()
    }

    fn walk<'a>(&'a self, out: &mut Vec<&'a Claim>) {
        out.push(self);
        for dup in &self.duplicates {
            dup.walk(out);
        }
    }
}

/// A comment whose claim extraction failed; its siblings were unaffected
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedComment {
    pub comment_id: String,
    pub message: String,
}

/// Output of the claims stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimsTree {
    pub taxonomy: Taxonomy,
    #[serde(default)]
    pub unmatched_claims: Vec<Claim>,
    #[serde(default)]
    pub failed_comments: Vec<FailedComment>,
}

/// Output of the sort-and-deduplicate stage: the final topic tree
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortedTree {
    pub taxonomy: Taxonomy,
    #[serde(default)]
    pub unmatched_claims: Vec<Claim>,
    /// Claim ids whose quote could not be found in the source comment
    #[serde(default)]
    pub unverified_quotes: Vec<String>,
}
