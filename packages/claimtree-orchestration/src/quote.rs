//! Quote locator
//!
//! Resolves a quoted fragment to a `[start, end)` range of **char** offsets
//! in its source comment. Policy:
//!
//! 1. exact substring match, first occurrence;
//! 2. otherwise match after collapsing whitespace runs to one space in both
//!    texts, then map the match back to original offsets;
//! 3. otherwise `None`: the quote is unverifiable, which is never an error.
//!
//! For an exact match `slice_chars(text, start, end) == quote`.

use crate::model::Comment;
use crate::taxonomy::Claim;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Char range of a located quote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuoteSpan {
    pub start_idx: usize,
    pub end_idx: usize,
}

/// Where a claim's quote sits in its source comment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRef {
    pub source_id: String,
    pub start_idx: usize,
    pub end_idx: usize,
}

pub fn locate(quote: &str, text: &str) -> Option<QuoteSpan> {
    if quote.trim().is_empty() {
        return None;
    }

    if let Some(byte_idx) = text.find(quote) {
        let start_idx = text[..byte_idx].chars().count();
        return Some(QuoteSpan {
            start_idx,
            end_idx: start_idx + quote.chars().count(),
        });
    }

    locate_normalized(quote, text)
}

fn locate_normalized(quote: &str, text: &str) -> Option<QuoteSpan> {
    let (needle, _) = collapse_whitespace(quote.trim());
    let (haystack, origin) = collapse_whitespace(text);

    let byte_idx = haystack.find(&needle)?;
    let start = haystack[..byte_idx].chars().count();
    let len = needle.chars().count();

    // needle is trimmed, so both ends land on non-whitespace chars
    Some(QuoteSpan {
        start_idx: origin[start],
        end_idx: origin[start + len - 1] + 1,
    })
}

/// Collapse whitespace runs to a single space. Returns the collapsed text and,
/// for each of its chars, the char offset it came from.
fn collapse_whitespace(text: &str) -> (String, Vec<usize>) {
    let mut out = String::with_capacity(text.len());
    let mut origin = Vec::with_capacity(text.len());
    let mut in_run = false;

    for (idx, c) in text.chars().enumerate() {
        if c.is_whitespace() {
            if !in_run {
                out.push(' ');
                origin.push(idx);
            }
            in_run = true;
        } else {
            out.push(c);
            origin.push(idx);
            in_run = false;
        }
    }
    (out, origin)
}

/// Slice by char offsets. `None` if the range is out of bounds or inverted.
pub fn slice_chars(text: &str, start_idx: usize, end_idx: usize) -> Option<&str> {
    if start_idx > end_idx {
        return None;
    }
    let byte_at = |char_idx: usize| {
        text.char_indices()
            .map(|(b, _)| b)
            .chain(std::iter::once(text.len()))
            .nth(char_idx)
    };
    let start = byte_at(start_idx)?;
    let end = byte_at(end_idx)?;
    text.get(start..end)
}

/// Comment id → original text
#[derive(Debug, Default, Clone)]
pub struct SourceMap {
    texts: HashMap<String, String>,
}

impl SourceMap {
    pub fn from_comments(comments: &[Comment]) -> Self {
        Self {
            texts: comments
                .iter()
                .map(|c| (c.id.clone(), c.text.clone()))
                .collect(),
        }
    }

    pub fn get(&self, source_id: &str) -> Option<&str> {
        self.texts.get(source_id).map(String::as_str)
    }

    pub fn resolve(&self, source_id: &str, quote: &str) -> Option<QuoteRef> {
        let text = self.get(source_id)?;
        locate(quote, text).map(|span| QuoteRef {
            source_id: source_id.to_string(),
            start_idx: span.start_idx,
            end_idx: span.end_idx,
        })
    }
}

/// Claim id → resolved quote, computed up front in parallel.
/// Lookups for claims not in the index fall back to resolving on demand.
pub struct QuoteIndex<'a> {
    sources: &'a SourceMap,
    resolved: HashMap<String, Option<QuoteRef>>,
}

impl<'a> QuoteIndex<'a> {
    pub fn build<'c, I>(sources: &'a SourceMap, claims: I) -> Self
    where
        I: IntoIterator<Item = &'c Claim>,
    {
        let pending: Vec<&Claim> = claims.into_iter().collect();
        let resolved = pending
            .par_iter()
            .map(|claim| {
                (
                    claim.claim_id.clone(),
                    sources.resolve(&claim.comment_id, &claim.quote),
                )
            })
            .collect();
        Self { sources, resolved }
    }

    pub fn resolve(&self, claim: &Claim) -> Option<QuoteRef> {
        match self.resolved.get(&claim.claim_id) {
            Some(found) => found.clone(),
            None => self.sources.resolve(&claim.comment_id, &claim.quote),
        }
    }

    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }

    /// Claim ids whose quote could not be located
    pub fn unverified(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .resolved
            .iter()
            .filter(|(_, found)| found.is_none())
            .map(|(id, _)| id.as_str())
            .collect();
        ids.sort_unstable();
        ids
    }
}
