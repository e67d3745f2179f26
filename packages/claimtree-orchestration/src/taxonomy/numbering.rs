use super::Claim;
use crate::quote::QuoteIndex;
use std::collections::HashMap;

/// Run-wide claim numbering.
///
/// Numbers are handed out `1, 2, 3, ...` in first-seen order, one per distinct
/// claim id. An id is marked before its duplicates are visited, so a claim
/// reachable from several parents (or from itself through a cycle) is
/// numbered once; a revisit while it is still being built yields a leaf copy
/// carrying the number it already has.
#[derive(Debug)]
pub struct ClaimNumberer {
    next_number: u32,
    numbers: HashMap<String, u32>,
    built: HashMap<String, Claim>,
}

impl Default for ClaimNumberer {
    fn default() -> Self {
        Self::new()
    }
}

impl ClaimNumberer {
    pub fn new() -> Self {
        Self {
            next_number: 1,
            numbers: HashMap::new(),
            built: HashMap::new(),
        }
    }

    /// Build a numbered copy of `claim` with each of `duplicates` built
    /// recursively. Repeated calls for the same id return the cached result.
    pub fn number_claim(
        &mut self,
        claim: &Claim,
        duplicates: &[Claim],
        quotes: &QuoteIndex<'_>,
    ) -> Claim {
        if let Some(built) = self.built.get(&claim.claim_id) {
            return built.clone();
        }
        if let Some(&number) = self.numbers.get(&claim.claim_id) {
            return leaf(claim, number, quotes);
        }

        let number = self.assign(&claim.claim_id);
        self.build(claim, number, duplicates, quotes)
    }

    fn build(
        &mut self,
        claim: &Claim,
        number: u32,
        duplicates: &[Claim],
        quotes: &QuoteIndex<'_>,
    ) -> Claim {
        let mut similar = Vec::with_capacity(duplicates.len());
        for dup in duplicates {
            if let Some(built) = self.built.get(&dup.claim_id) {
                similar.push(built.clone());
                continue;
            }
            if let Some(&seen) = self.numbers.get(&dup.claim_id) {
                similar.push(leaf(dup, seen, quotes));
                continue;
            }
            let dup_number = self.assign(&dup.claim_id);
            similar.push(self.build(dup, dup_number, &dup.duplicates, quotes));
        }

        let built = Claim {
            number: Some(number),
            duplicates: similar,
            quote_ref: quotes.resolve(claim),
            ..claim.clone()
        };
        self.built.insert(claim.claim_id.clone(), built.clone());
        built
    }

    fn assign(&mut self, claim_id: &str) -> u32 {
        let number = self.next_number;
        self.next_number += 1;
        self.numbers.insert(claim_id.to_string(), number);
        number
    }

    /// Number already given to `claim_id`, if any
    pub fn number_of(&self, claim_id: &str) -> Option<u32> {
        self.numbers.get(claim_id).copied()
    }

    /// Distinct ids numbered so far (N)
    pub fn assigned(&self) -> usize {
        self.numbers.len()
    }
}

fn leaf(claim: &Claim, number: u32, quotes: &QuoteIndex<'_>) -> Claim {
    Claim {
        number: Some(number),
        duplicates: Vec::new(),
        quote_ref: quotes.resolve(claim),
        ..claim.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Comment;
    use crate::quote::SourceMap;

    fn claim(id: &str) -> Claim {
        Claim::new(id, format!("claim {}", id), "quote", "c1")
    }

    fn with_dups(id: &str, dups: Vec<Claim>) -> Claim {
        let mut c = claim(id);
        c.duplicates = dups;
        c
    }

    #[test]
    fn test_numbers_in_first_seen_order() {
        let sources = SourceMap::default();
        let quotes = QuoteIndex::build(&sources, std::iter::empty());
        let mut numberer = ClaimNumberer::new();

        let a = numberer.number_claim(&claim("a"), &[], &quotes);
        let b = numberer.number_claim(&claim("b"), &[], &quotes);

        assert_eq!(a.number, Some(1));
        assert_eq!(b.number, Some(2));
        assert_eq!(numberer.assigned(), 2);
    }

    #[test]
    fn test_repeated_call_returns_cached_claim() {
        let sources = SourceMap::default();
        let quotes = QuoteIndex::build(&sources, std::iter::empty());
        let mut numberer = ClaimNumberer::new();

        let first = numberer.number_claim(&claim("a"), &[claim("b")], &quotes);
        let again = numberer.number_claim(&claim("a"), &[claim("b")], &quotes);

        assert_eq!(first, again);
        assert_eq!(numberer.assigned(), 2);
    }

    #[test]
    fn test_duplicates_numbered_depth_first() {
        let sources = SourceMap::default();
        let quotes = QuoteIndex::build(&sources, std::iter::empty());
        let mut numberer = ClaimNumberer::new();

        let dups = vec![with_dups("b", vec![claim("c")]), claim("d")];
        let built = numberer.number_claim(&claim("a"), &dups, &quotes);

        assert_eq!(built.number, Some(1));
        assert_eq!(built.duplicates[0].number, Some(2));
        assert_eq!(built.duplicates[0].duplicates[0].number, Some(3));
        assert_eq!(built.duplicates[1].number, Some(4));
    }

    #[test]
    fn test_shared_duplicate_numbered_once() {
        let sources = SourceMap::default();
        let quotes = QuoteIndex::build(&sources, std::iter::empty());
        let mut numberer = ClaimNumberer::new();

        let a = numberer.number_claim(&claim("a"), &[claim("shared")], &quotes);
        let b = numberer.number_claim(&claim("b"), &[claim("shared")], &quotes);

        assert_eq!(a.duplicates[0].number, Some(2));
        assert_eq!(b.duplicates[0].number, Some(2));
        assert_eq!(b.number, Some(3));
        assert_eq!(numberer.assigned(), 3);
    }

    #[test]
    fn test_cycle_terminates_with_leaf() {
        let sources = SourceMap::default();
        let quotes = QuoteIndex::build(&sources, std::iter::empty());
        let mut numberer = ClaimNumberer::new();

        // a -> b -> a
        let b = with_dups("b", vec![claim("a")]);
        let built = numberer.number_claim(&claim("a"), &[b], &quotes);

        let back_edge = &built.duplicates[0].duplicates[0];
        assert_eq!(back_edge.claim_id, "a");
        assert_eq!(back_edge.number, Some(1));
        assert!(back_edge.duplicates.is_empty());
        assert_eq!(numberer.assigned(), 2);
    }

    #[test]
    fn test_self_reference_is_leaf() {
        let sources = SourceMap::default();
        let quotes = QuoteIndex::build(&sources, std::iter::empty());
        let mut numberer = ClaimNumberer::new();

        let built = numberer.number_claim(&claim("a"), &[claim("a")], &quotes);

        assert_eq!(built.duplicates.len(), 1);
        assert_eq!(built.duplicates[0].number, Some(1));
        assert_eq!(numberer.assigned(), 1);
    }

    #[test]
    fn test_quotes_resolved_for_duplicates() {
        let sources = SourceMap::from_comments(&[
            Comment::new("c1", "we want trees"),
            Comment::new("c2", "plant more trees please"),
        ]);
        let quotes = QuoteIndex::build(&sources, std::iter::empty());
        let mut numberer = ClaimNumberer::new();

        let canonical = Claim::new("c1-0", "Trees", "want trees", "c1");
        let dup = Claim::new("c2-0", "Trees", "more trees", "c2");
        let built = numberer.number_claim(&canonical, &[dup], &quotes);

        assert_eq!(built.quote_ref.as_ref().unwrap().start_idx, 3);
        let dup_ref = built.duplicates[0].quote_ref.as_ref().unwrap();
        assert_eq!(dup_ref.source_id, "c2");
        assert_eq!(dup_ref.start_idx, 6);
        assert_eq!(numberer.number_of("c2-0"), Some(2));
    }
}
