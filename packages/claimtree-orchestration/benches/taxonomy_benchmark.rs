//! Benchmark for taxonomy assembly
//!
//! Measures:
//! - Duplicate nesting per subtopic
//! - Run-wide numbering with quote resolution
//! - Scaling with claims per subtopic

use claimtree_orchestration::{
    nest_claims, Claim, ClaimNumberer, Comment, QuoteIndex, SourceMap, Subtopic,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::collections::BTreeMap;

/// Comments with one sentence each, plus one claim per comment quoting it
fn generate_subtopic(num_claims: usize) -> (Vec<Comment>, Subtopic) {
    let comments: Vec<Comment> = (0..num_claims)
        .map(|i| {
            Comment::new(
                format!("c{}", i),
                format!(
                    "Comment {} says   the bus route {} should run\n every {} minutes",
                    i,
                    i % 17,
                    5 + i % 4
                ),
            )
        })
        .collect();

    let mut subtopic = Subtopic::new("Buses");
    subtopic.claims = comments
        .iter()
        .enumerate()
        .map(|(i, comment)| {
            Claim::new(
                Claim::id_for(&comment.id, 0),
                format!("Route {} needs more frequent service", i % 17),
                format!("the bus route {} should run every", i % 17),
                comment.id.clone(),
            )
        })
        .collect();

    (comments, subtopic)
}

/// Every claim on the same route is grouped under the first one seen
fn generate_nesting(subtopic: &Subtopic) -> BTreeMap<String, Vec<String>> {
    let mut canonical: BTreeMap<&str, String> = BTreeMap::new();
    let mut nesting: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for claim in &subtopic.claims {
        match canonical.get(claim.claim.as_str()) {
            Some(head) => nesting
                .entry(head.clone())
                .or_default()
                .push(claim.claim_id.clone()),
            None => {
                canonical.insert(claim.claim.as_str(), claim.claim_id.clone());
            }
        }
    }
    nesting
}

fn bench_nesting(c: &mut Criterion) {
    let mut group = c.benchmark_group("nest_claims");

    for size in [50, 200, 1000] {
        let (_, subtopic) = generate_subtopic(size);
        let nesting = generate_nesting(&subtopic);

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                let mut target = subtopic.clone();
                nest_claims(&mut target, black_box(&nesting));
                black_box(target.claims.len())
            })
        });
    }

    group.finish();
}

fn bench_numbering(c: &mut Criterion) {
    let mut group = c.benchmark_group("number_claims");

    for size in [50, 200, 1000] {
        let (comments, mut subtopic) = generate_subtopic(size);
        nest_claims(&mut subtopic, &generate_nesting(&subtopic));
        let sources = SourceMap::from_comments(&comments);

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                let quotes = QuoteIndex::build(&sources, subtopic.claims.iter());
                let mut numberer = ClaimNumberer::new();
                let numbered: Vec<Claim> = subtopic
                    .claims
                    .iter()
                    .map(|claim| numberer.number_claim(claim, &claim.duplicates, &quotes))
                    .collect();
                black_box((numbered.len(), numberer.assigned()))
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_nesting, bench_numbering);
criterion_main!(benches);
