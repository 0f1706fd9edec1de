//! Aggregation and splitting benchmarks
//!
//! Measures performance of:
//! - Reciprocal Rank Fusion over several retriever lists
//! - Score-based re-ranking
//! - Document splitting

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ragrail_core::rag::{rank_by_score, reciprocal_rank_fuse, DocumentSplitter, TextSegment, RRF_K};
use ragrail_core::Content;

/// `lists` lists of `per_list` contents, half of them shared between lists
fn retriever_lists(lists: usize, per_list: usize) -> Vec<Vec<Content>> {
    (0..lists)
        .map(|l| {
            (0..per_list)
                .map(|i| {
                    if i % 2 == 0 {
                        Content::new(format!("shared segment {}", i))
                    } else {
                        Content::new(format!("list {} segment {}", l, i))
                    }
                })
                .collect()
        })
        .collect()
}

fn bench_rrf(c: &mut Criterion) {
    let mut group = c.benchmark_group("reciprocal_rank_fuse");

    for (lists, per_list) in [(2, 10), (4, 50), (8, 200)] {
        let input = retriever_lists(lists, per_list);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}x{}", lists, per_list)),
            &input,
            |b, input| b.iter(|| reciprocal_rank_fuse(black_box(input), RRF_K)),
        );
    }

    group.finish();
}

fn bench_rank_by_score(c: &mut Criterion) {
    let contents: Vec<Content> = retriever_lists(1, 500).remove(0);
    let scores: Vec<f64> = (0..contents.len())
        .map(|i| ((i * 7919) % 1000) as f64 / 1000.0)
        .collect();

    c.bench_function("rank_by_score_500", |b| {
        b.iter(|| {
            rank_by_score(
                black_box(contents.clone()),
                black_box(scores.clone()),
                0.5,
                Some(10),
            )
        })
    });
}

fn bench_split(c: &mut Criterion) {
    let paragraph = "Rust is a systems programming language focused on safety, speed, and concurrency. \
                     Ownership enables memory safety guarantees without a garbage collector.";
    let document = TextSegment::new(vec![paragraph; 200].join("\n\n"));

    let mut group = c.benchmark_group("document_splitter");
    for max in [100, 300, 1000] {
        let splitter = DocumentSplitter::new(max, max / 10);
        group.bench_with_input(BenchmarkId::from_parameter(max), &document, |b, doc| {
            b.iter(|| splitter.split(black_box(doc)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_rrf, bench_rank_by_score, bench_split);
criterion_main!(benches);
