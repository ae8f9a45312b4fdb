//! Benchmarks for the hot paths on the store/consolidate critical path.
//! Run with: cargo bench -p memvault-core

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use memvault_core::embeddings::cosine_similarity;
use memvault_core::facade::{normalize_tags, TagsInput};
use memvault_core::model::{split_content, ChunkPolicy};
use memvault_core::time::parse_time_range;

fn bench_cosine_similarity(c: &mut Criterion) {
    let a: Vec<f32> = (0..384).map(|i| (i as f32).sin()).collect();
    let b: Vec<f32> = (0..384).map(|i| (i as f32).cos()).collect();

    c.bench_function("cosine_similarity_384d", |bench| {
        bench.iter(|| black_box(cosine_similarity(&a, &b)));
    });
}

fn bench_parse_time_range(c: &mut Criterion) {
    let now = Utc::now();

    c.bench_function("parse_time_range_last_3_weeks", |bench| {
        bench.iter(|| black_box(parse_time_range("last 3 weeks", now)));
    });
}

fn bench_split_content(c: &mut Criterion) {
    let content = "Lorem ipsum dolor sit amet, consectetur adipiscing elit. ".repeat(400);
    let policy = ChunkPolicy::cloud();

    c.bench_function("split_content_22kb", |bench| {
        bench.iter(|| black_box(split_content(&content, &policy)));
    });
}

fn bench_normalize_tags(c: &mut Criterion) {
    let tags: Vec<String> = (0..50).map(|i| format!(" Tag-{} ", i % 10)).collect();

    c.bench_function("normalize_tags_50_with_dupes", |bench| {
        bench.iter(|| black_box(normalize_tags(TagsInput::Many(tags.clone()))));
    });
}

criterion_group!(benches, bench_cosine_similarity, bench_parse_time_range, bench_split_content, bench_normalize_tags);
criterion_main!(benches);
