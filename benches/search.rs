use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use doc_vault::config::IndexSettings;
use doc_vault::database::SimilarityIndex;
use doc_vault::embeddings::HashingEmbedder;
use std::hint::black_box;

const DIMENSION: usize = 256;

fn build_index(embedder: &HashingEmbedder, size: usize) -> SimilarityIndex {
    let mut index = SimilarityIndex::initialize(DIMENSION, size, &IndexSettings::default());
    for id in 0..size {
        let text = format!("document {id} about topic {} and subject {}", id % 37, id % 11);
        let vector = embedder.embed_sync(&text).expect("can embed");
        index
            .add(i64::try_from(id).expect("id fits"), vector)
            .expect("can add");
    }
    index
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let embedder = HashingEmbedder::new(DIMENSION);
    let query = embedder
        .embed_sync("document about topic 12 and subject 3")
        .expect("can embed");

    let mut group = c.benchmark_group("index_search");
    for size in [1_000, 10_000] {
        let index = build_index(&embedder, size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &index, |b, index| {
            b.iter(|| index.search(black_box(&query), 10));
        });
    }
    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
