//! Benchmarks for rank fusion and end-to-end hybrid search.
//!
//! Hybrid search runs against `MemoryIndex` + `MockEmbedding`, so it measures
//! orchestration and brute-force scoring, not model inference. Set
//! `BENCH_FULL_SCALE=1` to index 10,000 posts instead of 1,000.

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use uuid::Uuid;

use twider_core::types::{PostCreatedEvent, SearchQuery};
use twider_vector::embedding::{DynEmbeddingService, MockEmbedding};
use twider_vector::fusion::{reciprocal_rank_fusion, RRF_K};
use twider_vector::index::MemoryIndex;
use twider_vector::pipeline::IndexingPipeline;
use twider_vector::search::HybridSearcher;

const CI_POST_COUNT: usize = 1_000;
const FULL_SCALE_POST_COUNT: usize = 10_000;

fn post_count() -> usize {
    if std::env::var("BENCH_FULL_SCALE").is_ok() {
        FULL_SCALE_POST_COUNT
    } else {
        CI_POST_COUNT
    }
}

fn generate_post_text(index: usize) -> String {
    let topics = ["rust", "async", "search", "vectors", "streams", "qdrant", "nats"];
    format!(
        "Post {} about {} and {}: shipping the new ingestion service today",
        index,
        topics[index % topics.len()],
        topics[(index / 3) % topics.len()]
    )
}

fn bench_rrf(c: &mut Criterion) {
    let mut group = c.benchmark_group("rrf");

    for depth in [30usize, 200, 1_000] {
        let dense: Vec<Uuid> = (0..depth).map(|i| Uuid::from_u128(i as u128)).collect();
        // Half overlap with the dense list, in reverse order.
        let sparse: Vec<Uuid> = (depth / 2..depth + depth / 2)
            .rev()
            .map(|i| Uuid::from_u128(i as u128))
            .collect();
        let lists = vec![dense, sparse];

        group.bench_function(format!("two_lists_{}", depth), |b| {
            b.iter(|| reciprocal_rank_fusion(black_box(&lists), RRF_K))
        });
    }

    group.finish();
}

fn bench_hybrid_search(c: &mut Criterion) {
    let count = post_count();
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build tokio runtime");

    let index = Arc::new(MemoryIndex::new());
    let embedder: Arc<dyn DynEmbeddingService> = Arc::new(MockEmbedding::new());
    let pipeline = IndexingPipeline::new(index.clone(), embedder.clone(), Default::default());

    let events: Vec<PostCreatedEvent> = (0..count)
        .map(|i| PostCreatedEvent {
            id: Uuid::new_v4(),
            content: generate_post_text(i),
            media_urls: vec![],
        })
        .collect();
    rt.block_on(pipeline.index_events(events))
        .expect("indexing failed");

    let searcher = HybridSearcher::new(index, embedder);
    let query = SearchQuery::new("async search", 0, 15).expect("valid query");

    let mut group = c.benchmark_group("hybrid_search");
    group.sample_size(50);
    group.measurement_time(Duration::from_secs(10));

    group.bench_function(format!("top15_{}posts", count), |b| {
        b.iter(|| {
            let ids = rt.block_on(searcher.search(&query)).expect("search failed");
            assert_eq!(ids.len(), 15);
            ids
        });
    });

    group.finish();
}

criterion_group!(benches, bench_rrf, bench_hybrid_search);
criterion_main!(benches);
