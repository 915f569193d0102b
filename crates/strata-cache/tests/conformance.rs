use std::sync::Arc;

use strata_backend::MemoryFileSystem;
use strata_cache::{
    BlockCacheFileSystem, BlockCacheOptions, MetadataCacheFileSystem, MetadataCacheOptions,
};
use strata_core::Path;
use strata_testing::run_universal_suite;

fn p(s: &str) -> Path {
    s.parse().unwrap()
}

#[tokio::test]
async fn metadata_cache_conformance() {
    let cache = MetadataCacheFileSystem::new(
        Arc::new(MemoryFileSystem::new()),
        Arc::new(MemoryFileSystem::new()),
        p("/meta"),
        MetadataCacheOptions::default(),
    );
    run_universal_suite(Arc::new(cache)).await;
}

#[tokio::test]
async fn block_cache_conformance() {
    let cache = BlockCacheFileSystem::new(
        Arc::new(MemoryFileSystem::new()),
        Arc::new(MemoryFileSystem::new()),
        p("/blocks"),
        BlockCacheOptions {
            block_size: 8,
            read_ahead_blocks: 2,
            enable_read_ahead: true,
        },
    );
    run_universal_suite(Arc::new(cache)).await;
}

#[tokio::test]
async fn stacked_caches_conformance() {
    // Metadata cache over block cache over memory, the shape the blueprint
    // engine typically wires.
    let origin = Arc::new(MemoryFileSystem::new());
    let blocks = BlockCacheFileSystem::new(
        origin,
        Arc::new(MemoryFileSystem::new()),
        p("/blocks"),
        BlockCacheOptions {
            block_size: 16,
            read_ahead_blocks: 1,
            enable_read_ahead: false,
        },
    );
    let meta = MetadataCacheFileSystem::new(
        Arc::new(blocks),
        Arc::new(MemoryFileSystem::new()),
        p("/meta"),
        MetadataCacheOptions::default(),
    );
    run_universal_suite(Arc::new(meta)).await;
}
