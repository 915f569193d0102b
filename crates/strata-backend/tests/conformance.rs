use std::sync::Arc;

use strata_backend::{
    AliasFileSystem, LocalFileSystem, MemoryFileSystem, UnionFileSystem, UnionItem,
};
use strata_core::{Context, CreateDirectoryOptions, FileSystem, Path};
use strata_testing::{run_universal_suite, streaming_cancellation};

#[tokio::test]
async fn memory_backend_conformance() {
    run_universal_suite(Arc::new(MemoryFileSystem::new())).await;
}

#[tokio::test]
async fn local_backend_conformance() {
    let dir = tempfile::tempdir().unwrap();
    run_universal_suite(Arc::new(LocalFileSystem::new(dir.path()).unwrap())).await;
}

#[tokio::test]
async fn alias_backend_conformance() {
    let inner = Arc::new(MemoryFileSystem::new());
    let ctx = Context::new();
    let base: Path = "/base".parse().unwrap();
    inner
        .create_directory(&ctx, &base, CreateDirectoryOptions::default())
        .await
        .unwrap();
    run_universal_suite(Arc::new(AliasFileSystem::new(inner, base))).await;
}

#[tokio::test]
async fn union_backend_conformance() {
    let union = UnionFileSystem::new(vec![UnionItem {
        fs: Arc::new(MemoryFileSystem::new()),
        mount_path: Path::root(),
        priority: 0,
        read_only: false,
    }]);
    run_universal_suite(Arc::new(union)).await;
}

#[tokio::test]
async fn streaming_backends_handle_cancellation() {
    streaming_cancellation(&MemoryFileSystem::new()).await;

    let dir = tempfile::tempdir().unwrap();
    streaming_cancellation(&LocalFileSystem::new(dir.path()).unwrap()).await;
}
