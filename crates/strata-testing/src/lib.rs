//! Conformance suite applied to every backend.
//!
//! Each check runs in its own subtree of a fresh file system, so the whole
//! suite can run against one instance. Backends call [`run_universal_suite`]
//! from an integration test; stacked backends (alias, union, caches) run it
//! through their own decoration to prove the contract survives composition.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt as _;

use strata_core::helpers::collect;
use strata_core::{
    Context, CopyOptions, CreateDirectoryOptions, DeleteOptions, FileSystem, FsError, ListOptions,
    Path, ReadOptions, WriteOptions,
};

fn p(s: &str) -> Path {
    s.parse().expect("test path")
}

pub async fn run_universal_suite(fs: Arc<dyn FileSystem>) {
    stat_tracks_create_and_delete(fs.as_ref()).await;
    write_read_round_trip(fs.as_ref()).await;
    overwrite_semantics(fs.as_ref()).await;
    append_semantics(fs.as_ref()).await;
    create_directory_semantics(fs.as_ref()).await;
    delete_semantics(fs.as_ref()).await;
    list_semantics(fs.as_ref()).await;
    copy_file_overwrite_rules(fs.as_ref()).await;
    copy_directory_preserves_bytes(fs.as_ref()).await;
    ranged_reads(fs.as_ref()).await;
}

pub async fn stat_tracks_create_and_delete(fs: &dyn FileSystem) {
    let ctx = Context::new();
    let file = p("/t1/f");
    fs.create_directory(&ctx, &p("/t1"), CreateDirectoryOptions::default())
        .await
        .unwrap();

    assert!(fs.stat(&ctx, &file).await.unwrap().is_none());
    assert!(!fs.exists(&ctx, &file).await.unwrap());

    fs.write_bytes(&ctx, &file, Bytes::from_static(b"x"), WriteOptions::default())
        .await
        .unwrap();
    let status = fs.stat(&ctx, &file).await.unwrap().expect("created file");
    assert!(!status.is_directory);
    assert_eq!(status.size, Some(1));
    assert_eq!(status.path, file);
    assert!(fs.exists(&ctx, &file).await.unwrap());

    fs.delete(&ctx, &file, DeleteOptions::default()).await.unwrap();
    assert!(fs.stat(&ctx, &file).await.unwrap().is_none());
}

pub async fn write_read_round_trip(fs: &dyn FileSystem) {
    let ctx = Context::new();
    fs.create_directory(&ctx, &p("/t2"), CreateDirectoryOptions::default())
        .await
        .unwrap();
    let file = p("/t2/data.bin");
    let payload = Bytes::from((0u8..=255).collect::<Vec<_>>());

    fs.write_bytes(&ctx, &file, payload.clone(), WriteOptions::default())
        .await
        .unwrap();
    let back = fs.read_bytes(&ctx, &file, ReadOptions::default()).await.unwrap();
    assert_eq!(back, payload);
}

pub async fn overwrite_semantics(fs: &dyn FileSystem) {
    let ctx = Context::new();
    fs.create_directory(&ctx, &p("/t3"), CreateDirectoryOptions::default())
        .await
        .unwrap();
    let file = p("/t3/f");

    fs.write_bytes(&ctx, &file, Bytes::from_static(b"one"), WriteOptions::default())
        .await
        .unwrap();

    let err = fs
        .write_bytes(&ctx, &file, Bytes::from_static(b"two"), WriteOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::AlreadyExists { .. }), "{err:?}");

    fs.write_bytes(&ctx, &file, Bytes::from_static(b"two"), WriteOptions::overwrite())
        .await
        .unwrap();
    let back = fs.read_bytes(&ctx, &file, ReadOptions::default()).await.unwrap();
    assert_eq!(&back[..], b"two");
}

pub async fn append_semantics(fs: &dyn FileSystem) {
    let ctx = Context::new();
    fs.create_directory(&ctx, &p("/t4"), CreateDirectoryOptions::default())
        .await
        .unwrap();
    let file = p("/t4/log");

    fs.write_bytes(&ctx, &file, Bytes::from_static(b"first"), WriteOptions::default())
        .await
        .unwrap();
    fs.write_bytes(&ctx, &file, Bytes::from_static(b"|second"), WriteOptions::append())
        .await
        .unwrap();
    let back = fs.read_bytes(&ctx, &file, ReadOptions::default()).await.unwrap();
    assert_eq!(&back[..], b"first|second");
}

pub async fn create_directory_semantics(fs: &dyn FileSystem) {
    let ctx = Context::new();
    let dir = p("/t5/dir");
    fs.create_directory(&ctx, &p("/t5"), CreateDirectoryOptions::default())
        .await
        .unwrap();
    fs.create_directory(&ctx, &dir, CreateDirectoryOptions::default())
        .await
        .unwrap();

    let err = fs
        .create_directory(&ctx, &dir, CreateDirectoryOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::AlreadyExists { .. }), "{err:?}");

    let file = p("/t5/file");
    fs.write_bytes(&ctx, &file, Bytes::from_static(b"x"), WriteOptions::default())
        .await
        .unwrap();
    let err = fs
        .create_directory(&ctx, &file, CreateDirectoryOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::AlreadyExists { .. }), "{err:?}");

    // Missing ancestors without create_parents fail; with it they all appear.
    let deep = p("/t5/a/b/c");
    assert!(
        fs.create_directory(&ctx, &deep, CreateDirectoryOptions::default())
            .await
            .is_err()
    );
    fs.create_directory(&ctx, &deep, CreateDirectoryOptions::create_parents())
        .await
        .unwrap();
    for ancestor in ["/t5/a", "/t5/a/b", "/t5/a/b/c"] {
        let status = fs.stat(&ctx, &p(ancestor)).await.unwrap().expect("ancestor");
        assert!(status.is_directory);
    }
}

pub async fn delete_semantics(fs: &dyn FileSystem) {
    let ctx = Context::new();
    fs.create_directory(&ctx, &p("/t6/sub"), CreateDirectoryOptions::create_parents())
        .await
        .unwrap();
    fs.write_bytes(&ctx, &p("/t6/f"), Bytes::from_static(b"x"), WriteOptions::default())
        .await
        .unwrap();
    fs.write_bytes(&ctx, &p("/t6/sub/g"), Bytes::from_static(b"y"), WriteOptions::default())
        .await
        .unwrap();

    let err = fs
        .delete(&ctx, &p("/t6"), DeleteOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::NotEmptyDirectory { .. }), "{err:?}");

    fs.delete(&ctx, &p("/t6"), DeleteOptions::recursive())
        .await
        .unwrap();
    for gone in ["/t6", "/t6/f", "/t6/sub", "/t6/sub/g"] {
        assert!(fs.stat(&ctx, &p(gone)).await.unwrap().is_none(), "{gone}");
    }
}

pub async fn list_semantics(fs: &dyn FileSystem) {
    let ctx = Context::new();
    fs.create_directory(&ctx, &p("/t7/empty"), CreateDirectoryOptions::create_parents())
        .await
        .unwrap();
    fs.create_directory(&ctx, &p("/t7/nested"), CreateDirectoryOptions::default())
        .await
        .unwrap();
    fs.write_bytes(&ctx, &p("/t7/f"), Bytes::from_static(b"x"), WriteOptions::default())
        .await
        .unwrap();
    fs.write_bytes(&ctx, &p("/t7/nested/g"), Bytes::from_static(b"y"), WriteOptions::default())
        .await
        .unwrap();

    let err = fs
        .list(&ctx, &p("/t7/f"), ListOptions::default())
        .await
        .err()
        .expect("list on a file fails");
    assert!(matches!(err, FsError::NotADirectory { .. }), "{err:?}");

    let err = fs
        .list(&ctx, &p("/t7/missing"), ListOptions::default())
        .await
        .err()
        .expect("list on a missing path fails");
    assert!(matches!(err, FsError::NotFound { .. }), "{err:?}");

    let empty = collect(fs.list(&ctx, &p("/t7/empty"), ListOptions::default()).await.unwrap())
        .await
        .unwrap();
    assert!(empty.is_empty());

    // Every emitted child names its listed directory as parent.
    let direct = collect(fs.list(&ctx, &p("/t7"), ListOptions::default()).await.unwrap())
        .await
        .unwrap();
    for status in &direct {
        assert_eq!(status.path.parent().unwrap(), p("/t7"));
    }

    let mut all: Vec<_> = collect(
        fs.list(&ctx, &p("/t7"), ListOptions::recursive()).await.unwrap(),
    )
    .await
    .unwrap()
    .into_iter()
    .map(|s| s.path.to_string())
    .collect();
    all.sort();
    let deduped: Vec<_> = {
        let mut d = all.clone();
        d.dedup();
        d
    };
    assert_eq!(all, deduped, "recursive listing repeated an entry");
    assert_eq!(
        all,
        ["/t7/empty", "/t7/f", "/t7/nested", "/t7/nested/g"]
    );
}

pub async fn copy_file_overwrite_rules(fs: &dyn FileSystem) {
    let ctx = Context::new();
    fs.create_directory(&ctx, &p("/t8"), CreateDirectoryOptions::default())
        .await
        .unwrap();
    fs.write_bytes(&ctx, &p("/t8/a"), Bytes::from_static(b"a"), WriteOptions::default())
        .await
        .unwrap();
    fs.write_bytes(&ctx, &p("/t8/b"), Bytes::from_static(b"b"), WriteOptions::default())
        .await
        .unwrap();

    let err = fs
        .copy(&ctx, &p("/t8/a"), &p("/t8/b"), CopyOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::AlreadyExists { .. }), "{err:?}");

    fs.copy(
        &ctx,
        &p("/t8/a"),
        &p("/t8/b"),
        CopyOptions {
            overwrite: true,
            recursive: false,
        },
    )
    .await
    .unwrap();
    let back = fs.read_bytes(&ctx, &p("/t8/b"), ReadOptions::default()).await.unwrap();
    assert_eq!(&back[..], b"a");
}

pub async fn copy_directory_preserves_bytes(fs: &dyn FileSystem) {
    let ctx = Context::new();
    fs.create_directory(&ctx, &p("/t9/src/sub"), CreateDirectoryOptions::create_parents())
        .await
        .unwrap();
    fs.write_bytes(&ctx, &p("/t9/src/one"), Bytes::from_static(b"1111"), WriteOptions::default())
        .await
        .unwrap();
    fs.write_bytes(&ctx, &p("/t9/src/sub/two"), Bytes::from_static(b"22"), WriteOptions::default())
        .await
        .unwrap();

    // Directory copy without recursive is refused.
    let err = fs
        .copy(&ctx, &p("/t9/src"), &p("/t9/dst"), CopyOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::RecursiveNotSpecified { .. }), "{err:?}");

    fs.copy(
        &ctx,
        &p("/t9/src"),
        &p("/t9/dst"),
        CopyOptions {
            overwrite: false,
            recursive: true,
        },
    )
    .await
    .unwrap();

    for (rel, expected) in [("one", &b"1111"[..]), ("sub/two", &b"22"[..])] {
        let copied = fs
            .read_bytes(&ctx, &p(&format!("/t9/dst/{rel}")), ReadOptions::default())
            .await
            .unwrap();
        assert_eq!(&copied[..], expected, "{rel}");
    }
}

pub async fn ranged_reads(fs: &dyn FileSystem) {
    let ctx = Context::new();
    fs.create_directory(&ctx, &p("/t10"), CreateDirectoryOptions::default())
        .await
        .unwrap();
    let file = p("/t10/digits");
    fs.write_bytes(&ctx, &file, Bytes::from_static(b"0123456789"), WriteOptions::default())
        .await
        .unwrap();

    let window = fs
        .read_bytes(&ctx, &file, ReadOptions::range(2, 8))
        .await
        .unwrap();
    assert_eq!(&window[..], b"234567");

    let tail = fs
        .read_bytes(
            &ctx,
            &file,
            ReadOptions {
                start: Some(7),
                end: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(&tail[..], b"789");

    assert!(
        fs.read_bytes(&ctx, &file, ReadOptions::range(5, 11)).await.is_err(),
        "out-of-range read must fail"
    );
}

/// Streaming sanity: a consumer that stops early must not wedge the
/// producer, and a cancelled context surfaces as a cancellation error.
pub async fn streaming_cancellation(fs: &dyn FileSystem) {
    let ctx = Context::new();
    fs.create_directory(&ctx, &p("/t11"), CreateDirectoryOptions::default())
        .await
        .unwrap();
    fs.write_bytes(
        &ctx,
        &p("/t11/big"),
        Bytes::from(vec![7u8; 1 << 16]),
        WriteOptions::default(),
    )
    .await
    .unwrap();

    let mut stream = fs
        .open_read(&ctx, &p("/t11/big"), ReadOptions::default())
        .await
        .unwrap();
    let first = stream.next().await.expect("one chunk").unwrap();
    assert!(!first.is_empty());
    drop(stream);

    ctx.cancel();
    let err = fs
        .read_bytes(&ctx, &p("/t11/big"), ReadOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err, FsError::Cancelled);
}
