//! Whole-stack test: blueprint -> engine -> stacked backends -> front-ends.

use strata_engine::Engine;

fn engine() -> Engine {
    let mut engine = Engine::new();
    for provider in strata_engine::backend_providers() {
        engine.register(provider);
    }
    for provider in strata_http::frontend_providers() {
        engine.register(provider);
    }
    engine
}

#[tokio::test]
async fn blueprint_stack_serves_reads_and_writes() {
    let data_dir = tempfile::tempdir().unwrap();
    std::fs::write(data_dir.path().join("hello.txt"), b"hello from disk").unwrap();

    let blueprint = format!(
        r#"
- name: disk
  type: backend.local
  config:
    baseDir: {}
- name: scratch
  type: backend.memory
- name: cache-store
  type: backend.memory
- name: cached-disk
  type: backend.metadata_cache
  config:
    originBackend: disk
    cacheBackend: cache-store
    cacheDir: /meta
    maxCacheAge: 5m
- name: blocks
  type: backend.block_cache
  config:
    originBackend: cached-disk
    cacheBackend: cache-store
    cacheDir: /blocks
    blockSize: 8
- name: root
  type: backend.union
  config:
    items:
      - backend: blocks
        mountPath: /
        readOnly: true
      - backend: scratch
        mountPath: /scratch
- name: web
  type: frontend.http
  config:
    backend: root
    address: 127.0.0.1
    port: 0
- name: dav
  type: frontend.webdav
  config:
    backend: root
    address: 127.0.0.1
    port: 0
"#,
        data_dir.path().display()
    );

    let specs = strata_config::parse_blueprint_yaml(&blueprint).unwrap();
    let mut engine = engine();
    engine.check(&specs).unwrap();
    engine.load(&specs).await.unwrap();

    let addrs = engine.frontend_addrs();
    assert_eq!(addrs.len(), 2);
    let web = addrs.iter().find(|(name, _)| name == "web").unwrap().1;
    let dav = addrs.iter().find(|(name, _)| name == "dav").unwrap().1;
    let client = reqwest::Client::new();

    // Disk content shows through the cache stack, ranged.
    let hello = client
        .get(format!("http://{web}/hello.txt"))
        .header("range", "bytes=0-4")
        .send()
        .await
        .unwrap();
    assert_eq!(hello.status().as_u16(), 206);
    assert_eq!(hello.bytes().await.unwrap().as_ref(), b"hello");

    // The read-only mount refuses writes; the scratch mount takes them.
    let denied = client
        .put(format!("http://{dav}/blocked.txt"))
        .body("x")
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status().as_u16(), 403);

    let accepted = client
        .put(format!("http://{dav}/scratch/note.txt"))
        .body("from webdav")
        .send()
        .await
        .unwrap();
    assert_eq!(accepted.status().as_u16(), 201);

    let note = client
        .get(format!("http://{web}/scratch/note.txt"))
        .send()
        .await
        .unwrap();
    assert_eq!(note.bytes().await.unwrap().as_ref(), b"from webdav");

    engine.dispose().await;
}
