//! Wire-level tests for both front-ends over a memory backend.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use reqwest::StatusCode;

use strata_backend::MemoryFileSystem;
use strata_core::{
    Context, CreateDirectoryOptions, FileSystem, Path, ReadOptions, WriteOptions,
};
use strata_http::{DavAuthConfig, serve_http, serve_webdav};

fn p(s: &str) -> Path {
    s.parse().unwrap()
}

fn addr() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

async fn seeded_backend() -> Arc<MemoryFileSystem> {
    let fs = Arc::new(MemoryFileSystem::new());
    let ctx = Context::new();
    fs.create_directory(&ctx, &p("/data"), CreateDirectoryOptions::default())
        .await
        .unwrap();
    fs.write_bytes(
        &ctx,
        &p("/config.json"),
        Bytes::from_static(b"{\"on\":1}"),
        WriteOptions::default(),
    )
    .await
    .unwrap();
    fs
}

#[tokio::test]
async fn http_browse_serves_json_listing() {
    let backend = seeded_backend().await;
    let server = serve_http(backend, addr()).await.unwrap();
    let base = format!("http://{}", server.local_addr);

    let response = reqwest::Client::new()
        .get(format!("{base}/"))
        .header("accept", "application/json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let listing: serde_json::Value = response.json().await.unwrap();
    assert_eq!(listing["path"], "/");
    let files = listing["files"].as_array().unwrap();
    assert_eq!(files.len(), 2);
    assert_eq!(files[0]["name"], "config.json");
    assert_eq!(files[0]["isDirectory"], false);
    assert_eq!(files[0]["size"], 8);
    assert_eq!(files[1]["name"], "data");
    assert_eq!(files[1]["isDirectory"], true);

    server.stop().await;
}

#[tokio::test]
async fn http_browse_handles_ranges() {
    let backend = Arc::new(MemoryFileSystem::new());
    let ctx = Context::new();
    backend
        .write_bytes(&ctx, &p("/digits"), Bytes::from_static(b"0123456789"), WriteOptions::default())
        .await
        .unwrap();
    let server = serve_http(backend, addr()).await.unwrap();
    let base = format!("http://{}", server.local_addr);
    let client = reqwest::Client::new();

    let full = client.get(format!("{base}/digits")).send().await.unwrap();
    assert_eq!(full.status(), StatusCode::OK);
    assert_eq!(full.bytes().await.unwrap().as_ref(), b"0123456789");

    let window = client
        .get(format!("{base}/digits"))
        .header("range", "bytes=2-7")
        .send()
        .await
        .unwrap();
    assert_eq!(window.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        window.headers().get("content-range").unwrap(),
        "bytes 2-7/10"
    );
    assert_eq!(window.bytes().await.unwrap().as_ref(), b"234567");

    let suffix = client
        .get(format!("{base}/digits"))
        .header("range", "bytes=-3")
        .send()
        .await
        .unwrap();
    assert_eq!(suffix.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(suffix.bytes().await.unwrap().as_ref(), b"789");

    let invalid = client
        .get(format!("{base}/digits"))
        .header("range", "bytes=40-50")
        .send()
        .await
        .unwrap();
    assert_eq!(invalid.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(
        invalid.headers().get("content-range").unwrap(),
        "bytes */10"
    );

    server.stop().await;
}

#[tokio::test]
async fn http_browse_rejects_non_get() {
    let backend = seeded_backend().await;
    let server = serve_http(backend, addr()).await.unwrap();
    let base = format!("http://{}", server.local_addr);

    let response = reqwest::Client::new()
        .post(format!("{base}/config.json"))
        .body("x")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    server.stop().await;
}

#[tokio::test]
async fn webdav_propfind_depth1_multistatus() {
    let backend = seeded_backend().await;
    let server = serve_webdav(backend, addr(), None).await.unwrap();
    let base = format!("http://{}", server.local_addr);

    let response = reqwest::Client::new()
        .request(
            reqwest::Method::from_bytes(b"PROPFIND").unwrap(),
            format!("{base}/"),
        )
        .header("depth", "1")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 207);

    let body = response.text().await.unwrap();
    assert_eq!(body.matches("<d:response>").count(), 3);
    assert!(body.contains("<d:href>/</d:href>"), "{body}");
    assert!(body.contains("<d:href>/data/</d:href>"), "{body}");
    assert!(body.contains("<d:collection/>"), "{body}");
    assert!(body.contains("<d:href>/config.json</d:href>"), "{body}");
    assert!(
        body.contains("<d:getcontentlength>8</d:getcontentlength>"),
        "{body}"
    );

    server.stop().await;
}

#[tokio::test]
async fn webdav_write_flow() {
    let backend = seeded_backend().await;
    let server = serve_webdav(backend.clone(), addr(), None).await.unwrap();
    let base = format!("http://{}", server.local_addr);
    let client = reqwest::Client::new();

    // PUT creates the file.
    let put = client
        .put(format!("{base}/data/new.txt"))
        .body("uploaded")
        .send()
        .await
        .unwrap();
    assert_eq!(put.status(), StatusCode::CREATED);
    let ctx = Context::new();
    let stored = backend
        .read_bytes(&ctx, &p("/data/new.txt"), ReadOptions::default())
        .await
        .unwrap();
    assert_eq!(stored.as_ref(), b"uploaded");

    // MKCOL creates a collection; repeating it is 405.
    let mkcol = reqwest::Method::from_bytes(b"MKCOL").unwrap();
    let created = client
        .request(mkcol.clone(), format!("{base}/newdir"))
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);
    let repeated = client
        .request(mkcol, format!("{base}/newdir"))
        .send()
        .await
        .unwrap();
    assert_eq!(repeated.status(), StatusCode::METHOD_NOT_ALLOWED);

    // COPY with Destination, then DELETE the original.
    let copy = client
        .request(
            reqwest::Method::from_bytes(b"COPY").unwrap(),
            format!("{base}/data/new.txt"),
        )
        .header("destination", format!("{base}/newdir/copy.txt"))
        .send()
        .await
        .unwrap();
    assert_eq!(copy.status(), StatusCode::CREATED);

    let delete = client
        .delete(format!("{base}/data/new.txt"))
        .send()
        .await
        .unwrap();
    assert_eq!(delete.status(), StatusCode::NO_CONTENT);
    assert!(!backend.exists(&ctx, &p("/data/new.txt")).await.unwrap());
    assert!(backend.exists(&ctx, &p("/newdir/copy.txt")).await.unwrap());

    // MOVE with Overwrite: F against an existing target is a conflict.
    let moved = client
        .request(
            reqwest::Method::from_bytes(b"MOVE").unwrap(),
            format!("{base}/newdir/copy.txt"),
        )
        .header("destination", format!("{base}/config.json"))
        .header("overwrite", "F")
        .send()
        .await
        .unwrap();
    assert_eq!(moved.status(), StatusCode::CONFLICT);

    server.stop().await;
}

#[tokio::test]
async fn webdav_get_head_and_options() {
    let backend = seeded_backend().await;
    let server = serve_webdav(backend, addr(), None).await.unwrap();
    let base = format!("http://{}", server.local_addr);
    let client = reqwest::Client::new();

    let options = client
        .request(reqwest::Method::OPTIONS, format!("{base}/"))
        .send()
        .await
        .unwrap();
    assert_eq!(options.status(), StatusCode::OK);
    assert_eq!(options.headers().get("dav").unwrap(), "1, 2");
    assert!(options.headers().get("allow").is_some());

    let head = client
        .head(format!("{base}/config.json"))
        .send()
        .await
        .unwrap();
    assert_eq!(head.status(), StatusCode::OK);
    assert_eq!(head.headers().get("content-length").unwrap(), "8");

    let ranged = client
        .get(format!("{base}/config.json"))
        .header("range", "bytes=0-2")
        .send()
        .await
        .unwrap();
    assert_eq!(ranged.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(ranged.bytes().await.unwrap().as_ref(), b"{\"o");

    let unknown = client
        .request(
            reqwest::Method::from_bytes(b"BREW").unwrap(),
            format!("{base}/"),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert!(unknown.headers().get("allow").is_some());

    server.stop().await;
}

#[tokio::test]
async fn webdav_basic_auth_gate() {
    let backend = seeded_backend().await;
    let auth = DavAuthConfig {
        username: "alice".to_string(),
        password: "secret".to_string(),
        allow_basic: true,
        allow_digest: true,
    };
    let server = serve_webdav(backend, addr(), Some(auth)).await.unwrap();
    let base = format!("http://{}", server.local_addr);
    let client = reqwest::Client::new();

    let denied = client.get(format!("{base}/config.json")).send().await.unwrap();
    assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);
    let challenges: Vec<_> = denied
        .headers()
        .get_all("www-authenticate")
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect();
    assert!(challenges.iter().any(|c| c.starts_with("Basic ")));
    assert!(challenges.iter().any(|c| c.starts_with("Digest ")));

    let allowed = client
        .get(format!("{base}/config.json"))
        .basic_auth("alice", Some("secret"))
        .send()
        .await
        .unwrap();
    assert_eq!(allowed.status(), StatusCode::OK);

    let wrong = client
        .get(format!("{base}/config.json"))
        .basic_auth("alice", Some("nope"))
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    server.stop().await;
}

#[tokio::test]
async fn webdav_client_talks_to_webdav_frontend() {
    // The in-repo WebDAV backend as a client of the in-repo front-end.
    let backend = seeded_backend().await;
    let server = serve_webdav(backend, addr(), None).await.unwrap();
    let base_url = url::Url::parse(&format!("http://{}/", server.local_addr)).unwrap();

    let remote = strata_webdav::WebdavFileSystem::new(strata_webdav::WebdavConfig {
        base_url,
        credentials: None,
        bearer_token: None,
        http_options: strata_webdav::HttpOptions::default(),
    })
    .unwrap();

    let ctx = Context::new();
    let status = remote.stat(&ctx, &p("/config.json")).await.unwrap().unwrap();
    assert!(!status.is_directory);
    assert_eq!(status.size, Some(8));

    let children = strata_core::helpers::collect(
        remote
            .list(&ctx, &Path::root(), strata_core::ListOptions::default())
            .await
            .unwrap(),
    )
    .await
    .unwrap();
    assert_eq!(children.len(), 2);

    let data = remote
        .read_bytes(&ctx, &p("/config.json"), ReadOptions::range(0, 3))
        .await
        .unwrap();
    assert_eq!(data.as_ref(), b"{\"o");

    remote
        .write_bytes(&ctx, &p("/via-client.txt"), Bytes::from_static(b"hi"), WriteOptions::default())
        .await
        .unwrap();
    let back = remote
        .read_bytes(&ctx, &p("/via-client.txt"), ReadOptions::default())
        .await
        .unwrap();
    assert_eq!(back.as_ref(), b"hi");

    server.stop().await;
}
