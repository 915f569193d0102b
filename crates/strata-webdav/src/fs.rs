use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt as _;
use futures_util::stream;
use reqwest::header::{CONTENT_TYPE, WWW_AUTHENTICATE};
use reqwest::{Method, StatusCode};
use tracing::debug;
use url::Url;

use strata_core::fs::{ByteStream, StatusStream, WriteSink};
use strata_core::helpers;
use strata_core::{
    Context, FileStatus, FileSystem, FsError, FsResult, ListOptions, Path, ReadOptions, WriteMode,
    WriteOptions,
};

use crate::auth::{self, DigestChallenge, DigestQop};
use crate::xml;

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:propfind xmlns:D="DAV:">
  <D:prop>
    <D:displayname/>
    <D:resourcetype/>
    <D:getcontentlength/>
    <D:getcontenttype/>
    <D:getlastmodified/>
  </D:prop>
</D:propfind>
"#;

#[derive(Debug, Clone)]
pub struct WebdavCredentials {
    pub username: String,
    pub password: String,
}

/// Per-backend HTTP timeouts, enforced even when the caller carries no
/// deadline.
#[derive(Debug, Clone, Copy)]
pub struct HttpOptions {
    pub connect_timeout: Duration,
    pub send_timeout: Duration,
    pub receive_timeout: Duration,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_secs(60),
            receive_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebdavConfig {
    pub base_url: Url,
    pub credentials: Option<WebdavCredentials>,
    pub bearer_token: Option<String>,
    pub http_options: HttpOptions,
}

pub(crate) fn redact_url(url: &Url) -> String {
    let mut redacted = url.clone();
    let _ = redacted.set_username("");
    let _ = redacted.set_password(None);
    redacted.set_query(None);
    redacted.set_fragment(None);
    redacted.to_string()
}

/// Remote file system speaking WebDAV over HTTP.
///
/// Auth is Basic or Bearer preemptively; a 401 carrying a Digest challenge
/// seeds the digest state and the original request is retried exactly once.
#[derive(Clone)]
pub struct WebdavFileSystem {
    http: reqwest::Client,
    base_url: Url,
    credentials: Option<WebdavCredentials>,
    bearer_token: Option<String>,
    digest: Arc<Mutex<Option<DigestChallenge>>>,
}

/// A rebuildable request: byte bodies only, so the 401 retry can resend it.
struct WireRequest {
    method: Method,
    url: Url,
    headers: Vec<(&'static str, String)>,
    body: Option<Bytes>,
}

impl WireRequest {
    fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: None,
        }
    }

    fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }
}

impl WebdavFileSystem {
    pub fn new(config: WebdavConfig) -> FsResult<Self> {
        let WebdavConfig {
            mut base_url,
            credentials,
            bearer_token,
            http_options,
        } = config;

        if !base_url.path().ends_with('/') {
            base_url.set_path(&format!("{}/", base_url.path()));
        }

        let http = reqwest::Client::builder()
            .connect_timeout(http_options.connect_timeout)
            .read_timeout(http_options.receive_timeout)
            .timeout(http_options.send_timeout + http_options.receive_timeout)
            .build()
            .map_err(|e| FsError::io_message(format!("http client: {e}")))?;

        Ok(Self {
            http,
            base_url,
            credentials,
            bearer_token,
            digest: Arc::new(Mutex::new(None)),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url_for(&self, path: &Path, directory: bool) -> FsResult<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| FsError::io_message("base url cannot be a base"))?;
            segments.pop_if_empty();
            for segment in path.segments() {
                segments.push(segment);
            }
        }
        if directory && !url.path().ends_with('/') {
            url.set_path(&format!("{}/", url.path()));
        }
        Ok(url)
    }

    /// Authorization header for one request, preferring a cached digest
    /// challenge over preemptive Basic/Bearer.
    fn authorization(&self, method: &Method, url: &Url, body: &[u8]) -> Option<String> {
        let mut digest = self
            .digest
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(challenge) = digest.as_mut()
            && let Some(creds) = &self.credentials
        {
            return Some(auth::authorization_header(
                challenge,
                &creds.username,
                &creds.password,
                method.as_str(),
                url.path(),
                body,
            ));
        }
        drop(digest);

        if let Some(creds) = &self.credentials {
            use base64::Engine as _;
            let encoded = base64::engine::general_purpose::STANDARD
                .encode(format!("{}:{}", creds.username, creds.password));
            return Some(format!("Basic {encoded}"));
        }
        self.bearer_token
            .as_ref()
            .map(|token| format!("Bearer {token}"))
    }

    async fn send_once(&self, ctx: &Context, request: &WireRequest) -> FsResult<reqwest::Response> {
        ctx.check_cancelled()?;
        let mut builder = self
            .http
            .request(request.method.clone(), request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(*name, value.as_str());
        }
        let body = request.body.clone().unwrap_or_default();
        if let Some(authorization) = self.authorization(&request.method, &request.url, &body) {
            builder = builder.header("Authorization", authorization);
        }
        if let Some(body) = request.body.clone() {
            builder = builder.body(body);
        }

        tokio::select! {
            _ = ctx.cancel_token().cancelled() => Err(FsError::Cancelled),
            result = builder.send() => {
                result.map_err(|e| FsError::io_message(format!("webdav request failed: {e}")))
            }
        }
    }

    /// Sends a request; a 401 with a digest challenge refreshes the auth
    /// state and retries the original request exactly once.
    async fn send(&self, ctx: &Context, request: WireRequest) -> FsResult<reqwest::Response> {
        let response = self.send_once(ctx, &request).await?;
        if response.status() != StatusCode::UNAUTHORIZED || self.credentials.is_none() {
            return Ok(response);
        }

        let challenge = response
            .headers()
            .get_all(WWW_AUTHENTICATE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(auth::parse_challenge);
        let Some(challenge) = challenge else {
            return Ok(response);
        };

        debug!(url = %redact_url(&request.url), realm = %challenge.realm, "digest challenge received");
        *self
            .digest
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(challenge);
        self.send_once(ctx, &request).await
    }

    async fn read_body(&self, ctx: &Context, response: reqwest::Response) -> FsResult<String> {
        tokio::select! {
            _ = ctx.cancel_token().cancelled() => Err(FsError::Cancelled),
            text = response.text() => {
                text.map_err(|e| FsError::io_message(format!("webdav response body: {e}")))
            }
        }
    }

    async fn propfind(
        &self,
        ctx: &Context,
        url: Url,
        depth: &'static str,
    ) -> FsResult<reqwest::Response> {
        let method = Method::from_bytes(b"PROPFIND")
            .map_err(|e| FsError::io_message(format!("method: {e}")))?;
        debug!(url = %redact_url(&url), depth, "webdav propfind");
        self.send(
            ctx,
            WireRequest::new(method, url)
                .header("Depth", depth)
                .header("Content-Type", "application/xml")
                .body(PROPFIND_BODY),
        )
        .await
    }

    fn entry_to_status(&self, path: Path, entry: &xml::PropfindEntry) -> FileStatus {
        if entry.is_directory {
            FileStatus::directory(path)
        } else {
            FileStatus {
                path,
                is_directory: false,
                size: entry.size,
                mime_type: entry.mime_type.clone(),
            }
        }
    }

    /// Seeds the digest state with an OPTIONS round-trip so a streaming PUT
    /// (whose body cannot be replayed) can authenticate on the first try.
    async fn seed_digest(&self, ctx: &Context) -> FsResult<()> {
        if self.credentials.is_none() {
            return Ok(());
        }
        let seeded = self
            .digest
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some();
        if seeded {
            return Ok(());
        }
        let _ = self
            .send(
                ctx,
                WireRequest::new(Method::OPTIONS, self.base_url.clone()),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl FileSystem for WebdavFileSystem {
    async fn stat(&self, ctx: &Context, path: &Path) -> FsResult<Option<FileStatus>> {
        let url = self.url_for(path, path.is_root())?;
        debug!(url = %redact_url(&url), "webdav stat");
        let response = self.propfind(ctx, url, "0").await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            StatusCode::MULTI_STATUS | StatusCode::OK => {
                let text = self.read_body(ctx, response).await?;
                let entries = xml::parse_multistatus(&text)?;
                let Some(entry) = entries.first() else {
                    return Ok(None);
                };
                Ok(Some(self.entry_to_status(path.clone(), entry)))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(FsError::permission_denied(path))
            }
            status => Err(FsError::io(path, format!("PROPFIND failed: HTTP {status}"))),
        }
    }

    async fn list_dir(&self, ctx: &Context, path: &Path) -> FsResult<StatusStream> {
        let url = self.url_for(path, true)?;
        debug!(url = %redact_url(&url), "webdav list");
        let response = self.propfind(ctx, url.clone(), "1").await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(FsError::not_found(path)),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(FsError::permission_denied(path))
            }
            StatusCode::MULTI_STATUS | StatusCode::OK => {
                let text = self.read_body(ctx, response).await?;
                let mut entries = xml::parse_multistatus(&text)?;
                let entries = xml::filter_depth1_self(url.path(), &mut entries)
                    .map_err(|_| FsError::not_a_directory(path))?;

                let mut children = Vec::with_capacity(entries.len());
                for entry in &entries {
                    let name = entry.name();
                    if name == "/" {
                        continue;
                    }
                    let child = path.join(&name)?;
                    children.push(self.entry_to_status(child, entry));
                }
                Ok(helpers::guard_stream(
                    ctx,
                    stream::iter(children.into_iter().map(Ok)).boxed(),
                ))
            }
            status => Err(FsError::io(path, format!("PROPFIND failed: HTTP {status}"))),
        }
    }

    async fn list(
        &self,
        ctx: &Context,
        path: &Path,
        options: ListOptions,
    ) -> FsResult<StatusStream> {
        helpers::open_list(self, ctx, path, options).await
    }

    async fn open_read(
        &self,
        ctx: &Context,
        path: &Path,
        options: ReadOptions,
    ) -> FsResult<ByteStream> {
        let status = helpers::ensure_read_target(self, ctx, path).await?;
        let size = status.size.unwrap_or(0);
        let (start, end) = strata_core::resolve_read_range(path, size, options)?;
        if start == end {
            return Ok(stream::empty().boxed());
        }

        let url = self.url_for(path, false)?;
        debug!(url = %redact_url(&url), start, end, "webdav get");
        let mut request = WireRequest::new(Method::GET, url);
        if options.is_bounded() {
            request = request.header("Range", format!("bytes={start}-{}", end - 1));
        }
        let response = self.send(ctx, request).await?;

        match response.status() {
            StatusCode::OK | StatusCode::PARTIAL_CONTENT => {
                let error_path = path.clone();
                let bytes = response
                    .bytes_stream()
                    .map(move |item| {
                        item.map_err(|e| {
                            FsError::io(&error_path, format!("webdav body: {e}"))
                        })
                    })
                    .boxed();
                Ok(helpers::guard_stream(ctx, bytes))
            }
            StatusCode::NOT_FOUND => Err(FsError::not_found(path)),
            StatusCode::RANGE_NOT_SATISFIABLE => Err(FsError::io(
                path,
                format!("range [{start}, {end}) not satisfiable"),
            )),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(FsError::permission_denied(path))
            }
            status => Err(FsError::io(path, format!("GET failed: HTTP {status}"))),
        }
    }

    async fn open_write(
        &self,
        ctx: &Context,
        path: &Path,
        options: WriteOptions,
    ) -> FsResult<Box<dyn WriteSink>> {
        if options.mode == WriteMode::Append {
            return Err(FsError::not_implemented("webdav append"));
        }
        match self.stat(ctx, path).await? {
            Some(status) if status.is_directory => return Err(FsError::not_a_file(path)),
            Some(_) if options.mode == WriteMode::Write => {
                return Err(FsError::already_exists(path));
            }
            _ => {}
        }

        self.seed_digest(ctx).await?;
        {
            let digest = self
                .digest
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(challenge) = digest.as_ref()
                && challenge.qop == Some(DigestQop::AuthInt)
            {
                // auth-int covers the request body; a streaming body cannot
                // be hashed up front.
                return Err(FsError::not_implemented("webdav streaming write with auth-int"));
            }
        }

        let url = self.url_for(path, false)?;
        debug!(url = %redact_url(&url), "webdav put");

        let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(8);
        let body_stream = stream::unfold(rx, |mut rx| async move {
            rx.recv()
                .await
                .map(|chunk| (Ok::<_, std::io::Error>(chunk), rx))
        });

        let mut builder = self
            .http
            .request(Method::PUT, url.clone())
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(reqwest::Body::wrap_stream(body_stream));
        if let Some(authorization) = self.authorization(&Method::PUT, &url, b"") {
            builder = builder.header("Authorization", authorization);
        }

        let request = tokio::spawn(async move { builder.send().await });
        Ok(Box::new(WebdavWriteSink {
            tx: Some(tx),
            request: Some(request),
            path: path.clone(),
            ctx: ctx.clone(),
        }))
    }

    async fn create_dir(&self, ctx: &Context, path: &Path) -> FsResult<()> {
        let method = Method::from_bytes(b"MKCOL")
            .map_err(|e| FsError::io_message(format!("method: {e}")))?;
        let url = self.url_for(path, true)?;
        debug!(url = %redact_url(&url), "webdav mkcol");
        let response = self.send(ctx, WireRequest::new(method, url)).await?;

        match response.status() {
            StatusCode::CREATED | StatusCode::OK | StatusCode::NO_CONTENT => Ok(()),
            StatusCode::METHOD_NOT_ALLOWED => Err(FsError::already_exists(path)),
            StatusCode::CONFLICT | StatusCode::NOT_FOUND => {
                Err(FsError::not_found(&path.parent().unwrap_or_else(Path::root)))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(FsError::permission_denied(path))
            }
            status => Err(FsError::io(path, format!("MKCOL failed: HTTP {status}"))),
        }
    }

    async fn delete_entry(&self, ctx: &Context, path: &Path) -> FsResult<()> {
        // Pre-stat so a 404 can be attributed to the target rather than an
        // auth or proxy quirk.
        let status = self
            .stat(ctx, path)
            .await?
            .ok_or_else(|| FsError::not_found(path))?;

        let url = self.url_for(path, status.is_directory)?;
        debug!(url = %redact_url(&url), "webdav delete");
        let response = self.send(ctx, WireRequest::new(Method::DELETE, url)).await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(FsError::not_found(path)),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(FsError::permission_denied(path))
            }
            status => Err(FsError::io(path, format!("DELETE failed: HTTP {status}"))),
        }
    }

    async fn copy_file(&self, ctx: &Context, source: &Path, dest: &Path) -> FsResult<()> {
        let method = Method::from_bytes(b"COPY")
            .map_err(|e| FsError::io_message(format!("method: {e}")))?;
        let url = self.url_for(source, false)?;
        let destination = self.url_for(dest, false)?;
        debug!(url = %redact_url(&url), destination = %redact_url(&destination), "webdav copy");

        let response = self
            .send(
                ctx,
                WireRequest::new(method, url)
                    .header("Destination", destination.to_string())
                    .header("Overwrite", "T"),
            )
            .await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(FsError::not_found(source)),
            StatusCode::CONFLICT => {
                Err(FsError::not_found(&dest.parent().unwrap_or_else(Path::root)))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(FsError::permission_denied(source))
            }
            status => Err(FsError::io(source, format!("COPY failed: HTTP {status}"))),
        }
    }

    async fn move_file(&self, ctx: &Context, source: &Path, dest: &Path) -> FsResult<()> {
        let method = Method::from_bytes(b"MOVE")
            .map_err(|e| FsError::io_message(format!("method: {e}")))?;
        let url = self.url_for(source, false)?;
        let destination = self.url_for(dest, false)?;
        debug!(url = %redact_url(&url), destination = %redact_url(&destination), "webdav move");

        let response = self
            .send(
                ctx,
                WireRequest::new(method, url)
                    .header("Destination", destination.to_string())
                    .header("Overwrite", "T"),
            )
            .await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(FsError::not_found(source)),
            StatusCode::CONFLICT => {
                Err(FsError::not_found(&dest.parent().unwrap_or_else(Path::root)))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(FsError::permission_denied(source))
            }
            status => Err(FsError::io(source, format!("MOVE failed: HTTP {status}"))),
        }
    }
}

/// Streaming PUT: chunks flow through a bounded channel into the request
/// body; `close` drops the sender and joins the response.
struct WebdavWriteSink {
    tx: Option<tokio::sync::mpsc::Sender<Bytes>>,
    request: Option<tokio::task::JoinHandle<Result<reqwest::Response, reqwest::Error>>>,
    path: Path,
    ctx: Context,
}

#[async_trait]
impl WriteSink for WebdavWriteSink {
    async fn write(&mut self, chunk: Bytes) -> FsResult<()> {
        self.ctx.check_cancelled()?;
        let Some(tx) = self.tx.as_ref() else {
            return Err(FsError::io(&self.path, "write after close"));
        };
        tokio::select! {
            _ = self.ctx.cancel_token().cancelled() => Err(FsError::Cancelled),
            sent = tx.send(chunk) => {
                sent.map_err(|_| FsError::io(&self.path, "webdav upload aborted"))
            }
        }
    }

    async fn close(&mut self) -> FsResult<()> {
        self.ctx.check_cancelled()?;
        drop(self.tx.take());
        let Some(mut request) = self.request.take() else {
            return Ok(());
        };

        let joined = tokio::select! {
            _ = self.ctx.cancel_token().cancelled() => {
                request.abort();
                return Err(FsError::Cancelled);
            }
            joined = &mut request => joined,
        };
        let response = joined
            .map_err(|e| FsError::io(&self.path, format!("webdav upload task: {e}")))?
            .map_err(|e| FsError::io(&self.path, format!("webdav upload: {e}")))?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED | StatusCode::NO_CONTENT => Ok(()),
            StatusCode::NOT_FOUND | StatusCode::CONFLICT => {
                Err(FsError::not_found(&self.path.parent().unwrap_or_else(Path::root)))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(FsError::permission_denied(&self.path))
            }
            status => Err(FsError::io(&self.path, format!("PUT failed: HTTP {status}"))),
        }
    }
}
