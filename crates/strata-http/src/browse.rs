//! Read-only HTTP browsing front-end: directory listings (HTML or JSON) and
//! ranged file downloads. Everything but GET is 404.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use serde::Serialize;

use strata_core::{Context, FileStatus, FileSystem, ListOptions, Path};

use crate::errors::error_response;
use crate::files::file_response;
use crate::request::{path_from_uri, request_context};

const HREF_ENC: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'#')
    .add(b'?')
    .add(b'%');

#[derive(Clone)]
pub struct BrowseState {
    pub backend: Arc<dyn FileSystem>,
}

pub fn router(state: BrowseState) -> Router {
    Router::new()
        .route("/", any(handle))
        .route("/{*path}", any(handle))
        .with_state(state)
}

async fn handle(State(state): State<BrowseState>, req: Request) -> Response {
    if req.method() != Method::GET {
        return StatusCode::NOT_FOUND.into_response();
    }

    let ctx = request_context(req.headers());
    let path = match path_from_uri(req.uri()) {
        Ok(path) => path,
        Err(_) => return StatusCode::NOT_FOUND.into_response(),
    };

    let status = match state.backend.stat(&ctx, &path).await {
        Ok(Some(status)) => status,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(error) => return error_response(&error),
    };

    if !status.is_directory {
        let range = req
            .headers()
            .get(header::RANGE)
            .and_then(|v| v.to_str().ok());
        return file_response(state.backend.as_ref(), &ctx, &path, &status, range, true).await;
    }

    let recursive = req
        .uri()
        .query()
        .is_some_and(|q| q.split('&').any(|kv| kv == "recursive=true"));
    let wants_json = req
        .headers()
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("application/json"));

    let listing = match state
        .backend
        .list(&ctx, &path, ListOptions { recursive })
        .await
    {
        Ok(stream) => strata_core::helpers::collect(stream).await,
        Err(error) => return error_response(&error),
    };
    let mut entries = match listing {
        Ok(entries) => entries,
        Err(error) => return error_response(&error),
    };
    entries.sort_by(|a, b| a.path.cmp(&b.path));

    if wants_json {
        json_listing(&path, &entries)
    } else {
        html_listing(&path, &entries)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonEntry {
    name: String,
    path: String,
    is_directory: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mime_type: Option<String>,
}

#[derive(Serialize)]
struct JsonListing {
    path: String,
    files: Vec<JsonEntry>,
}

fn json_listing(path: &Path, entries: &[FileStatus]) -> Response {
    let listing = JsonListing {
        path: path.to_string(),
        files: entries
            .iter()
            .map(|status| JsonEntry {
                name: status.path.filename().unwrap_or("/").to_string(),
                path: status.path.to_string(),
                is_directory: status.is_directory,
                size: status.size,
                mime_type: status.mime_type.clone(),
            })
            .collect(),
    };
    axum::Json(listing).into_response()
}

pub(crate) fn href_for(path: &Path, directory: bool) -> String {
    if path.is_root() {
        return "/".to_string();
    }
    let mut out = String::new();
    for segment in path.segments() {
        out.push('/');
        out.push_str(&utf8_percent_encode(segment, HREF_ENC).to_string());
    }
    if directory {
        out.push('/');
    }
    out
}

pub(crate) fn html_escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Non-recursive HTML listing, also used for WebDAV GET on a collection.
pub(crate) async fn directory_html(
    backend: &dyn FileSystem,
    ctx: &Context,
    path: &Path,
) -> strata_core::FsResult<String> {
    let stream = backend.list(ctx, path, ListOptions::default()).await?;
    let mut entries = strata_core::helpers::collect(stream).await?;
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(render_listing(path, &entries))
}

fn render_listing(path: &Path, entries: &[FileStatus]) -> String {
    let title = html_escape(&path.to_string());
    let mut body = format!(
        "<!DOCTYPE html>\n<html><head><title>Index of {title}</title></head><body>\n\
         <h1>Index of {title}</h1>\n<ul>\n"
    );
    if !path.is_root() {
        let parent = path.parent().unwrap_or_else(Path::root);
        body.push_str(&format!(
            "<li><a href=\"{}\">..</a></li>\n",
            href_for(&parent, true)
        ));
    }
    for status in entries {
        let name = status.path.filename().unwrap_or("/");
        let suffix = if status.is_directory { "/" } else { "" };
        body.push_str(&format!(
            "<li><a href=\"{}\">{}{suffix}</a></li>\n",
            href_for(&status.path, status.is_directory),
            html_escape(name),
        ));
    }
    body.push_str("</ul>\n</body></html>\n");
    body
}

fn html_listing(path: &Path, entries: &[FileStatus]) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
        .body(Body::from(render_listing(path, entries)))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
