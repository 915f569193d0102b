//! Streaming file responses with `Range` support, shared by both
//! front-ends.

use axum::body::Body;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};

use strata_core::{Context, FileStatus, FileSystem, Path, ReadOptions};

use crate::errors::error_response;
use crate::range::parse_range;
use crate::request::body_for_stream;

const OCTET_STREAM: &str = "application/octet-stream";

pub async fn file_response(
    backend: &dyn FileSystem,
    ctx: &Context,
    path: &Path,
    status: &FileStatus,
    range_header: Option<&str>,
    include_body: bool,
) -> Response {
    let total = status.size.unwrap_or(0);
    let content_type = status
        .mime_type
        .clone()
        .unwrap_or_else(|| OCTET_STREAM.to_string());

    let window = match parse_range(range_header, total) {
        Ok(window) => window,
        Err(()) => {
            return Response::builder()
                .status(StatusCode::RANGE_NOT_SATISFIABLE)
                .header(header::CONTENT_RANGE, format!("bytes */{total}"))
                .body(Body::empty())
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
        }
    };

    let (status_code, start, end) = match window {
        None => (StatusCode::OK, 0, total),
        Some((start, end)) => (StatusCode::PARTIAL_CONTENT, start, end),
    };

    let mut builder = Response::builder()
        .status(status_code)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, end - start)
        .header(header::ACCEPT_RANGES, "bytes");
    if status_code == StatusCode::PARTIAL_CONTENT {
        builder = builder.header(
            header::CONTENT_RANGE,
            format!("bytes {start}-{}/{total}", end.saturating_sub(1)),
        );
    }

    let body = if include_body {
        let options = match window {
            None => ReadOptions::default(),
            Some((start, end)) => ReadOptions::range(start, end),
        };
        match backend.open_read(ctx, path, options).await {
            Ok(stream) => body_for_stream(ctx.clone(), stream),
            Err(error) => return error_response(&error),
        }
    } else {
        Body::empty()
    };

    builder
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
