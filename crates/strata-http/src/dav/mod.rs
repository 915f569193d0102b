//! WebDAV front-end: full method dispatch over one backend.

pub mod auth;
pub mod propfind;

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use futures_util::StreamExt as _;

use strata_core::{
    Context, CopyOptions, CreateDirectoryOptions, DeleteOptions, FileSystem, FsError, ListOptions,
    MoveOptions, Path, WriteOptions, helpers,
};

use crate::errors::error_response;
use crate::files::file_response;
use crate::request::{path_from_uri, request_context};

pub use auth::{DavAuth, DavAuthConfig};

const ALLOW: &str = "OPTIONS, GET, HEAD, PUT, DELETE, MKCOL, PROPFIND, PROPPATCH, COPY, MOVE";

#[derive(Clone)]
pub struct DavState {
    pub backend: Arc<dyn FileSystem>,
    pub auth: Option<Arc<DavAuth>>,
}

pub fn router(state: DavState) -> Router {
    Router::new()
        .route("/", any(dispatch))
        .route("/{*path}", any(dispatch))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .with_state(state)
}

async fn auth_middleware(State(state): State<DavState>, req: Request, next: Next) -> Response {
    // CORS preflights pass unauthenticated.
    if req.method() == Method::OPTIONS {
        return next.run(req).await;
    }
    let Some(auth) = &state.auth else {
        return next.run(req).await;
    };

    match auth::check(auth, req.method(), req.headers()) {
        auth::AuthOutcome::Authorized => next.run(req).await,
        auth::AuthOutcome::Challenge { stale } => {
            let mut builder = Response::builder().status(StatusCode::UNAUTHORIZED);
            for value in auth::challenge_headers(auth, stale) {
                builder = builder.header(header::WWW_AUTHENTICATE, value);
            }
            builder
                .body(Body::empty())
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
    }
}

async fn dispatch(State(state): State<DavState>, req: Request) -> Response {
    let ctx = request_context(req.headers());
    let path = match path_from_uri(req.uri()) {
        Ok(path) => path,
        Err(error) => return error_response(&error),
    };

    let backend = state.backend.as_ref();
    let method = req.method().clone();
    match method.as_str() {
        "OPTIONS" => options_response(),
        "GET" => get(backend, &ctx, &path, req.headers(), true).await,
        "HEAD" => get(backend, &ctx, &path, req.headers(), false).await,
        "PUT" => put(backend, &ctx, &path, req).await,
        "DELETE" => delete(backend, &ctx, &path).await,
        "MKCOL" => mkcol(backend, &ctx, &path).await,
        "PROPFIND" => propfind_handler(backend, &ctx, &path, req.headers()).await,
        "PROPPATCH" => StatusCode::FORBIDDEN.into_response(),
        "COPY" => copy_move(backend, &ctx, &path, req.headers(), false).await,
        "MOVE" => copy_move(backend, &ctx, &path, req.headers(), true).await,
        _ => Response::builder()
            .status(StatusCode::METHOD_NOT_ALLOWED)
            .header(header::ALLOW, ALLOW)
            .body(Body::empty())
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
    }
}

fn options_response() -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::ALLOW, ALLOW)
        .header("DAV", "1, 2")
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", ALLOW)
        .header(
            "Access-Control-Allow-Headers",
            "Authorization, Content-Type, Depth, Destination, Overwrite, Range",
        )
        .body(Body::empty())
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

async fn get(
    backend: &dyn FileSystem,
    ctx: &Context,
    path: &Path,
    headers: &HeaderMap,
    include_body: bool,
) -> Response {
    let status = match backend.stat(ctx, path).await {
        Ok(Some(status)) => status,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(error) => return error_response(&error),
    };

    if status.is_directory {
        return match crate::browse::directory_html(backend, ctx, path).await {
            Ok(body) => {
                let body = if include_body { Body::from(body) } else { Body::empty() };
                Response::builder()
                    .status(StatusCode::OK)
                    .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
                    .body(body)
                    .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
            }
            Err(error) => error_response(&error),
        };
    }

    let range = headers.get(header::RANGE).and_then(|v| v.to_str().ok());
    file_response(backend, ctx, path, &status, range, include_body).await
}

async fn put(backend: &dyn FileSystem, ctx: &Context, path: &Path, req: Request) -> Response {
    let mut sink = match backend
        .open_write(ctx, path, WriteOptions::overwrite())
        .await
    {
        Ok(sink) => sink,
        Err(error) => return error_response(&error),
    };

    let mut body = req.into_body().into_data_stream();
    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(_) => {
                // The client went away mid-upload; drop the sink without
                // closing so nothing partial is committed.
                ctx.cancel();
                return error_response(&FsError::Cancelled);
            }
        };
        if let Err(error) = sink.write(chunk).await {
            return error_response(&error);
        }
    }
    if let Err(error) = sink.close().await {
        return error_response(&error);
    }
    StatusCode::CREATED.into_response()
}

async fn delete(backend: &dyn FileSystem, ctx: &Context, path: &Path) -> Response {
    match backend
        .delete(ctx, path, DeleteOptions { recursive: true })
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => error_response(&error),
    }
}

async fn mkcol(backend: &dyn FileSystem, ctx: &Context, path: &Path) -> Response {
    match backend
        .create_directory(ctx, path, CreateDirectoryOptions::create_parents())
        .await
    {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(FsError::AlreadyExists { .. }) => StatusCode::METHOD_NOT_ALLOWED.into_response(),
        Err(error) => error_response(&error),
    }
}

async fn propfind_handler(
    backend: &dyn FileSystem,
    ctx: &Context,
    path: &Path,
    headers: &HeaderMap,
) -> Response {
    let depth = headers
        .get("depth")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("1");

    let status = match backend.stat(ctx, path).await {
        Ok(Some(status)) => status,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(error) => return error_response(&error),
    };

    let mut resources = vec![status.clone()];
    if depth != "0" && status.is_directory {
        let children = match backend.list(ctx, path, ListOptions::default()).await {
            Ok(stream) => helpers::collect(stream).await,
            Err(error) => return error_response(&error),
        };
        match children {
            Ok(mut children) => {
                children.sort_by(|a, b| a.path.cmp(&b.path));
                resources.extend(children);
            }
            Err(error) => return error_response(&error),
        }
    }

    let xml = propfind::render_multistatus(&resources);
    Response::builder()
        .status(StatusCode::from_u16(207).unwrap_or(StatusCode::OK))
        .header(header::CONTENT_TYPE, "application/xml; charset=utf-8")
        .body(Body::from(xml))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

async fn copy_move(
    backend: &dyn FileSystem,
    ctx: &Context,
    source: &Path,
    headers: &HeaderMap,
    is_move: bool,
) -> Response {
    let Some(destination) = headers
        .get("destination")
        .and_then(|v| v.to_str().ok())
    else {
        return (StatusCode::BAD_REQUEST, "missing Destination header").into_response();
    };
    let Ok(dest_uri) = destination.parse::<Uri>() else {
        return (StatusCode::BAD_REQUEST, "invalid Destination header").into_response();
    };
    let dest = match path_from_uri(&dest_uri) {
        Ok(dest) => dest,
        Err(error) => return error_response(&error),
    };

    let overwrite = headers
        .get("overwrite")
        .and_then(|v| v.to_str().ok())
        .map(|v| !v.eq_ignore_ascii_case("f"))
        .unwrap_or(true);

    let result = if is_move {
        backend
            .move_to(
                ctx,
                source,
                &dest,
                MoveOptions {
                    overwrite,
                    recursive: true,
                },
            )
            .await
    } else {
        backend
            .copy(
                ctx,
                source,
                &dest,
                CopyOptions {
                    overwrite,
                    recursive: true,
                },
            )
            .await
    };

    match result {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(error) => error_response(&error),
    }
}
