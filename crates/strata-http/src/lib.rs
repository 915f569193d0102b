//! Network front-ends over any backend: a read-only HTTP browser and a
//! WebDAV server.

pub mod browse;
pub mod dav;
pub mod errors;
pub mod files;
pub mod providers;
pub mod range;
pub mod request;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::request_id::{
    MakeRequestUuid, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use tower_http::trace::TraceLayer;
use tracing::info;

use strata_core::FileSystem;
use strata_engine::FrontendHandle;

pub use browse::BrowseState;
pub use dav::{DavAuth, DavAuthConfig, DavState};
pub use providers::frontend_providers;

fn instrumented(router: Router) -> Router {
    let request_id_header = axum::http::HeaderName::from_static(request::REQUEST_ID_HEADER);
    let trace_layer =
        TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
            let request_id = request
                .extensions()
                .get::<RequestId>()
                .and_then(|v| v.header_value().to_str().ok())
                .unwrap_or("-");
            tracing::info_span!(
                "http.request",
                request_id = %request_id,
                method = %request.method(),
                uri = %request.uri(),
            )
        });

    router
        .layer(trace_layer)
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
}

/// Binds and serves the read-only browsing front-end.
pub async fn serve_http(
    backend: Arc<dyn FileSystem>,
    addr: SocketAddr,
) -> anyhow::Result<FrontendHandle> {
    serve(browse::router(BrowseState { backend }), addr, "http").await
}

/// Binds and serves the WebDAV front-end, optionally behind Basic/Digest
/// auth.
pub async fn serve_webdav(
    backend: Arc<dyn FileSystem>,
    addr: SocketAddr,
    auth: Option<DavAuthConfig>,
) -> anyhow::Result<FrontendHandle> {
    let state = DavState {
        backend,
        auth: auth.map(|config| Arc::new(DavAuth::new(config))),
    };
    serve(dav::router(state), addr, "webdav").await
}

async fn serve(app: Router, addr: SocketAddr, kind: &'static str) -> anyhow::Result<FrontendHandle> {
    let app = instrumented(app);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;

    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    let task = tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, app)
            .with_graceful_shutdown(token.cancelled_owned())
            .await
        {
            tracing::error!(error = %error, "front-end server failed");
        }
    });

    info!(kind, addr = %local_addr, "front-end listening");
    Ok(FrontendHandle {
        local_addr,
        shutdown,
        task,
    })
}
