//! Per-request context plumbing shared by both front-ends.

use axum::body::Body;
use axum::http::{HeaderMap, Uri};
use futures_util::StreamExt as _;
use futures_util::stream;

use strata_core::fs::ByteStream;
use strata_core::{Context, FsError, FsResult, Path};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// One `Context` per inbound request; the request id doubles as the
/// operation id so backend logs correlate with access logs.
pub fn request_context(headers: &HeaderMap) -> Context {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(Context::with_operation_id)
        .unwrap_or_default()
}

/// File-system path from a request URI, percent-decoded per segment.
pub fn path_from_uri(uri: &Uri) -> FsResult<Path> {
    let mut path = Path::root();
    for segment in uri.path().split('/') {
        if segment.is_empty() {
            continue;
        }
        let decoded = percent_encoding::percent_decode_str(segment)
            .decode_utf8()
            .map_err(|_| FsError::io_message(format!("invalid path segment: {segment:?}")))?;
        path = path.join(&decoded)?;
    }
    Ok(path)
}

/// Response body that cancels the request context when the stream
/// completes, errors, or is abandoned by the client.
pub fn body_for_stream(ctx: Context, stream: ByteStream) -> Body {
    struct CancelOnDrop(Context);

    impl Drop for CancelOnDrop {
        fn drop(&mut self) {
            self.0.cancel();
        }
    }

    let guard = CancelOnDrop(ctx);
    Body::from_stream(stream::unfold(
        (stream, guard),
        |(mut stream, guard)| async move {
            stream.next().await.map(|item| (item, (stream, guard)))
        },
    ))
}
