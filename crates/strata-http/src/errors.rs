use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{debug, error};

use strata_core::FsError;

/// HTTP status for a file-system error, per the front-end mapping: sanitized
/// messages, no internals.
pub fn status_for(error: &FsError) -> StatusCode {
    match error {
        FsError::NotFound { .. } => StatusCode::NOT_FOUND,
        FsError::AlreadyExists { .. } => StatusCode::CONFLICT,
        FsError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
        FsError::NotADirectory { .. }
        | FsError::NotAFile { .. }
        | FsError::NotEmptyDirectory { .. }
        | FsError::RecursiveNotSpecified { .. } => StatusCode::CONFLICT,
        FsError::NotImplemented { .. } => StatusCode::NOT_IMPLEMENTED,
        // Nginx-style "client closed request"; the client is gone anyway.
        FsError::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        FsError::UnsupportedEntity { .. } | FsError::Io { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub fn error_response(error: &FsError) -> Response {
    let status = status_for(error);
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!(error = %error, "request failed");
        return (status, "internal error").into_response();
    }
    debug!(error = %error, status = %status, "request failed");
    (status, error.to_string()).into_response()
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use strata_core::{FsError, Path};

    use super::status_for;

    #[test]
    fn mapping_matches_the_front_end_contract() {
        let p = Path::root().join("x").unwrap();
        assert_eq!(status_for(&FsError::not_found(&p)), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&FsError::already_exists(&p)), StatusCode::CONFLICT);
        assert_eq!(
            status_for(&FsError::permission_denied(&p)),
            StatusCode::FORBIDDEN
        );
        assert_eq!(status_for(&FsError::Cancelled).as_u16(), 499);
        assert_eq!(
            status_for(&FsError::io(&p, "boom")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
