use crate::path::Path;

pub type FsResult<T> = Result<T, FsError>;

/// Error taxonomy shared by every backend and front-end.
///
/// Backends surface these from their primitives; the generic drivers rethrow
/// them unmodified, and the front-ends map them onto HTTP statuses.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FsError {
    #[error("not found: {path}")]
    NotFound { path: String },
    #[error("already exists: {path}")]
    AlreadyExists { path: String },
    #[error("not a directory: {path}")]
    NotADirectory { path: String },
    #[error("not a file: {path}")]
    NotAFile { path: String },
    #[error("directory not empty: {path}")]
    NotEmptyDirectory { path: String },
    #[error("recursive not specified for directory: {path}")]
    RecursiveNotSpecified { path: String },
    #[error("permission denied: {path}")]
    PermissionDenied { path: String },
    #[error("not implemented: {feature}")]
    NotImplemented { feature: String },
    #[error("unsupported entity: {path}")]
    UnsupportedEntity { path: String },
    #[error("operation cancelled")]
    Cancelled,
    #[error("i/o error: {message}")]
    Io { path: Option<String>, message: String },
}

impl FsError {
    pub fn not_found(path: &Path) -> Self {
        Self::NotFound {
            path: path.to_string(),
        }
    }

    pub fn already_exists(path: &Path) -> Self {
        Self::AlreadyExists {
            path: path.to_string(),
        }
    }

    pub fn not_a_directory(path: &Path) -> Self {
        Self::NotADirectory {
            path: path.to_string(),
        }
    }

    pub fn not_a_file(path: &Path) -> Self {
        Self::NotAFile {
            path: path.to_string(),
        }
    }

    pub fn not_empty_directory(path: &Path) -> Self {
        Self::NotEmptyDirectory {
            path: path.to_string(),
        }
    }

    pub fn recursive_not_specified(path: &Path) -> Self {
        Self::RecursiveNotSpecified {
            path: path.to_string(),
        }
    }

    pub fn permission_denied(path: &Path) -> Self {
        Self::PermissionDenied {
            path: path.to_string(),
        }
    }

    pub fn not_implemented(feature: impl Into<String>) -> Self {
        Self::NotImplemented {
            feature: feature.into(),
        }
    }

    pub fn unsupported_entity(path: &Path) -> Self {
        Self::UnsupportedEntity {
            path: path.to_string(),
        }
    }

    pub fn io(path: &Path, message: impl Into<String>) -> Self {
        Self::Io {
            path: Some(path.to_string()),
            message: message.into(),
        }
    }

    pub fn io_message(message: impl Into<String>) -> Self {
        Self::Io {
            path: None,
            message: message.into(),
        }
    }

    /// Maps an OS error at `path` onto the taxonomy.
    pub fn from_io(path: &Path, error: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match error.kind() {
            ErrorKind::NotFound => Self::not_found(path),
            ErrorKind::AlreadyExists => Self::already_exists(path),
            ErrorKind::PermissionDenied => Self::permission_denied(path),
            ErrorKind::NotADirectory => Self::not_a_directory(path),
            ErrorKind::IsADirectory => Self::not_a_file(path),
            ErrorKind::DirectoryNotEmpty => Self::not_empty_directory(path),
            _ => Self::io(path, error.to_string()),
        }
    }

    /// Path the error refers to, when one was recorded.
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::NotFound { path }
            | Self::AlreadyExists { path }
            | Self::NotADirectory { path }
            | Self::NotAFile { path }
            | Self::NotEmptyDirectory { path }
            | Self::RecursiveNotSpecified { path }
            | Self::PermissionDenied { path }
            | Self::UnsupportedEntity { path } => Some(path),
            Self::Io { path, .. } => path.as_deref(),
            Self::NotImplemented { .. } | Self::Cancelled => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use std::io::ErrorKind;

    use super::FsError;
    use crate::path::Path;

    #[test]
    fn io_kinds_map_to_taxonomy() {
        let p: Path = "/a".parse().unwrap();
        assert!(matches!(
            FsError::from_io(&p, ErrorKind::NotFound.into()),
            FsError::NotFound { .. }
        ));
        assert!(matches!(
            FsError::from_io(&p, ErrorKind::PermissionDenied.into()),
            FsError::PermissionDenied { .. }
        ));
        assert!(matches!(
            FsError::from_io(&p, ErrorKind::AlreadyExists.into()),
            FsError::AlreadyExists { .. }
        ));
        assert!(matches!(
            FsError::from_io(&p, ErrorKind::Other.into()),
            FsError::Io { .. }
        ));
    }

    #[test]
    fn error_paths_are_recorded() {
        let p: Path = "/a/b".parse().unwrap();
        assert_eq!(FsError::not_found(&p).path(), Some("/a/b"));
        assert_eq!(FsError::Cancelled.path(), None);
    }
}
