use serde::{Deserialize, Serialize};

use crate::path::Path;

/// Result of `stat`/`list`: one entry per file-system object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStatus {
    pub path: Path,
    pub is_directory: bool,
    /// Byte size; files only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl FileStatus {
    pub fn directory(path: Path) -> Self {
        Self {
            path,
            is_directory: true,
            size: None,
            mime_type: None,
        }
    }

    pub fn file(path: Path, size: u64, mime_type: Option<String>) -> Self {
        Self {
            path,
            is_directory: false,
            size: Some(size),
            mime_type,
        }
    }

    /// Status for the same object observed at a different path, e.g. after
    /// alias or union reprojection.
    pub fn at_path(mut self, path: Path) -> Self {
        self.path = path;
        self
    }
}
