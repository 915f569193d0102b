//! Hashed on-disk layout shared by the metadata and block caches.
//!
//! Keys are the first 16 hex characters of `SHA-256(input)`, fanned out over
//! two 3-nibble directory levels so no single directory accumulates an
//! unbounded child count:
//! `<cacheDir>/<k[0:3]>/<k[3:6]>/<k[6:16]>.<ext>`.

use std::sync::Arc;

use bytes::Bytes;
use sha2::{Digest as _, Sha256};
use tracing::debug;

use strata_core::{
    Context, CreateDirectoryOptions, DeleteOptions, FileSystem, FsError, FsResult, Path,
    ReadOptions, WriteOptions,
};

pub fn hash_key(input: &str) -> String {
    use std::fmt::Write as _;
    let digest = Sha256::digest(input.as_bytes());
    let mut out = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// A cache file store: some file system plus a root directory, addressed by
/// hashed keys.
#[derive(Clone)]
pub struct CacheStore {
    fs: Arc<dyn FileSystem>,
    dir: Path,
}

impl CacheStore {
    pub fn new(fs: Arc<dyn FileSystem>, dir: Path) -> Self {
        Self { fs, dir }
    }

    pub fn file_for(&self, key_input: &str, extension: &str) -> FsResult<Path> {
        let key = hash_key(key_input);
        self.dir
            .join(&key[0..3])?
            .join(&key[3..6])?
            .join(&format!("{}.{extension}", &key[6..16]))
    }

    /// `None` on a missing file; cache-layer read failures surface so the
    /// caller can decide to treat them as a miss.
    pub async fn read(&self, ctx: &Context, file: &Path) -> FsResult<Option<Bytes>> {
        match self.fs.read_bytes(ctx, file, ReadOptions::default()).await {
            Ok(data) => Ok(Some(data)),
            Err(FsError::NotFound { .. }) => Ok(None),
            Err(error) => Err(error),
        }
    }

    /// Overwrites the cache file, creating missing fan-out directories. The
    /// backing file systems write atomically (temp name + rename), so
    /// concurrent readers never observe a truncated file.
    pub async fn write(&self, ctx: &Context, file: &Path, data: Bytes) -> FsResult<()> {
        let parent = file.parent().unwrap_or_else(Path::root);
        match self
            .fs
            .create_directory(ctx, &parent, CreateDirectoryOptions::create_parents())
            .await
        {
            Ok(()) | Err(FsError::AlreadyExists { .. }) => {}
            Err(error) => return Err(error),
        }
        self.fs
            .write_bytes(ctx, file, data, WriteOptions::overwrite())
            .await
    }

    /// Best-effort delete; a missing file is not an error.
    pub async fn remove(&self, ctx: &Context, file: &Path) -> FsResult<()> {
        match self.fs.delete(ctx, file, DeleteOptions::default()).await {
            Ok(()) | Err(FsError::NotFound { .. }) => Ok(()),
            Err(error) => Err(error),
        }
    }

    /// Delete with the error logged and swallowed, for background eviction.
    pub async fn remove_quietly(&self, ctx: &Context, file: &Path) -> bool {
        match self.remove(ctx, file).await {
            Ok(()) => true,
            Err(error) => {
                debug!(file = %file, error = %error, "cache eviction failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::hash_key;

    #[test]
    fn keys_are_16_lowercase_hex_chars() {
        let key = hash_key("/some/path");
        assert_eq!(key.len(), 16);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn keys_are_stable_and_distinct() {
        assert_eq!(hash_key("/a"), hash_key("/a"));
        assert_ne!(hash_key("/a"), hash_key("/b"));
        assert_ne!(hash_key("/a:0"), hash_key("/a:1"));
    }
}
