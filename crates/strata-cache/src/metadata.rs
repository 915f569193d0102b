use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt as _;
use futures_util::stream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use strata_core::fs::{ByteStream, StatusStream, WriteSink};
use strata_core::helpers;
use strata_core::{
    Context, CopyOptions, CreateDirectoryOptions, DeleteOptions, FileStatus, FileSystem, FsError,
    FsResult, ListOptions, MoveOptions, Path, ReadOptions, WriteOptions,
};

use crate::layout::CacheStore;

const ENTRY_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MetadataCacheEntry {
    path: String,
    stat: FileStatus,
    last_updated: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    children: Option<Vec<FileStatus>>,
    #[serde(default)]
    is_large_directory: bool,
    version: String,
}

#[derive(Debug, Clone, Copy)]
pub struct MetadataCacheOptions {
    /// Entries older than this are treated as misses and deleted.
    pub max_cache_age: Duration,
    /// Directories with more children than this are cached without a
    /// children list.
    pub large_directory_threshold: usize,
    /// Access-record count that triggers eviction.
    pub max_cache_size: usize,
    pub cleanup_interval: Duration,
    pub cleanup_batch_size: usize,
}

impl Default for MetadataCacheOptions {
    fn default() -> Self {
        Self {
            max_cache_age: Duration::from_secs(300),
            large_directory_threshold: 1000,
            max_cache_size: 10_000,
            cleanup_interval: Duration::from_secs(60),
            cleanup_batch_size: 100,
        }
    }
}

#[derive(Debug, Clone)]
struct AccessRecord {
    last_access: Instant,
    access_count: u64,
    cache_file: Path,
}

/// Caches `stat` results and directory children as hashed JSON entries on a
/// second file system, in front of `origin`.
///
/// Reads validate path, schema version and age; stale or foreign entries are
/// deleted asynchronously and treated as misses. Mutations delegate to the
/// origin first, then refresh the affected entries ; the parent refresh runs
/// synchronously so a listing issued right after a write observes it. A
/// background sweeper evicts the least recently used entries.
#[derive(Clone)]
pub struct MetadataCacheFileSystem {
    origin: Arc<dyn FileSystem>,
    store: CacheStore,
    options: MetadataCacheOptions,
    records: Arc<Mutex<HashMap<String, AccessRecord>>>,
    refreshing: Arc<Mutex<HashSet<String>>>,
    refresh_locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
    /// Bumped by invalidation; a refresh that raced an invalidation detects
    /// the bump and retracts its entry instead of resurrecting stale state.
    versions: Arc<Mutex<HashMap<String, u64>>>,
    sweeping: Arc<AtomicBool>,
    shutdown: CancellationToken,
}

impl MetadataCacheFileSystem {
    /// Spawns the eviction sweeper; call from within a tokio runtime.
    pub fn new(
        origin: Arc<dyn FileSystem>,
        cache_fs: Arc<dyn FileSystem>,
        cache_dir: Path,
        options: MetadataCacheOptions,
    ) -> Self {
        let cache = Self {
            origin,
            store: CacheStore::new(cache_fs, cache_dir),
            options,
            records: Arc::new(Mutex::new(HashMap::new())),
            refreshing: Arc::new(Mutex::new(HashSet::new())),
            refresh_locks: Arc::new(Mutex::new(HashMap::new())),
            versions: Arc::new(Mutex::new(HashMap::new())),
            sweeping: Arc::new(AtomicBool::new(false)),
            shutdown: CancellationToken::new(),
        };
        tokio::spawn(run_cleanup_loop(cache.clone()));
        cache
    }

    fn cache_file(&self, path: &Path) -> FsResult<Path> {
        self.store.file_for(&path.to_string(), "json")
    }

    fn lock_records(&self) -> std::sync::MutexGuard<'_, HashMap<String, AccessRecord>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record_access(&self, path: &Path, cache_file: &Path) {
        let mut records = self.lock_records();
        let record = records
            .entry(path.to_string())
            .or_insert_with(|| AccessRecord {
                last_access: Instant::now(),
                access_count: 0,
                cache_file: cache_file.clone(),
            });
        record.last_access = Instant::now();
        record.access_count += 1;
        record.cache_file = cache_file.clone();
    }

    fn version_of(&self, path: &Path) -> u64 {
        *self
            .versions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&path.to_string())
            .unwrap_or(&0)
    }

    fn bump_version(&self, path: &Path) {
        let mut versions = self
            .versions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *versions.entry(path.to_string()).or_insert(0) += 1;
    }

    fn path_lock(&self, path: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .refresh_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Valid cache entry for `path`, or `None`. Invalid entries are deleted
    /// in the background; cache-layer failures count as misses.
    async fn read_entry(&self, ctx: &Context, path: &Path) -> Option<MetadataCacheEntry> {
        let file = self.cache_file(path).ok()?;
        let data = match self.store.read(ctx, &file).await {
            Ok(Some(data)) => data,
            Ok(None) => return None,
            Err(FsError::Cancelled) => return None,
            Err(error) => {
                warn!(path = %path, error = %error, "metadata cache read failed");
                return None;
            }
        };

        let entry: MetadataCacheEntry = match serde_json::from_slice(&data) {
            Ok(entry) => entry,
            Err(error) => {
                debug!(path = %path, error = %error, "corrupt metadata cache entry");
                self.schedule_removal(file);
                return None;
            }
        };

        let age = chrono::Utc::now().timestamp() - entry.last_updated;
        let valid = entry.path == path.to_string()
            && entry.version == ENTRY_VERSION
            && age >= 0
            && age as u64 <= self.options.max_cache_age.as_secs();
        if !valid {
            self.schedule_removal(file);
            return None;
        }

        self.record_access(path, &file);
        Some(entry)
    }

    /// Asynchronous deletion of a cache file that failed validation.
    fn schedule_removal(&self, file: Path) {
        let store = self.store.clone();
        tokio::spawn(async move {
            let ctx = Context::new();
            store.remove_quietly(&ctx, &file).await;
        });
    }

    async fn invalidate(&self, ctx: &Context, path: &Path) {
        self.bump_version(path);
        if let Ok(file) = self.cache_file(path) {
            self.store.remove_quietly(ctx, &file).await;
        }
        self.lock_records().remove(&path.to_string());
    }

    /// Invalidates `path` and every cached descendant the access table
    /// knows about. Used by recursive delete/move/copy so stale subtree
    /// entries cannot outlive the tree.
    async fn invalidate_tree(&self, ctx: &Context, path: &Path) {
        let prefix = format!("{path}/");
        let key = path.to_string();
        let victims: Vec<(String, Path)> = {
            let records = self.lock_records();
            records
                .iter()
                .filter(|(k, _)| **k == key || k.starts_with(&prefix))
                .map(|(k, r)| (k.clone(), r.cache_file.clone()))
                .collect()
        };
        for (record_key, file) in victims {
            if let Ok(victim_path) = record_key.parse::<Path>() {
                self.bump_version(&victim_path);
            }
            self.store.remove_quietly(ctx, &file).await;
            self.lock_records().remove(&record_key);
        }
        // The entry for `path` itself may never have been accessed.
        self.invalidate(ctx, path).await;
    }

    /// Rebuilds the cache entry for `path` from the origin. Failures
    /// invalidate the entry instead of propagating: the caller's own
    /// operation has already succeeded against the origin.
    async fn refresh(&self, ctx: &Context, path: &Path) {
        let lock = self.path_lock(path);
        let _guard = lock.lock().await;
        let version_at_start = self.version_of(path);

        let status = match self.origin.stat(ctx, path).await {
            Ok(Some(status)) => status,
            Ok(None) => {
                self.invalidate(ctx, path).await;
                return;
            }
            Err(error) => {
                warn!(path = %path, error = %error, "metadata refresh failed; invalidating");
                self.invalidate(ctx, path).await;
                return;
            }
        };

        let mut children = None;
        let mut is_large_directory = false;
        if status.is_directory {
            let mut collected = Vec::new();
            let mut stream = match self.origin.list_dir(ctx, path).await {
                Ok(stream) => stream,
                Err(error) => {
                    warn!(path = %path, error = %error, "metadata refresh list failed; invalidating");
                    self.invalidate(ctx, path).await;
                    return;
                }
            };
            loop {
                match stream.next().await {
                    Some(Ok(child)) => {
                        collected.push(child);
                        if collected.len() > self.options.large_directory_threshold {
                            is_large_directory = true;
                            break;
                        }
                    }
                    Some(Err(error)) => {
                        warn!(path = %path, error = %error, "metadata refresh list failed; invalidating");
                        self.invalidate(ctx, path).await;
                        return;
                    }
                    None => break,
                }
            }
            children = (!is_large_directory).then_some(collected);
        }

        let entry = MetadataCacheEntry {
            path: path.to_string(),
            stat: status,
            last_updated: chrono::Utc::now().timestamp(),
            children,
            is_large_directory,
            version: ENTRY_VERSION.to_string(),
        };

        let Ok(file) = self.cache_file(path) else {
            return;
        };
        let Ok(data) = serde_json::to_vec(&entry) else {
            return;
        };
        match self.store.write(ctx, &file, Bytes::from(data)).await {
            Ok(()) => {
                if self.version_of(path) != version_at_start {
                    // An invalidation raced this refresh; retract the entry.
                    self.store.remove_quietly(ctx, &file).await;
                    self.lock_records().remove(&path.to_string());
                    return;
                }
                self.record_access(path, &file);
            }
            // A cache-layer write failure never fails the operation.
            Err(error) => warn!(path = %path, error = %error, "metadata cache write failed"),
        }
    }

    /// Best-effort coalesced background refresh.
    fn spawn_refresh(&self, ctx: &Context, path: &Path) {
        {
            let mut refreshing = self
                .refreshing
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if !refreshing.insert(path.to_string()) {
                return;
            }
        }

        let cache = self.clone();
        let path = path.clone();
        let operation_id = format!("{}/refresh", ctx.operation_id());
        tokio::spawn(async move {
            let ctx = Context::with_operation_id(operation_id);
            cache.refresh(&ctx, &path).await;
            cache
                .refreshing
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .remove(&path.to_string());
        });
    }

    /// Post-write bookkeeping: refresh the target, then its parent,
    /// synchronously so a listing issued right after the write must already
    /// observe it.
    async fn refresh_after_write(&self, ctx: &Context, path: &Path) {
        self.refresh(ctx, path).await;
        if let Some(parent) = path.parent() {
            self.refresh(ctx, &parent).await;
        }
    }

    /// One eviction pass; non-reentrant.
    pub(crate) async fn sweep_once(&self) {
        if self
            .sweeping
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let victims: Vec<(String, Path)> = {
            let records = self.lock_records();
            if records.len() <= self.options.max_cache_size {
                Vec::new()
            } else {
                let mut by_age: Vec<_> = records
                    .iter()
                    .map(|(k, r)| (r.last_access, k.clone(), r.cache_file.clone()))
                    .collect();
                by_age.sort_by_key(|(at, _, _)| *at);
                let count = (records.len() - self.options.max_cache_size)
                    + self.options.cleanup_batch_size;
                by_age
                    .into_iter()
                    .take(count)
                    .map(|(_, k, f)| (k, f))
                    .collect()
            }
        };

        if !victims.is_empty() {
            let ctx = Context::new();
            let mut failures = 0usize;
            let total = victims.len();
            for (key, file) in victims {
                if !self.store.remove_quietly(&ctx, &file).await {
                    failures += 1;
                }
                self.lock_records().remove(&key);
            }
            debug!(evicted = total - failures, failures, "metadata cache sweep");
        }

        self.sweeping.store(false, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub(crate) fn record_count(&self) -> usize {
        self.lock_records().len()
    }
}

async fn run_cleanup_loop(cache: MetadataCacheFileSystem) {
    loop {
        tokio::select! {
            _ = cache.shutdown.cancelled() => return,
            _ = tokio::time::sleep(cache.options.cleanup_interval) => {}
        }
        cache.sweep_once().await;
    }
}

#[async_trait]
impl FileSystem for MetadataCacheFileSystem {
    async fn stat(&self, ctx: &Context, path: &Path) -> FsResult<Option<FileStatus>> {
        ctx.check_cancelled()?;
        if let Some(entry) = self.read_entry(ctx, path).await {
            return Ok(Some(entry.stat));
        }
        let status = self.origin.stat(ctx, path).await?;
        if status.is_some() {
            self.spawn_refresh(ctx, path);
        }
        Ok(status)
    }

    async fn list_dir(&self, ctx: &Context, path: &Path) -> FsResult<StatusStream> {
        ctx.check_cancelled()?;
        if let Some(entry) = self.read_entry(ctx, path).await {
            if !entry.stat.is_directory {
                return Err(FsError::not_a_directory(path));
            }
            // Large directories intentionally cache no children list.
            if let Some(children) = entry.children
                && !entry.is_large_directory
            {
                return Ok(helpers::guard_stream(
                    ctx,
                    stream::iter(children.into_iter().map(Ok)).boxed(),
                ));
            }
        }
        let stream = self.origin.list_dir(ctx, path).await?;
        self.spawn_refresh(ctx, path);
        Ok(stream)
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
        self.origin.open_read(ctx, path, options).await
    }

    async fn open_write(
        &self,
        ctx: &Context,
        path: &Path,
        options: WriteOptions,
    ) -> FsResult<Box<dyn WriteSink>> {
        let inner = self.origin.open_write(ctx, path, options).await?;
        Ok(Box::new(RefreshOnCloseSink {
            inner: Some(inner),
            cache: self.clone(),
            path: path.clone(),
            ctx: ctx.clone(),
        }))
    }

    async fn create_dir(&self, ctx: &Context, path: &Path) -> FsResult<()> {
        self.origin.create_dir(ctx, path).await?;
        self.refresh_after_write(ctx, path).await;
        Ok(())
    }

    async fn create_directory(
        &self,
        ctx: &Context,
        path: &Path,
        options: CreateDirectoryOptions,
    ) -> FsResult<()> {
        self.origin.create_directory(ctx, path, options).await?;
        self.refresh_after_write(ctx, path).await;
        Ok(())
    }

    async fn delete_entry(&self, ctx: &Context, path: &Path) -> FsResult<()> {
        self.origin.delete_entry(ctx, path).await?;
        self.invalidate(ctx, path).await;
        if let Some(parent) = path.parent() {
            self.refresh(ctx, &parent).await;
        }
        Ok(())
    }

    async fn delete(&self, ctx: &Context, path: &Path, options: DeleteOptions) -> FsResult<()> {
        self.origin.delete(ctx, path, options).await?;
        if options.recursive {
            self.invalidate_tree(ctx, path).await;
        } else {
            self.invalidate(ctx, path).await;
        }
        if let Some(parent) = path.parent() {
            self.refresh(ctx, &parent).await;
        }
        Ok(())
    }

    async fn copy_file(&self, ctx: &Context, source: &Path, dest: &Path) -> FsResult<()> {
        self.origin.copy_file(ctx, source, dest).await?;
        self.refresh_after_write(ctx, dest).await;
        Ok(())
    }

    async fn copy(
        &self,
        ctx: &Context,
        source: &Path,
        dest: &Path,
        options: CopyOptions,
    ) -> FsResult<()> {
        self.origin.copy(ctx, source, dest, options).await?;
        if options.recursive {
            self.invalidate_tree(ctx, dest).await;
        }
        self.refresh_after_write(ctx, dest).await;
        Ok(())
    }

    async fn move_file(&self, ctx: &Context, source: &Path, dest: &Path) -> FsResult<()> {
        self.origin.move_file(ctx, source, dest).await?;
        self.invalidate(ctx, source).await;
        if let Some(parent) = source.parent() {
            self.refresh(ctx, &parent).await;
        }
        self.refresh_after_write(ctx, dest).await;
        Ok(())
    }

    async fn move_to(
        &self,
        ctx: &Context,
        source: &Path,
        dest: &Path,
        options: MoveOptions,
    ) -> FsResult<()> {
        self.origin.move_to(ctx, source, dest, options).await?;
        self.invalidate_tree(ctx, source).await;
        if let Some(parent) = source.parent() {
            self.refresh(ctx, &parent).await;
        }
        self.refresh_after_write(ctx, dest).await;
        Ok(())
    }

    async fn dispose(&self) -> FsResult<()> {
        self.shutdown.cancel();
        Ok(())
    }
}

/// Decorates the origin sink so the close-time refresh runs exactly once,
/// including when close surfaces an error from the inner sink.
struct RefreshOnCloseSink {
    inner: Option<Box<dyn WriteSink>>,
    cache: MetadataCacheFileSystem,
    path: Path,
    ctx: Context,
}

#[async_trait]
impl WriteSink for RefreshOnCloseSink {
    async fn write(&mut self, chunk: Bytes) -> FsResult<()> {
        let Some(inner) = self.inner.as_mut() else {
            return Err(FsError::io(&self.path, "write after close"));
        };
        inner.write(chunk).await
    }

    async fn close(&mut self) -> FsResult<()> {
        let Some(mut inner) = self.inner.take() else {
            return Ok(());
        };
        let result = inner.close().await;
        self.cache.refresh_after_write(&self.ctx, &self.path).await;
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;
    use strata_backend::MemoryFileSystem;
    use strata_core::{
        Context, CreateDirectoryOptions, FileSystem, ListOptions, Path, WriteOptions, helpers,
    };

    use super::{MetadataCacheFileSystem, MetadataCacheOptions};

    fn p(s: &str) -> Path {
        s.parse().unwrap()
    }

    fn small_cache(origin: Arc<MemoryFileSystem>) -> MetadataCacheFileSystem {
        MetadataCacheFileSystem::new(
            origin,
            Arc::new(MemoryFileSystem::new()),
            p("/cache"),
            MetadataCacheOptions {
                max_cache_age: Duration::from_secs(3600),
                large_directory_threshold: 3,
                max_cache_size: 4,
                cleanup_interval: Duration::from_secs(3600),
                cleanup_batch_size: 2,
            },
        )
    }

    #[tokio::test]
    async fn listing_after_create_observes_the_new_entry() {
        let origin = Arc::new(MemoryFileSystem::new());
        let cache = small_cache(origin);
        let ctx = Context::new();

        cache
            .create_directory(&ctx, &p("/a"), CreateDirectoryOptions::default())
            .await
            .unwrap();
        let first = helpers::collect(
            cache.list(&ctx, &Path::root(), ListOptions::default()).await.unwrap(),
        )
        .await
        .unwrap();
        assert_eq!(first.len(), 1);

        cache
            .create_directory(&ctx, &p("/b"), CreateDirectoryOptions::default())
            .await
            .unwrap();
        let second = helpers::collect(
            cache.list(&ctx, &Path::root(), ListOptions::default()).await.unwrap(),
        )
        .await
        .unwrap();
        let mut names: Vec<_> = second
            .iter()
            .map(|s| s.path.filename().unwrap().to_string())
            .collect();
        names.sort();
        assert_eq!(names, ["a", "b"]);
    }

    #[tokio::test]
    async fn large_directories_cache_no_children() {
        let origin = Arc::new(MemoryFileSystem::new());
        let cache = small_cache(origin.clone());
        let ctx = Context::new();

        for i in 0..5 {
            cache
                .write_bytes(
                    &ctx,
                    &p(&format!("/f{i}")),
                    Bytes::from_static(b"x"),
                    WriteOptions::default(),
                )
                .await
                .unwrap();
        }

        // The threshold is 3, so the root entry is marked large and every
        // listing goes back to the origin, and still sees all children.
        for _ in 0..2 {
            let listed = helpers::collect(
                cache.list(&ctx, &Path::root(), ListOptions::default()).await.unwrap(),
            )
            .await
            .unwrap();
            assert_eq!(listed.len(), 5);
        }
    }

    #[tokio::test]
    async fn sweep_caps_the_access_table() {
        let origin = Arc::new(MemoryFileSystem::new());
        let cache = small_cache(origin);
        let ctx = Context::new();

        for i in 0..8 {
            let path = p(&format!("/d{i}"));
            cache
                .create_directory(&ctx, &path, CreateDirectoryOptions::default())
                .await
                .unwrap();
            // Cached read so an access record exists.
            cache.stat(&ctx, &path).await.unwrap();
        }
        assert!(cache.record_count() > 4);

        cache.sweep_once().await;
        assert!(
            cache.record_count() <= 4 + 2,
            "records after sweep: {}",
            cache.record_count()
        );
    }

    #[tokio::test]
    async fn stat_serves_from_cache_after_write() {
        let origin = Arc::new(MemoryFileSystem::new());
        let cache = small_cache(origin.clone());
        let ctx = Context::new();

        cache
            .write_bytes(&ctx, &p("/f"), Bytes::from_static(b"abc"), WriteOptions::default())
            .await
            .unwrap();

        let status = cache.stat(&ctx, &p("/f")).await.unwrap().unwrap();
        assert_eq!(status.size, Some(3));
    }
}
