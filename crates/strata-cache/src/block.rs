use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt as _;
use futures_util::stream;
use tracing::{debug, warn};

use strata_core::fs::{ByteStream, StatusStream, WriteSink};
use strata_core::helpers;
use strata_core::{
    Context, CopyOptions, CreateDirectoryOptions, DeleteOptions, FileStatus, FileSystem, FsError,
    FsResult, ListOptions, MoveOptions, Path, ReadOptions, WriteOptions,
};

use crate::layout::CacheStore;

#[derive(Debug, Clone, Copy)]
pub struct BlockCacheOptions {
    pub block_size: u64,
    pub read_ahead_blocks: u32,
    pub enable_read_ahead: bool,
}

impl Default for BlockCacheOptions {
    fn default() -> Self {
        Self {
            block_size: 4 * 1024 * 1024,
            read_ahead_blocks: 2,
            enable_read_ahead: true,
        }
    }
}

fn block_key(path: &Path, generation: u64, index: u64) -> String {
    if generation == 0 {
        format!("{path}:{index}")
    } else {
        format!("{path}:{generation}:{index}")
    }
}

/// Fixed-size block cache over ranged origin reads.
///
/// Each cached artifact is the raw bytes of one `block_size`-aligned window
/// of the origin file (the last block may be shorter), keyed by
/// `hash(path:index)`. Cache writes are best-effort: a failed write is
/// logged and the read proceeds from origin data. Writes to a path bump its
/// in-memory generation (so stale blocks can never be served again) and
/// delete the old block files in the background.
#[derive(Clone)]
pub struct BlockCacheFileSystem {
    origin: Arc<dyn FileSystem>,
    store: CacheStore,
    options: BlockCacheOptions,
    generations: Arc<Mutex<HashMap<String, u64>>>,
    read_ahead_inflight: Arc<Mutex<HashSet<String>>>,
}

impl BlockCacheFileSystem {
    pub fn new(
        origin: Arc<dyn FileSystem>,
        cache_fs: Arc<dyn FileSystem>,
        cache_dir: Path,
        options: BlockCacheOptions,
    ) -> Self {
        Self {
            origin,
            store: CacheStore::new(cache_fs, cache_dir),
            options,
            generations: Arc::new(Mutex::new(HashMap::new())),
            read_ahead_inflight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn generation(&self, path: &Path) -> u64 {
        *self
            .generations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&path.to_string())
            .unwrap_or(&0)
    }

    fn block_file(&self, path: &Path, index: u64) -> FsResult<Path> {
        self.store
            .file_for(&block_key(path, self.generation(path), index), "blk")
    }

    /// One block, from cache or origin; misses are written back
    /// best-effort.
    async fn load_block(&self, ctx: &Context, path: &Path, index: u64, total: u64) -> FsResult<Bytes> {
        let block_start = index * self.options.block_size;
        let expected = self.options.block_size.min(total - block_start);
        let file = self.block_file(path, index)?;

        match self.store.read(ctx, &file).await {
            Ok(Some(data)) if data.len() as u64 == expected => return Ok(data),
            Ok(Some(_)) => {
                // Size mismatch: the origin changed behind our back.
                debug!(path = %path, index, "discarding stale cached block");
            }
            Ok(None) => {}
            Err(FsError::Cancelled) => return Err(FsError::Cancelled),
            Err(error) => {
                warn!(path = %path, index, error = %error, "block cache read failed");
            }
        }

        let data = self
            .origin
            .read_bytes(
                ctx,
                path,
                ReadOptions::range(block_start, block_start + expected),
            )
            .await?;
        if data.len() as u64 != expected {
            return Err(FsError::io(
                path,
                format!(
                    "origin returned {} bytes for block {index}, expected {expected}",
                    data.len()
                ),
            ));
        }

        if let Err(error) = self.store.write(ctx, &file, data.clone()).await {
            // Cache-layer failure never fails the read.
            warn!(path = %path, index, error = %error, "block cache write failed");
        }
        Ok(data)
    }

    /// Background fetches for the blocks following `served`, deduplicated
    /// and never blocking the foreground read.
    fn spawn_read_ahead(&self, ctx: &Context, path: &Path, served: u64, total: u64) {
        if total == 0 {
            return;
        }
        let last_block = (total - 1) / self.options.block_size;
        let until = served
            .saturating_add(u64::from(self.options.read_ahead_blocks))
            .min(last_block);

        for index in served + 1..=until {
            let key = block_key(path, self.generation(path), index);
            {
                let mut inflight = self
                    .read_ahead_inflight
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                if !inflight.insert(key.clone()) {
                    continue;
                }
            }

            let cache = self.clone();
            let ctx = ctx.clone();
            let path = path.clone();
            tokio::spawn(async move {
                if let Err(error) = cache.load_block(&ctx, &path, index, total).await {
                    debug!(path = %path, index, error = %error, "read-ahead fetch failed");
                }
                cache
                    .read_ahead_inflight
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .remove(&key);
            });
        }
    }

    /// Retires every cached block of `path`. The generation bump makes old
    /// keys unreachable immediately; the old files are deleted in the
    /// background when the pre-write size is known.
    fn invalidate_blocks(&self, path: &Path, old_size: Option<u64>) {
        let old_generation = self.generation(path);
        {
            let mut generations = self
                .generations
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *generations.entry(path.to_string()).or_insert(0) += 1;
        }

        let Some(size) = old_size else { return };
        if size == 0 {
            return;
        }
        let files: Vec<Path> = (0..size.div_ceil(self.options.block_size))
            .filter_map(|index| {
                self.store
                    .file_for(&block_key(path, old_generation, index), "blk")
                    .ok()
            })
            .collect();

        let store = self.store.clone();
        tokio::spawn(async move {
            let ctx = Context::new();
            for file in files {
                store.remove_quietly(&ctx, &file).await;
            }
        });
    }

    async fn size_of(&self, ctx: &Context, path: &Path) -> Option<u64> {
        self.origin
            .stat(ctx, path)
            .await
            .ok()
            .flatten()
            .and_then(|status| status.size)
    }
}

#[async_trait]
impl FileSystem for BlockCacheFileSystem {
    async fn stat(&self, ctx: &Context, path: &Path) -> FsResult<Option<FileStatus>> {
        self.origin.stat(ctx, path).await
    }

    async fn list_dir(&self, ctx: &Context, path: &Path) -> FsResult<StatusStream> {
        self.origin.list_dir(ctx, path).await
    }

    async fn list(
        &self,
        ctx: &Context,
        path: &Path,
        options: ListOptions,
    ) -> FsResult<StatusStream> {
        self.origin.list(ctx, path, options).await
    }

    async fn open_read(
        &self,
        ctx: &Context,
        path: &Path,
        options: ReadOptions,
    ) -> FsResult<ByteStream> {
        let status = helpers::ensure_read_target(self, ctx, path).await?;
        let total = status.size.unwrap_or(0);
        let (start, end) = strata_core::resolve_read_range(path, total, options)?;
        if start == end {
            return Ok(stream::empty().boxed());
        }

        struct ReadState {
            cache: BlockCacheFileSystem,
            ctx: Context,
            path: Path,
            next: u64,
            last: u64,
            start: u64,
            end: u64,
            total: u64,
            done: bool,
        }

        let state = ReadState {
            cache: self.clone(),
            ctx: ctx.clone(),
            path: path.clone(),
            next: start / self.options.block_size,
            last: (end - 1) / self.options.block_size,
            start,
            end,
            total,
            done: false,
        };

        Ok(stream::unfold(state, |mut state| async move {
            if state.done || state.next > state.last {
                return None;
            }
            if let Err(error) = state.ctx.check_cancelled() {
                state.done = true;
                return Some((Err(error), state));
            }

            let index = state.next;
            state.next += 1;
            let block_size = state.cache.options.block_size;

            match state
                .cache
                .load_block(&state.ctx, &state.path, index, state.total)
                .await
            {
                Ok(data) => {
                    if state.cache.options.enable_read_ahead {
                        state
                            .cache
                            .spawn_read_ahead(&state.ctx, &state.path, index, state.total);
                    }
                    let block_start = index * block_size;
                    let lo = state.start.max(block_start) - block_start;
                    let hi = state.end.min(block_start + data.len() as u64) - block_start;
                    Some((Ok(data.slice(lo as usize..hi as usize)), state))
                }
                Err(error) => {
                    state.done = true;
                    Some((Err(error), state))
                }
            }
        })
        .boxed())
    }

    async fn open_write(
        &self,
        ctx: &Context,
        path: &Path,
        options: WriteOptions,
    ) -> FsResult<Box<dyn WriteSink>> {
        let old_size = self.size_of(ctx, path).await;
        let inner = self.origin.open_write(ctx, path, options).await?;
        Ok(Box::new(InvalidateOnCloseSink {
            inner: Some(inner),
            cache: self.clone(),
            path: path.clone(),
            old_size,
        }))
    }

    async fn create_dir(&self, ctx: &Context, path: &Path) -> FsResult<()> {
        self.origin.create_dir(ctx, path).await
    }

    async fn create_directory(
        &self,
        ctx: &Context,
        path: &Path,
        options: CreateDirectoryOptions,
    ) -> FsResult<()> {
        self.origin.create_directory(ctx, path, options).await
    }

    async fn delete_entry(&self, ctx: &Context, path: &Path) -> FsResult<()> {
        let old_size = self.size_of(ctx, path).await;
        self.origin.delete_entry(ctx, path).await?;
        self.invalidate_blocks(path, old_size);
        Ok(())
    }

    async fn delete(&self, ctx: &Context, path: &Path, options: DeleteOptions) -> FsResult<()> {
        let old_size = self.size_of(ctx, path).await;
        self.origin.delete(ctx, path, options).await?;
        self.invalidate_blocks(path, old_size);
        Ok(())
    }

    async fn copy_file(&self, ctx: &Context, source: &Path, dest: &Path) -> FsResult<()> {
        let old_size = self.size_of(ctx, dest).await;
        self.origin.copy_file(ctx, source, dest).await?;
        self.invalidate_blocks(dest, old_size);
        Ok(())
    }

    async fn copy(
        &self,
        ctx: &Context,
        source: &Path,
        dest: &Path,
        options: CopyOptions,
    ) -> FsResult<()> {
        let old_size = self.size_of(ctx, dest).await;
        self.origin.copy(ctx, source, dest, options).await?;
        self.invalidate_blocks(dest, old_size);
        Ok(())
    }

    async fn move_file(&self, ctx: &Context, source: &Path, dest: &Path) -> FsResult<()> {
        let source_size = self.size_of(ctx, source).await;
        let dest_size = self.size_of(ctx, dest).await;
        self.origin.move_file(ctx, source, dest).await?;
        self.invalidate_blocks(source, source_size);
        self.invalidate_blocks(dest, dest_size);
        Ok(())
    }

    async fn move_to(
        &self,
        ctx: &Context,
        source: &Path,
        dest: &Path,
        options: MoveOptions,
    ) -> FsResult<()> {
        let source_size = self.size_of(ctx, source).await;
        let dest_size = self.size_of(ctx, dest).await;
        self.origin.move_to(ctx, source, dest, options).await?;
        self.invalidate_blocks(source, source_size);
        self.invalidate_blocks(dest, dest_size);
        Ok(())
    }
}

/// Retires cached blocks exactly once when the write completes.
struct InvalidateOnCloseSink {
    inner: Option<Box<dyn WriteSink>>,
    cache: BlockCacheFileSystem,
    path: Path,
    old_size: Option<u64>,
}

#[async_trait]
impl WriteSink for InvalidateOnCloseSink {
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
        self.cache.invalidate_blocks(&self.path, self.old_size);
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use bytes::Bytes;
    use strata_backend::MemoryFileSystem;
    use strata_core::fs::{ByteStream, StatusStream, WriteSink};
    use strata_core::{
        Context, FileStatus, FileSystem, FsResult, ListOptions, Path, ReadOptions, WriteOptions,
    };

    use super::{BlockCacheFileSystem, BlockCacheOptions};

    fn p(s: &str) -> Path {
        s.parse().unwrap()
    }

    /// Memory origin that counts ranged opens.
    #[derive(Clone)]
    struct CountingFs {
        inner: MemoryFileSystem,
        reads: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl FileSystem for CountingFs {
        async fn stat(&self, ctx: &Context, path: &Path) -> FsResult<Option<FileStatus>> {
            self.inner.stat(ctx, path).await
        }
        async fn list_dir(&self, ctx: &Context, path: &Path) -> FsResult<StatusStream> {
            self.inner.list_dir(ctx, path).await
        }
        async fn list(
            &self,
            ctx: &Context,
            path: &Path,
            options: ListOptions,
        ) -> FsResult<StatusStream> {
            self.inner.list(ctx, path, options).await
        }
        async fn open_read(
            &self,
            ctx: &Context,
            path: &Path,
            options: ReadOptions,
        ) -> FsResult<ByteStream> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.open_read(ctx, path, options).await
        }
        async fn open_write(
            &self,
            ctx: &Context,
            path: &Path,
            options: WriteOptions,
        ) -> FsResult<Box<dyn WriteSink>> {
            self.inner.open_write(ctx, path, options).await
        }
        async fn create_dir(&self, ctx: &Context, path: &Path) -> FsResult<()> {
            self.inner.create_dir(ctx, path).await
        }
        async fn delete_entry(&self, ctx: &Context, path: &Path) -> FsResult<()> {
            self.inner.delete_entry(ctx, path).await
        }
    }

    fn block_cache(origin: CountingFs, block_size: u64, read_ahead: bool) -> BlockCacheFileSystem {
        BlockCacheFileSystem::new(
            Arc::new(origin),
            Arc::new(MemoryFileSystem::new()),
            p("/blocks"),
            BlockCacheOptions {
                block_size,
                read_ahead_blocks: 2,
                enable_read_ahead: read_ahead,
            },
        )
    }

    #[tokio::test]
    async fn range_read_assembles_blocks_and_caches_them() {
        let ctx = Context::new();
        let origin = CountingFs {
            inner: MemoryFileSystem::new(),
            reads: Arc::new(AtomicUsize::new(0)),
        };
        origin
            .inner
            .write_bytes(&ctx, &p("/f"), Bytes::from_static(b"0123456789"), WriteOptions::default())
            .await
            .unwrap();
        let reads = origin.reads.clone();
        let cache = block_cache(origin, 4, false);

        let data = cache
            .read_bytes(&ctx, &p("/f"), ReadOptions::range(2, 8))
            .await
            .unwrap();
        assert_eq!(&data[..], b"234567");
        // Blocks 0 and 1 were each fetched once.
        assert_eq!(reads.load(Ordering::SeqCst), 2);

        // Same range again: served entirely from the cache.
        let data = cache
            .read_bytes(&ctx, &p("/f"), ReadOptions::range(2, 8))
            .await
            .unwrap();
        assert_eq!(&data[..], b"234567");
        assert_eq!(reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn short_final_block_is_handled() {
        let ctx = Context::new();
        let origin = CountingFs {
            inner: MemoryFileSystem::new(),
            reads: Arc::new(AtomicUsize::new(0)),
        };
        origin
            .inner
            .write_bytes(&ctx, &p("/f"), Bytes::from_static(b"0123456789"), WriteOptions::default())
            .await
            .unwrap();
        let cache = block_cache(origin, 4, false);

        // The last block holds only two bytes.
        let data = cache
            .read_bytes(&ctx, &p("/f"), ReadOptions::range(8, 10))
            .await
            .unwrap();
        assert_eq!(&data[..], b"89");

        let all = cache
            .read_bytes(&ctx, &p("/f"), ReadOptions::default())
            .await
            .unwrap();
        assert_eq!(&all[..], b"0123456789");
    }

    #[tokio::test]
    async fn writes_invalidate_cached_blocks() {
        let ctx = Context::new();
        let origin = CountingFs {
            inner: MemoryFileSystem::new(),
            reads: Arc::new(AtomicUsize::new(0)),
        };
        origin
            .inner
            .write_bytes(&ctx, &p("/f"), Bytes::from_static(b"aaaabbbb"), WriteOptions::default())
            .await
            .unwrap();
        let cache = block_cache(origin, 4, false);

        let first = cache
            .read_bytes(&ctx, &p("/f"), ReadOptions::default())
            .await
            .unwrap();
        assert_eq!(&first[..], b"aaaabbbb");

        cache
            .write_bytes(&ctx, &p("/f"), Bytes::from_static(b"cccc"), WriteOptions::overwrite())
            .await
            .unwrap();
        let second = cache
            .read_bytes(&ctx, &p("/f"), ReadOptions::default())
            .await
            .unwrap();
        assert_eq!(&second[..], b"cccc");
    }

    #[tokio::test]
    async fn read_ahead_fills_following_blocks() {
        let ctx = Context::new();
        let origin = CountingFs {
            inner: MemoryFileSystem::new(),
            reads: Arc::new(AtomicUsize::new(0)),
        };
        origin
            .inner
            .write_bytes(
                &ctx,
                &p("/f"),
                Bytes::from(vec![b'z'; 16]),
                WriteOptions::default(),
            )
            .await
            .unwrap();
        let reads = origin.reads.clone();
        let cache = block_cache(origin, 4, true);

        // Reading block 0 schedules blocks 1 and 2 in the background.
        let data = cache
            .read_bytes(&ctx, &p("/f"), ReadOptions::range(0, 4))
            .await
            .unwrap();
        assert_eq!(data.len(), 4);

        // Wait for the read-ahead tasks to land.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let after_read_ahead = reads.load(Ordering::SeqCst);
        assert!(after_read_ahead >= 3, "expected read-ahead fetches, saw {after_read_ahead}");

        // Blocks 1 and 2 now come from the cache.
        cache
            .read_bytes(&ctx, &p("/f"), ReadOptions::range(4, 12))
            .await
            .unwrap();
        assert_eq!(reads.load(Ordering::SeqCst), after_read_ahead);
    }
}
