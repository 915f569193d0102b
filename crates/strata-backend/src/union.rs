use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt as _;
use futures_util::stream;

use strata_core::fs::{ByteStream, StatusStream, WriteSink};
use strata_core::helpers;
use strata_core::{
    Context, CopyOptions, CreateDirectoryOptions, DeleteOptions, FileStatus, FileSystem, FsError,
    FsResult, ListOptions, MoveOptions, Path, ReadOptions, WriteOptions,
};

/// One member of a union: an inner file system grafted at `mount_path`.
///
/// The inner handle is shared, not owned; the component registry owns each
/// backend exactly once.
pub struct UnionItem {
    pub fs: Arc<dyn FileSystem>,
    pub mount_path: Path,
    pub priority: i32,
    pub read_only: bool,
}

/// Merges N inner file systems at their mount paths.
///
/// Resolution order is priority-descending with configuration order breaking
/// ties; reads serve from the first candidate that knows the path, writes are
/// strictly routed to the first writable candidate.
#[derive(Clone)]
pub struct UnionFileSystem {
    items: Arc<Vec<UnionItem>>,
}

impl UnionFileSystem {
    pub fn new(mut items: Vec<UnionItem>) -> Self {
        // Stable sort: equal priorities keep configuration order.
        items.sort_by_key(|item| std::cmp::Reverse(item.priority));
        Self {
            items: Arc::new(items),
        }
    }

    /// Items that can serve `path`, in resolution order, with the path
    /// translated into each item's namespace.
    fn candidates<'a>(
        &'a self,
        path: &'a Path,
    ) -> impl Iterator<Item = (usize, &'a UnionItem, Path)> + 'a {
        self.items.iter().enumerate().filter_map(move |(idx, item)| {
            path.strip_prefix(&item.mount_path)
                .map(|translated| (idx, item, translated))
        })
    }

    /// First candidate whose inner file system knows the path.
    async fn resolve_read(
        &self,
        ctx: &Context,
        path: &Path,
    ) -> FsResult<Option<(usize, Path, FileStatus)>> {
        for (idx, item, translated) in self.candidates(path) {
            if let Some(status) = item.fs.stat(ctx, &translated).await? {
                return Ok(Some((idx, translated, status)));
            }
        }
        Ok(None)
    }

    /// First writable candidate; writes never fall back past it.
    fn resolve_write(&self, path: &Path) -> FsResult<(usize, Path)> {
        for (idx, item, translated) in self.candidates(path) {
            if !item.read_only {
                return Ok((idx, translated));
            }
        }
        Err(FsError::permission_denied(path))
    }

    /// Directory synthesized for mount points nothing backs explicitly.
    fn synthesized_dir(&self, path: &Path) -> Option<FileStatus> {
        if path.is_root() || self.items.iter().any(|item| item.mount_path.starts_with(path)) {
            return Some(FileStatus::directory(path.clone()));
        }
        None
    }
}

#[async_trait]
impl FileSystem for UnionFileSystem {
    async fn stat(&self, ctx: &Context, path: &Path) -> FsResult<Option<FileStatus>> {
        ctx.check_cancelled()?;
        if let Some((_, _, status)) = self.resolve_read(ctx, path).await? {
            return Ok(Some(status.at_path(path.clone())));
        }
        Ok(self.synthesized_dir(path))
    }

    async fn list_dir(&self, ctx: &Context, path: &Path) -> FsResult<StatusStream> {
        ctx.check_cancelled()?;
        match self.stat(ctx, path).await? {
            None => return Err(FsError::not_found(path)),
            Some(status) if !status.is_directory => return Err(FsError::not_a_directory(path)),
            Some(_) => {}
        }

        let mut seen = HashSet::new();
        let mut merged = Vec::new();

        for (_, item, translated) in self.candidates(path) {
            let children = match item.fs.list_dir(ctx, &translated).await {
                Ok(stream) => helpers::collect(stream).await?,
                // A candidate that does not back this directory contributes
                // nothing; lower-priority candidates still get their turn.
                Err(FsError::NotFound { .. }) | Err(FsError::NotADirectory { .. }) => continue,
                Err(error) => return Err(error),
            };
            for status in children {
                let Some(name) = status.path.filename() else {
                    continue;
                };
                if !seen.insert(name.to_string()) {
                    continue;
                }
                let rebased = path.join(name)?;
                merged.push(status.at_path(rebased));
            }
        }

        // Mount points themselves appear as directories in their parent.
        for item in self.items.iter() {
            if item.mount_path.starts_with(path) && item.mount_path != *path {
                let segment = &item.mount_path.segments()[path.depth()];
                if seen.insert(segment.clone()) {
                    merged.push(FileStatus::directory(path.join(segment)?));
                }
            }
        }

        Ok(helpers::guard_stream(
            ctx,
            stream::iter(merged.into_iter().map(Ok)).boxed(),
        ))
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
        ctx.check_cancelled()?;
        let (idx, translated, status) = self
            .resolve_read(ctx, path)
            .await?
            .ok_or_else(|| FsError::not_found(path))?;
        if status.is_directory {
            return Err(FsError::not_a_file(path));
        }
        self.items[idx].fs.open_read(ctx, &translated, options).await
    }

    async fn open_write(
        &self,
        ctx: &Context,
        path: &Path,
        options: WriteOptions,
    ) -> FsResult<Box<dyn WriteSink>> {
        ctx.check_cancelled()?;
        let (idx, translated) = self.resolve_write(path)?;
        self.items[idx].fs.open_write(ctx, &translated, options).await
    }

    async fn create_dir(&self, ctx: &Context, path: &Path) -> FsResult<()> {
        ctx.check_cancelled()?;
        let (idx, translated) = self.resolve_write(path)?;
        self.items[idx].fs.create_dir(ctx, &translated).await
    }

    async fn create_directory(
        &self,
        ctx: &Context,
        path: &Path,
        options: CreateDirectoryOptions,
    ) -> FsResult<()> {
        ctx.check_cancelled()?;
        let (idx, translated) = self.resolve_write(path)?;
        self.items[idx]
            .fs
            .create_directory(ctx, &translated, options)
            .await
    }

    async fn delete_entry(&self, ctx: &Context, path: &Path) -> FsResult<()> {
        ctx.check_cancelled()?;
        let (idx, translated) = self.resolve_write(path)?;
        self.items[idx].fs.delete_entry(ctx, &translated).await
    }

    async fn delete(&self, ctx: &Context, path: &Path, options: DeleteOptions) -> FsResult<()> {
        ctx.check_cancelled()?;
        let (idx, translated) = self.resolve_write(path)?;
        self.items[idx].fs.delete(ctx, &translated, options).await
    }

    async fn copy(
        &self,
        ctx: &Context,
        source: &Path,
        dest: &Path,
        options: CopyOptions,
    ) -> FsResult<()> {
        ctx.check_cancelled()?;
        let src = self.resolve_read(ctx, source).await?;
        let dst = self.resolve_write(dest)?;
        if let Some((src_idx, src_translated, _)) = src
            && src_idx == dst.0
        {
            // Same inner file system on both sides: let it copy natively.
            return self.items[dst.0]
                .fs
                .copy(ctx, &src_translated, &dst.1, options)
                .await;
        }
        helpers::copy_with_options(self, ctx, source, dest, options).await
    }

    async fn move_to(
        &self,
        ctx: &Context,
        source: &Path,
        dest: &Path,
        options: MoveOptions,
    ) -> FsResult<()> {
        ctx.check_cancelled()?;
        let src = self.resolve_read(ctx, source).await?;
        let dst = self.resolve_write(dest)?;
        if let Some((src_idx, src_translated, _)) = src
            && src_idx == dst.0
            && !self.items[src_idx].read_only
        {
            return self.items[dst.0]
                .fs
                .move_to(ctx, &src_translated, &dst.1, options)
                .await;
        }
        helpers::move_with_options(self, ctx, source, dest, options).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use strata_core::{
        Context, CreateDirectoryOptions, FileSystem, FsError, ListOptions, Path, ReadOptions,
        WriteOptions, helpers,
    };

    use super::{UnionFileSystem, UnionItem};
    use crate::memory::MemoryFileSystem;

    fn p(s: &str) -> Path {
        s.parse().unwrap()
    }

    async fn two_member_union() -> UnionFileSystem {
        let ctx = Context::new();

        let a = Arc::new(MemoryFileSystem::new());
        a.write_bytes(&ctx, &p("/file1.txt"), Bytes::from_static(b"a1"), WriteOptions::default())
            .await
            .unwrap();
        a.create_directory(&ctx, &p("/dir1"), CreateDirectoryOptions::default())
            .await
            .unwrap();

        let b = Arc::new(MemoryFileSystem::new());
        b.write_bytes(&ctx, &p("/file2.txt"), Bytes::from_static(b"b2"), WriteOptions::default())
            .await
            .unwrap();

        UnionFileSystem::new(vec![
            UnionItem {
                fs: a,
                mount_path: Path::root(),
                priority: 0,
                read_only: false,
            },
            UnionItem {
                fs: b,
                mount_path: p("/fs2"),
                priority: 0,
                read_only: false,
            },
        ])
    }

    #[tokio::test]
    async fn merged_listing_includes_mount_entries() {
        let union = two_member_union().await;
        let ctx = Context::new();

        let children = helpers::collect(
            union
                .list(&ctx, &Path::root(), ListOptions::default())
                .await
                .unwrap(),
        )
        .await
        .unwrap();
        let mut names: Vec<_> = children
            .iter()
            .map(|s| s.path.filename().unwrap().to_string())
            .collect();
        names.sort();
        assert_eq!(names, ["dir1", "file1.txt", "fs2"]);

        let data = union
            .read_bytes(&ctx, &p("/fs2/file2.txt"), ReadOptions::default())
            .await
            .unwrap();
        assert_eq!(&data[..], b"b2");
    }

    #[tokio::test]
    async fn mount_paths_stat_as_synthesized_directories() {
        let union = two_member_union().await;
        let ctx = Context::new();

        let status = union.stat(&ctx, &p("/fs2")).await.unwrap().unwrap();
        assert!(status.is_directory);
        assert_eq!(status.path.to_string(), "/fs2");
    }

    #[tokio::test]
    async fn read_only_union_rejects_writes() {
        let ctx = Context::new();
        let a = Arc::new(MemoryFileSystem::new());
        let union = UnionFileSystem::new(vec![UnionItem {
            fs: a,
            mount_path: Path::root(),
            priority: 0,
            read_only: true,
        }]);

        let err = union
            .write_bytes(&ctx, &p("/x"), Bytes::from_static(b"x"), WriteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FsError::PermissionDenied { .. }));
    }

    #[tokio::test]
    async fn higher_priority_candidate_shadows_lower() {
        let ctx = Context::new();

        let low = Arc::new(MemoryFileSystem::new());
        low.write_bytes(&ctx, &p("/f"), Bytes::from_static(b"low"), WriteOptions::default())
            .await
            .unwrap();
        let high = Arc::new(MemoryFileSystem::new());
        high.write_bytes(&ctx, &p("/f"), Bytes::from_static(b"high"), WriteOptions::default())
            .await
            .unwrap();

        let union = UnionFileSystem::new(vec![
            UnionItem {
                fs: low,
                mount_path: Path::root(),
                priority: 1,
                read_only: false,
            },
            UnionItem {
                fs: high,
                mount_path: Path::root(),
                priority: 5,
                read_only: false,
            },
        ]);

        let data = union
            .read_bytes(&ctx, &p("/f"), ReadOptions::default())
            .await
            .unwrap();
        assert_eq!(&data[..], b"high");
    }

    #[tokio::test]
    async fn writes_route_past_read_only_candidates() {
        let ctx = Context::new();

        let frozen = Arc::new(MemoryFileSystem::new());
        let writable = Arc::new(MemoryFileSystem::new());
        let union = UnionFileSystem::new(vec![
            UnionItem {
                fs: frozen,
                mount_path: Path::root(),
                priority: 5,
                read_only: true,
            },
            UnionItem {
                fs: writable.clone(),
                mount_path: Path::root(),
                priority: 0,
                read_only: false,
            },
        ]);

        union
            .write_bytes(&ctx, &p("/w"), Bytes::from_static(b"w"), WriteOptions::default())
            .await
            .unwrap();
        let data = writable
            .read_bytes(&ctx, &p("/w"), ReadOptions::default())
            .await
            .unwrap();
        assert_eq!(&data[..], b"w");
    }
}
