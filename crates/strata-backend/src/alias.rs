use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt as _;

use strata_core::fs::{ByteStream, StatusStream, WriteSink};
use strata_core::{
    Context, CopyOptions, CreateDirectoryOptions, DeleteOptions, FileStatus, FileSystem, FsResult,
    ListOptions, MoveOptions, Path, ReadOptions, WriteOptions,
};

/// Reprojects a sub-tree of an inner file system to the root.
///
/// Every input path is rebased under `sub_directory` before delegation, and
/// every result path is rebased back. Results that fall outside the sub-tree
/// do not belong to the alias and are dropped.
#[derive(Clone)]
pub struct AliasFileSystem {
    inner: Arc<dyn FileSystem>,
    sub_directory: Path,
}

impl AliasFileSystem {
    pub fn new(inner: Arc<dyn FileSystem>, sub_directory: Path) -> Self {
        Self {
            inner,
            sub_directory,
        }
    }

    fn rebase_in(&self, path: &Path) -> FsResult<Path> {
        self.sub_directory.join_all(path.segments())
    }

    fn rebase_out(&self, status: FileStatus) -> Option<FileStatus> {
        let rebased = status.path.strip_prefix(&self.sub_directory)?;
        Some(status.at_path(rebased))
    }

    fn rebase_stream(&self, inner: StatusStream) -> StatusStream {
        let sub = self.sub_directory.clone();
        inner
            .filter_map(move |item| {
                let sub = sub.clone();
                async move {
                    match item {
                        Ok(status) => status
                            .path
                            .strip_prefix(&sub)
                            .map(|rebased| Ok(status.at_path(rebased))),
                        Err(error) => Some(Err(error)),
                    }
                }
            })
            .boxed()
    }
}

#[async_trait]
impl FileSystem for AliasFileSystem {
    async fn stat(&self, ctx: &Context, path: &Path) -> FsResult<Option<FileStatus>> {
        let inner_path = self.rebase_in(path)?;
        Ok(self
            .inner
            .stat(ctx, &inner_path)
            .await?
            .and_then(|status| self.rebase_out(status)))
    }

    async fn list_dir(&self, ctx: &Context, path: &Path) -> FsResult<StatusStream> {
        let inner_path = self.rebase_in(path)?;
        let stream = self.inner.list_dir(ctx, &inner_path).await?;
        Ok(self.rebase_stream(stream))
    }

    async fn list(
        &self,
        ctx: &Context,
        path: &Path,
        options: ListOptions,
    ) -> FsResult<StatusStream> {
        let inner_path = self.rebase_in(path)?;
        let stream = self.inner.list(ctx, &inner_path, options).await?;
        Ok(self.rebase_stream(stream))
    }

    async fn open_read(
        &self,
        ctx: &Context,
        path: &Path,
        options: ReadOptions,
    ) -> FsResult<ByteStream> {
        let inner_path = self.rebase_in(path)?;
        self.inner.open_read(ctx, &inner_path, options).await
    }

    async fn open_write(
        &self,
        ctx: &Context,
        path: &Path,
        options: WriteOptions,
    ) -> FsResult<Box<dyn WriteSink>> {
        let inner_path = self.rebase_in(path)?;
        self.inner.open_write(ctx, &inner_path, options).await
    }

    async fn read_bytes(&self, ctx: &Context, path: &Path, options: ReadOptions) -> FsResult<Bytes> {
        let inner_path = self.rebase_in(path)?;
        self.inner.read_bytes(ctx, &inner_path, options).await
    }

    async fn write_bytes(
        &self,
        ctx: &Context,
        path: &Path,
        data: Bytes,
        options: WriteOptions,
    ) -> FsResult<()> {
        let inner_path = self.rebase_in(path)?;
        self.inner.write_bytes(ctx, &inner_path, data, options).await
    }

    async fn create_dir(&self, ctx: &Context, path: &Path) -> FsResult<()> {
        let inner_path = self.rebase_in(path)?;
        self.inner.create_dir(ctx, &inner_path).await
    }

    async fn create_directory(
        &self,
        ctx: &Context,
        path: &Path,
        options: CreateDirectoryOptions,
    ) -> FsResult<()> {
        let inner_path = self.rebase_in(path)?;
        self.inner.create_directory(ctx, &inner_path, options).await
    }

    async fn delete_entry(&self, ctx: &Context, path: &Path) -> FsResult<()> {
        let inner_path = self.rebase_in(path)?;
        self.inner.delete_entry(ctx, &inner_path).await
    }

    async fn delete(&self, ctx: &Context, path: &Path, options: DeleteOptions) -> FsResult<()> {
        let inner_path = self.rebase_in(path)?;
        self.inner.delete(ctx, &inner_path, options).await
    }

    async fn copy_file(&self, ctx: &Context, source: &Path, dest: &Path) -> FsResult<()> {
        self.inner
            .copy_file(ctx, &self.rebase_in(source)?, &self.rebase_in(dest)?)
            .await
    }

    async fn copy(
        &self,
        ctx: &Context,
        source: &Path,
        dest: &Path,
        options: CopyOptions,
    ) -> FsResult<()> {
        self.inner
            .copy(ctx, &self.rebase_in(source)?, &self.rebase_in(dest)?, options)
            .await
    }

    async fn move_file(&self, ctx: &Context, source: &Path, dest: &Path) -> FsResult<()> {
        self.inner
            .move_file(ctx, &self.rebase_in(source)?, &self.rebase_in(dest)?)
            .await
    }

    async fn move_to(
        &self,
        ctx: &Context,
        source: &Path,
        dest: &Path,
        options: MoveOptions,
    ) -> FsResult<()> {
        self.inner
            .move_to(ctx, &self.rebase_in(source)?, &self.rebase_in(dest)?, options)
            .await
    }

    // The inner file system is shared, not owned; the component registry
    // disposes it exactly once.
}
