use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt as _;
use futures_util::stream::BoxStream;

use crate::context::Context;
use crate::error::{FsError, FsResult};
use crate::helpers;
use crate::options::{
    CopyOptions, CreateDirectoryOptions, DeleteOptions, ListOptions, MoveOptions, ReadOptions,
    WriteOptions,
};
use crate::path::Path;
use crate::status::FileStatus;

/// Lazy byte sequence produced by `open_read`.
pub type ByteStream = BoxStream<'static, FsResult<Bytes>>;

/// Lazy listing produced by `list`.
pub type StatusStream = BoxStream<'static, FsResult<FileStatus>>;

/// Streaming write handle returned by `open_write`.
///
/// Bytes are durable only after `close` succeeds. Dropping a sink without
/// closing abandons the write; decorating sinks run their bookkeeping exactly
/// once, on `close`.
#[async_trait]
pub trait WriteSink: Send {
    async fn write(&mut self, chunk: Bytes) -> FsResult<()>;
    async fn close(&mut self) -> FsResult<()>;
}

/// The uniform contract every backend implements.
///
/// Backends provide the non-recursive primitives (`list_dir`, `create_dir`,
/// `delete_entry`, single-file `copy_file`/`move_file`); the recursive
/// operations have default implementations built from those primitives by the
/// drivers in [`crate::helpers`]. Decorating backends (alias, union, caches)
/// override whichever operations they intercept.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// `None` means the path does not exist.
    async fn stat(&self, ctx: &Context, path: &Path) -> FsResult<Option<FileStatus>>;

    async fn exists(&self, ctx: &Context, path: &Path) -> FsResult<bool> {
        Ok(self.stat(ctx, path).await?.is_some())
    }

    /// Direct children of a directory, non-recursive.
    async fn list_dir(&self, ctx: &Context, path: &Path) -> FsResult<StatusStream>;

    /// Listing honoring `options.recursive`.
    async fn list(&self, ctx: &Context, path: &Path, options: ListOptions)
    -> FsResult<StatusStream>;

    async fn open_read(
        &self,
        ctx: &Context,
        path: &Path,
        options: ReadOptions,
    ) -> FsResult<ByteStream>;

    async fn open_write(
        &self,
        ctx: &Context,
        path: &Path,
        options: WriteOptions,
    ) -> FsResult<Box<dyn WriteSink>>;

    async fn read_bytes(&self, ctx: &Context, path: &Path, options: ReadOptions) -> FsResult<Bytes> {
        let mut stream = self.open_read(ctx, path, options).await?;
        let mut buf = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    async fn write_bytes(
        &self,
        ctx: &Context,
        path: &Path,
        data: Bytes,
        options: WriteOptions,
    ) -> FsResult<()> {
        let mut sink = self.open_write(ctx, path, options).await?;
        sink.write(data).await?;
        sink.close().await
    }

    /// Create a single directory whose parent already exists.
    async fn create_dir(&self, ctx: &Context, path: &Path) -> FsResult<()>;

    async fn create_directory(
        &self,
        ctx: &Context,
        path: &Path,
        options: CreateDirectoryOptions,
    ) -> FsResult<()> {
        helpers::create_directory_with_options(self, ctx, path, options).await
    }

    /// Remove one file or one empty directory.
    async fn delete_entry(&self, ctx: &Context, path: &Path) -> FsResult<()>;

    async fn delete(&self, ctx: &Context, path: &Path, options: DeleteOptions) -> FsResult<()> {
        helpers::delete_with_options(self, ctx, path, options).await
    }

    /// Copy one file; the destination is overwritten when present. Overwrite
    /// policy is enforced by the copy driver before this is called.
    async fn copy_file(&self, ctx: &Context, source: &Path, dest: &Path) -> FsResult<()> {
        let mut reader = self
            .open_read(ctx, source, ReadOptions::default())
            .await?;
        let mut sink = self
            .open_write(ctx, dest, WriteOptions::overwrite())
            .await?;
        while let Some(chunk) = reader.next().await {
            sink.write(chunk?).await?;
        }
        sink.close().await
    }

    async fn copy(
        &self,
        ctx: &Context,
        source: &Path,
        dest: &Path,
        options: CopyOptions,
    ) -> FsResult<()> {
        helpers::copy_with_options(self, ctx, source, dest, options).await
    }

    /// Move one file; overwrite policy is enforced by the move driver.
    async fn move_file(&self, ctx: &Context, source: &Path, dest: &Path) -> FsResult<()> {
        self.copy_file(ctx, source, dest).await?;
        self.delete_entry(ctx, source).await
    }

    async fn move_to(
        &self,
        ctx: &Context,
        source: &Path,
        dest: &Path,
        options: MoveOptions,
    ) -> FsResult<()> {
        helpers::move_with_options(self, ctx, source, dest, options).await
    }

    /// Release backend resources. Composite backends do not dispose their
    /// inner handles; the component registry owns every backend exactly once.
    async fn dispose(&self) -> FsResult<()> {
        Ok(())
    }
}

/// Resolves a read range against the file size.
///
/// Unset bounds default to the whole file; a range reaching past the end of
/// the file is an error rather than a silent clamp.
pub fn resolve_read_range(path: &Path, size: u64, options: ReadOptions) -> FsResult<(u64, u64)> {
    let start = options.start.unwrap_or(0);
    let end = options.end.unwrap_or(size);
    if start > end || end > size {
        return Err(FsError::io(
            path,
            format!("read range [{start}, {end}) out of bounds for size {size}"),
        ));
    }
    Ok((start, end))
}
