use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt as _;
use futures_util::TryStreamExt as _;
use futures_util::stream;
use tokio::io::{AsyncReadExt as _, AsyncSeekExt as _, AsyncWriteExt as _};
use tokio_util::io::ReaderStream;
use tracing::debug;

use strata_core::fs::{ByteStream, StatusStream, WriteSink};
use strata_core::helpers;
use strata_core::{
    Context, FileStatus, FileSystem, FsError, FsResult, ListOptions, Path, ReadOptions, WriteMode,
    WriteOptions,
};

/// OS file-system adapter rooted at a base directory.
///
/// Paths are resolved by joining the normalized segments under `base_dir`,
/// so the exposed tree can never escape the root. Symlinks and special files
/// are unsupported entities: direct operations on them fail, listings skip
/// them.
#[derive(Debug, Clone)]
pub struct LocalFileSystem {
    base_dir: Arc<PathBuf>,
}

impl LocalFileSystem {
    pub fn new(base_dir: impl Into<PathBuf>) -> FsResult<Self> {
        let base_dir = std::path::absolute(base_dir.into())
            .map_err(|e| FsError::io_message(format!("invalid base directory: {e}")))?;
        Ok(Self {
            base_dir: Arc::new(base_dir),
        })
    }

    pub fn base_dir(&self) -> &std::path::Path {
        &self.base_dir
    }

    fn to_local(&self, path: &Path) -> PathBuf {
        let mut local = self.base_dir.as_ref().clone();
        for segment in path.segments() {
            local.push(segment);
        }
        local
    }
}

fn guess_mime(name: &str) -> Option<String> {
    mime_guess::from_path(name).first().map(|m| m.to_string())
}

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn stat(&self, ctx: &Context, path: &Path) -> FsResult<Option<FileStatus>> {
        ctx.check_cancelled()?;
        let local = self.to_local(path);
        let meta = match tokio::fs::symlink_metadata(&local).await {
            Ok(meta) => meta,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(FsError::from_io(path, error)),
        };
        if meta.is_dir() {
            return Ok(Some(FileStatus::directory(path.clone())));
        }
        if meta.is_file() {
            let mime = path.filename().and_then(guess_mime);
            return Ok(Some(FileStatus::file(path.clone(), meta.len(), mime)));
        }
        Err(FsError::unsupported_entity(path))
    }

    async fn list_dir(&self, ctx: &Context, path: &Path) -> FsResult<StatusStream> {
        ctx.check_cancelled()?;
        let local = self.to_local(path);
        let meta = match tokio::fs::symlink_metadata(&local).await {
            Ok(meta) => meta,
            Err(error) => return Err(FsError::from_io(path, error)),
        };
        if !meta.is_dir() {
            return Err(FsError::not_a_directory(path));
        }

        let read_dir = tokio::fs::read_dir(&local)
            .await
            .map_err(|e| FsError::from_io(path, e))?;
        let dir_path = path.clone();
        let entries = stream::try_unfold(read_dir, move |mut read_dir| {
            let dir_path = dir_path.clone();
            async move {
                loop {
                    let Some(entry) = read_dir
                        .next_entry()
                        .await
                        .map_err(|e| FsError::from_io(&dir_path, e))?
                    else {
                        return Ok(None);
                    };
                    let name = entry.file_name().to_string_lossy().to_string();
                    let Ok(child) = dir_path.join(&name) else {
                        continue;
                    };
                    let file_type = entry
                        .file_type()
                        .await
                        .map_err(|e| FsError::from_io(&child, e))?;
                    if file_type.is_dir() {
                        return Ok(Some((FileStatus::directory(child), read_dir)));
                    }
                    if file_type.is_file() {
                        let meta = entry
                            .metadata()
                            .await
                            .map_err(|e| FsError::from_io(&child, e))?;
                        let mime = guess_mime(&name);
                        return Ok(Some((FileStatus::file(child, meta.len(), mime), read_dir)));
                    }
                    debug!(path = %child, "skipping unsupported directory entry");
                }
            }
        });
        Ok(helpers::guard_stream(ctx, entries.boxed()))
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
        let status = helpers::ensure_read_target(self, ctx, path).await?;
        let size = status.size.unwrap_or(0);
        let (start, end) = strata_core::resolve_read_range(path, size, options)?;

        let local = self.to_local(path);
        let mut file = tokio::fs::File::open(&local)
            .await
            .map_err(|e| FsError::from_io(path, e))?;
        if start > 0 {
            file.seek(std::io::SeekFrom::Start(start))
                .await
                .map_err(|e| FsError::from_io(path, e))?;
        }
        let reader = file.take(end - start);
        let error_path = path.clone();
        let bytes = ReaderStream::new(reader)
            .map_err(move |e| FsError::from_io(&error_path, e))
            .boxed();
        Ok(helpers::guard_stream(ctx, bytes))
    }

    async fn open_write(
        &self,
        ctx: &Context,
        path: &Path,
        options: WriteOptions,
    ) -> FsResult<Box<dyn WriteSink>> {
        helpers::ensure_write_target(self, ctx, path, options.mode).await?;
        let local = self.to_local(path);

        match options.mode {
            WriteMode::Append => {
                let file = tokio::fs::OpenOptions::new()
                    .append(true)
                    .create(true)
                    .open(&local)
                    .await
                    .map_err(|e| FsError::from_io(path, e))?;
                Ok(Box::new(LocalWriteSink {
                    file: Some(file),
                    tmp: None,
                    final_path: local,
                    path: path.clone(),
                    ctx: ctx.clone(),
                    closed: false,
                }))
            }
            WriteMode::Write | WriteMode::Overwrite => {
                // Write to a temp name and rename on close so concurrent
                // readers never observe a short file.
                let file_name = path.filename().ok_or_else(|| FsError::not_a_file(path))?;
                let tmp = local.with_file_name(format!("{file_name}.partial"));
                let _ = tokio::fs::remove_file(&tmp).await;
                let file = tokio::fs::File::create(&tmp)
                    .await
                    .map_err(|e| FsError::from_io(path, e))?;
                Ok(Box::new(LocalWriteSink {
                    file: Some(file),
                    tmp: Some(tmp),
                    final_path: local,
                    path: path.clone(),
                    ctx: ctx.clone(),
                    closed: false,
                }))
            }
        }
    }

    async fn create_dir(&self, ctx: &Context, path: &Path) -> FsResult<()> {
        ctx.check_cancelled()?;
        tokio::fs::create_dir(self.to_local(path))
            .await
            .map_err(|e| FsError::from_io(path, e))
    }

    async fn delete_entry(&self, ctx: &Context, path: &Path) -> FsResult<()> {
        ctx.check_cancelled()?;
        let local = self.to_local(path);
        let meta = tokio::fs::symlink_metadata(&local)
            .await
            .map_err(|e| FsError::from_io(path, e))?;
        if meta.is_dir() {
            return tokio::fs::remove_dir(&local)
                .await
                .map_err(|e| FsError::from_io(path, e));
        }
        if meta.is_file() {
            return tokio::fs::remove_file(&local)
                .await
                .map_err(|e| FsError::from_io(path, e));
        }
        Err(FsError::unsupported_entity(path))
    }

    async fn copy_file(&self, ctx: &Context, source: &Path, dest: &Path) -> FsResult<()> {
        ctx.check_cancelled()?;
        tokio::fs::copy(self.to_local(source), self.to_local(dest))
            .await
            .map(|_| ())
            .map_err(|e| FsError::from_io(dest, e))
    }

    async fn move_file(&self, ctx: &Context, source: &Path, dest: &Path) -> FsResult<()> {
        ctx.check_cancelled()?;
        tokio::fs::rename(self.to_local(source), self.to_local(dest))
            .await
            .map_err(|e| FsError::from_io(dest, e))
    }
}

struct LocalWriteSink {
    file: Option<tokio::fs::File>,
    tmp: Option<PathBuf>,
    final_path: PathBuf,
    path: Path,
    ctx: Context,
    closed: bool,
}

#[async_trait]
impl WriteSink for LocalWriteSink {
    async fn write(&mut self, chunk: Bytes) -> FsResult<()> {
        self.ctx.check_cancelled()?;
        let Some(file) = self.file.as_mut() else {
            return Err(FsError::io(&self.path, "write after close"));
        };
        file.write_all(&chunk)
            .await
            .map_err(|e| FsError::from_io(&self.path, e))
    }

    async fn close(&mut self) -> FsResult<()> {
        self.ctx.check_cancelled()?;
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let Some(mut file) = self.file.take() else {
            return Ok(());
        };
        file.flush()
            .await
            .map_err(|e| FsError::from_io(&self.path, e))?;
        drop(file);

        if let Some(tmp) = self.tmp.take() {
            let _ = tokio::fs::remove_file(&self.final_path).await;
            tokio::fs::rename(&tmp, &self.final_path)
                .await
                .map_err(|e| FsError::from_io(&self.path, e))?;
        }
        Ok(())
    }
}
