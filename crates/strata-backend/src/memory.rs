use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt as _;
use futures_util::stream;

use strata_core::fs::{ByteStream, StatusStream, WriteSink};
use strata_core::helpers;
use strata_core::{
    Context, FileStatus, FileSystem, FsError, FsResult, ListOptions, Path, ReadOptions, WriteMode,
    WriteOptions,
};

/// In-process byte-map file system: one map for file contents, one set for
/// directories. The root directory always exists.
#[derive(Debug, Clone, Default)]
pub struct MemoryFileSystem {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    files: HashMap<String, Bytes>,
    dirs: HashSet<String>,
}

impl MemoryState {
    fn status_of(&self, path: &Path) -> Option<FileStatus> {
        let key = path.to_string();
        if path.is_root() || self.dirs.contains(&key) {
            return Some(FileStatus::directory(path.clone()));
        }
        self.files.get(&key).map(|data| {
            FileStatus::file(path.clone(), data.len() as u64, guess_mime(path))
        })
    }

    fn children_of(&self, path: &Path) -> Vec<FileStatus> {
        let prefix = if path.is_root() {
            "/".to_string()
        } else {
            format!("{path}/")
        };
        let direct = |key: &str| -> Option<String> {
            let rest = key.strip_prefix(&prefix)?;
            if rest.is_empty() || rest.contains('/') {
                return None;
            }
            Some(rest.to_string())
        };

        let mut out = Vec::new();
        for key in &self.dirs {
            if let Some(name) = direct(key)
                && let Ok(child) = path.join(&name)
            {
                out.push(FileStatus::directory(child));
            }
        }
        for (key, data) in &self.files {
            if let Some(name) = direct(key)
                && let Ok(child) = path.join(&name)
            {
                let mime = guess_mime(&child);
                out.push(FileStatus::file(child, data.len() as u64, mime));
            }
        }
        out.sort_by(|a, b| a.path.cmp(&b.path));
        out
    }

    fn has_children(&self, path: &Path) -> bool {
        let prefix = format!("{path}/");
        self.dirs.iter().chain(self.files.keys()).any(|k| k.starts_with(&prefix))
    }
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn guess_mime(path: &Path) -> Option<String> {
    let name = path.filename()?;
    mime_guess::from_path(name).first().map(|m| m.to_string())
}

#[async_trait]
impl FileSystem for MemoryFileSystem {
    async fn stat(&self, ctx: &Context, path: &Path) -> FsResult<Option<FileStatus>> {
        ctx.check_cancelled()?;
        Ok(self.lock().status_of(path))
    }

    async fn list_dir(&self, ctx: &Context, path: &Path) -> FsResult<StatusStream> {
        ctx.check_cancelled()?;
        let children = {
            let state = self.lock();
            match state.status_of(path) {
                None => return Err(FsError::not_found(path)),
                Some(status) if !status.is_directory => {
                    return Err(FsError::not_a_directory(path));
                }
                Some(_) => state.children_of(path),
            }
        };
        Ok(helpers::guard_stream(
            ctx,
            stream::iter(children.into_iter().map(Ok)).boxed(),
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
        helpers::ensure_read_target(self, ctx, path).await?;
        let data = {
            let state = self.lock();
            state
                .files
                .get(&path.to_string())
                .cloned()
                .ok_or_else(|| FsError::not_found(path))?
        };
        let (start, end) = strata_core::resolve_read_range(path, data.len() as u64, options)?;
        let slice = data.slice(start as usize..end as usize);
        Ok(helpers::guard_stream(
            ctx,
            stream::iter([Ok(slice)]).boxed(),
        ))
    }

    async fn open_write(
        &self,
        ctx: &Context,
        path: &Path,
        options: WriteOptions,
    ) -> FsResult<Box<dyn WriteSink>> {
        helpers::ensure_write_target(self, ctx, path, options.mode).await?;
        Ok(Box::new(MemoryWriteSink {
            state: self.state.clone(),
            path: path.clone(),
            mode: options.mode,
            buffer: BytesMut::new(),
            ctx: ctx.clone(),
            closed: false,
        }))
    }

    async fn create_dir(&self, ctx: &Context, path: &Path) -> FsResult<()> {
        ctx.check_cancelled()?;
        let mut state = self.lock();
        if state.status_of(path).is_some() {
            return Err(FsError::already_exists(path));
        }
        let parent = path.parent().ok_or_else(|| FsError::already_exists(path))?;
        match state.status_of(&parent) {
            Some(status) if status.is_directory => {}
            Some(_) => return Err(FsError::not_a_directory(&parent)),
            None => return Err(FsError::not_found(&parent)),
        }
        state.dirs.insert(path.to_string());
        Ok(())
    }

    async fn delete_entry(&self, ctx: &Context, path: &Path) -> FsResult<()> {
        ctx.check_cancelled()?;
        let mut state = self.lock();
        if path.is_root() {
            return Err(FsError::permission_denied(path));
        }
        let key = path.to_string();
        if state.files.remove(&key).is_some() {
            return Ok(());
        }
        if state.dirs.contains(&key) {
            if state.has_children(path) {
                return Err(FsError::not_empty_directory(path));
            }
            state.dirs.remove(&key);
            return Ok(());
        }
        Err(FsError::not_found(path))
    }

    async fn copy_file(&self, ctx: &Context, source: &Path, dest: &Path) -> FsResult<()> {
        ctx.check_cancelled()?;
        let mut state = self.lock();
        let data = state
            .files
            .get(&source.to_string())
            .cloned()
            .ok_or_else(|| FsError::not_found(source))?;
        state.files.insert(dest.to_string(), data);
        Ok(())
    }

    async fn move_file(&self, ctx: &Context, source: &Path, dest: &Path) -> FsResult<()> {
        ctx.check_cancelled()?;
        let mut state = self.lock();
        let data = state
            .files
            .remove(&source.to_string())
            .ok_or_else(|| FsError::not_found(source))?;
        state.files.insert(dest.to_string(), data);
        Ok(())
    }
}

/// Buffering sink that materializes the file on `close`.
struct MemoryWriteSink {
    state: Arc<Mutex<MemoryState>>,
    path: Path,
    mode: WriteMode,
    buffer: BytesMut,
    ctx: Context,
    closed: bool,
}

#[async_trait]
impl WriteSink for MemoryWriteSink {
    async fn write(&mut self, chunk: Bytes) -> FsResult<()> {
        self.ctx.check_cancelled()?;
        if self.closed {
            return Err(FsError::io(&self.path, "write after close"));
        }
        self.buffer.extend_from_slice(&chunk);
        Ok(())
    }

    async fn close(&mut self) -> FsResult<()> {
        self.ctx.check_cancelled()?;
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let key = self.path.to_string();
        let data = match self.mode {
            WriteMode::Append => {
                let mut combined = BytesMut::from(
                    state.files.get(&key).cloned().unwrap_or_default().as_ref(),
                );
                combined.extend_from_slice(&self.buffer);
                combined.freeze()
            }
            WriteMode::Write | WriteMode::Overwrite => self.buffer.split().freeze(),
        };
        state.files.insert(key, data);
        Ok(())
    }
}
