//! Generic drivers that synthesize the recursive operations from the
//! non-recursive backend primitives, plus the pre-open checks shared by every
//! backend.

use std::collections::{HashSet, VecDeque};

use futures_util::StreamExt as _;
use futures_util::stream::{self, BoxStream};

use crate::context::Context;
use crate::error::{FsError, FsResult};
use crate::fs::{FileSystem, StatusStream};
use crate::options::{
    CopyOptions, CreateDirectoryOptions, DeleteOptions, ListOptions, MoveOptions, WriteMode,
};
use crate::path::Path;
use crate::status::FileStatus;

/// Drains a status stream into a vector, propagating the first error.
pub async fn collect(mut stream: StatusStream) -> FsResult<Vec<FileStatus>> {
    let mut out = Vec::new();
    while let Some(item) = stream.next().await {
        out.push(item?);
    }
    Ok(out)
}

/// Wraps a stream so that cancelling the context terminates it with
/// `FsError::Cancelled` at the next chunk boundary.
pub fn guard_stream<T>(
    ctx: &Context,
    inner: BoxStream<'static, FsResult<T>>,
) -> BoxStream<'static, FsResult<T>>
where
    T: Send + 'static,
{
    let cancel = ctx.cancel_token().clone();
    stream::unfold(
        (inner, cancel, false),
        |(mut inner, cancel, done)| async move {
            if done {
                return None;
            }
            if cancel.is_cancelled() {
                return Some((Err(FsError::Cancelled), (inner, cancel, true)));
            }
            let item = tokio::select! {
                _ = cancel.cancelled() => Some(Err(FsError::Cancelled)),
                item = inner.next() => item,
            };
            match item {
                Some(item) => {
                    let done = item.is_err();
                    Some((item, (inner, cancel, done)))
                }
                None => None,
            }
        },
    )
    .boxed()
}

/// Listing entry point for concrete backends: non-recursive listings go to
/// the backend primitive, recursive ones through the breadth-first driver.
pub async fn open_list<F>(
    fs: &F,
    ctx: &Context,
    path: &Path,
    options: ListOptions,
) -> FsResult<StatusStream>
where
    F: FileSystem + Clone + Send + Sync + 'static,
{
    if !options.recursive {
        return fs.list_dir(ctx, path).await;
    }
    match fs.stat(ctx, path).await? {
        None => Err(FsError::not_found(path)),
        Some(status) if !status.is_directory => Err(FsError::not_a_directory(path)),
        Some(_) => Ok(list_recursive(fs, ctx, path)),
    }
}

/// Breadth-first recursive listing over the non-recursive primitive.
///
/// The producer runs on its own task and stops when the consumer drops the
/// stream or the context cancels. A visited set keeps reprojected trees with
/// cycles from looping.
pub fn list_recursive<F>(fs: &F, ctx: &Context, root: &Path) -> StatusStream
where
    F: FileSystem + Clone + Send + Sync + 'static,
{
    let (tx, rx) = tokio::sync::mpsc::channel::<FsResult<FileStatus>>(32);
    let fs = fs.clone();
    let ctx = ctx.clone();
    let root = root.clone();

    tokio::spawn(async move {
        let mut dirs = VecDeque::from([root]);
        let mut visited = HashSet::new();

        while let Some(dir) = dirs.pop_front() {
            if ctx.is_cancelled() {
                let _ = tx.send(Err(FsError::Cancelled)).await;
                return;
            }
            if !visited.insert(dir.to_string()) {
                continue;
            }

            let mut children = match fs.list_dir(&ctx, &dir).await {
                Ok(stream) => stream,
                Err(error) => {
                    let _ = tx.send(Err(error)).await;
                    return;
                }
            };

            while let Some(item) = children.next().await {
                match item {
                    Ok(status) => {
                        if status.is_directory {
                            dirs.push_back(status.path.clone());
                        }
                        if tx.send(Ok(status)).await.is_err() {
                            // Consumer abandoned the stream.
                            return;
                        }
                    }
                    Err(error) => {
                        let _ = tx.send(Err(error)).await;
                        return;
                    }
                }
            }
        }
    });

    stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
    .boxed()
}

/// Driver behind `create_directory`.
///
/// Without `create_parents` the parent must already be a directory. With it,
/// missing ancestors are created root-down; `AlreadyExists` on an ancestor
/// that is a directory is swallowed, while an ancestor occupied by a file
/// surfaces as `NotADirectory`. An existing final target always surfaces as
/// `AlreadyExists`.
pub async fn create_directory_with_options<F>(
    fs: &F,
    ctx: &Context,
    path: &Path,
    options: CreateDirectoryOptions,
) -> FsResult<()>
where
    F: FileSystem + ?Sized,
{
    ctx.check_cancelled()?;
    if path.is_root() {
        return Err(FsError::already_exists(path));
    }

    if !options.create_parents {
        if fs.stat(ctx, path).await?.is_some() {
            return Err(FsError::already_exists(path));
        }
        return fs.create_dir(ctx, path).await;
    }

    let mut current = Path::root();
    for segment in path.segments() {
        ctx.check_cancelled()?;
        current = current.join(segment)?;
        match fs.create_dir(ctx, &current).await {
            Ok(()) => {}
            Err(FsError::AlreadyExists { .. }) => match fs.stat(ctx, &current).await? {
                Some(status) if status.is_directory => {
                    if current == *path {
                        return Err(FsError::already_exists(path));
                    }
                }
                _ => return Err(FsError::not_a_directory(&current)),
            },
            Err(error) => return Err(error),
        }
    }
    Ok(())
}

/// Driver behind `delete`: post-order removal over `delete_entry`.
pub async fn delete_with_options<F>(
    fs: &F,
    ctx: &Context,
    path: &Path,
    options: DeleteOptions,
) -> FsResult<()>
where
    F: FileSystem + ?Sized,
{
    ctx.check_cancelled()?;
    let status = fs
        .stat(ctx, path)
        .await?
        .ok_or_else(|| FsError::not_found(path))?;

    if !status.is_directory {
        return fs.delete_entry(ctx, path).await;
    }

    let children = collect(fs.list_dir(ctx, path).await?).await?;
    if children.is_empty() {
        return fs.delete_entry(ctx, path).await;
    }
    if !options.recursive {
        return Err(FsError::not_empty_directory(path));
    }

    // Discover the whole subtree first, then remove files and directories
    // deepest-first so every directory is empty by the time it goes.
    let mut pending = VecDeque::from(children);
    let mut visited = HashSet::new();
    let mut files = Vec::new();
    let mut dirs = Vec::new();

    while let Some(status) = pending.pop_front() {
        ctx.check_cancelled()?;
        if status.is_directory {
            if !visited.insert(status.path.to_string()) {
                continue;
            }
            let nested = collect(fs.list_dir(ctx, &status.path).await?).await?;
            pending.extend(nested);
            dirs.push(status.path);
        } else {
            files.push(status.path);
        }
    }

    for file in &files {
        ctx.check_cancelled()?;
        fs.delete_entry(ctx, file).await?;
    }
    dirs.sort_by_key(|p| std::cmp::Reverse(p.depth()));
    for dir in &dirs {
        ctx.check_cancelled()?;
        fs.delete_entry(ctx, dir).await?;
    }
    fs.delete_entry(ctx, path).await
}

/// Resolves where a single-file copy/move lands and enforces the overwrite
/// policy: copying onto a directory targets `dest/filename(source)`; an
/// existing file target requires `overwrite`; a missing target requires an
/// existing parent directory.
async fn resolve_file_destination<F>(
    fs: &F,
    ctx: &Context,
    source: &Path,
    dest: &Path,
    overwrite: bool,
) -> FsResult<Path>
where
    F: FileSystem + ?Sized,
{
    let target = match fs.stat(ctx, dest).await? {
        Some(status) if status.is_directory => {
            let name = source
                .filename()
                .ok_or_else(|| FsError::not_a_file(source))?;
            dest.join(name)?
        }
        Some(_) => {
            if !overwrite {
                return Err(FsError::already_exists(dest));
            }
            return Ok(dest.clone());
        }
        None => {
            let parent = dest.parent().unwrap_or_else(Path::root);
            match fs.stat(ctx, &parent).await? {
                Some(status) if status.is_directory => {}
                Some(_) => return Err(FsError::not_a_directory(&parent)),
                None => return Err(FsError::not_found(&parent)),
            }
            return Ok(dest.clone());
        }
    };

    // Copying into a directory: re-check the resolved child.
    match fs.stat(ctx, &target).await? {
        Some(status) if status.is_directory => Err(FsError::already_exists(&target)),
        Some(_) if !overwrite => Err(FsError::already_exists(&target)),
        _ => Ok(target),
    }
}

/// Driver behind `copy`: the cross-product of {file, dir} × {missing, file,
/// dir} destinations.
pub async fn copy_with_options<F>(
    fs: &F,
    ctx: &Context,
    source: &Path,
    dest: &Path,
    options: CopyOptions,
) -> FsResult<()>
where
    F: FileSystem + ?Sized,
{
    ctx.check_cancelled()?;
    let src = fs
        .stat(ctx, source)
        .await?
        .ok_or_else(|| FsError::not_found(source))?;

    if !src.is_directory {
        let target = resolve_file_destination(fs, ctx, source, dest, options.overwrite).await?;
        return fs.copy_file(ctx, source, &target).await;
    }

    if !options.recursive {
        return Err(FsError::recursive_not_specified(source));
    }
    match fs.stat(ctx, dest).await? {
        Some(status) if !status.is_directory => return Err(FsError::already_exists(dest)),
        Some(_) => {}
        None => fs.create_dir(ctx, dest).await?,
    }

    let mut queue = VecDeque::from([(source.clone(), dest.clone())]);
    let mut visited = HashSet::new();

    while let Some((from, to)) = queue.pop_front() {
        ctx.check_cancelled()?;
        if !visited.insert(from.to_string()) {
            continue;
        }
        let children = collect(fs.list_dir(ctx, &from).await?).await?;
        for child in children {
            let Some(name) = child.path.filename() else {
                continue;
            };
            let target = to.join(name)?;
            if child.is_directory {
                match fs.stat(ctx, &target).await? {
                    Some(status) if status.is_directory => {}
                    Some(_) => return Err(FsError::already_exists(&target)),
                    None => fs.create_dir(ctx, &target).await?,
                }
                queue.push_back((child.path, target));
            } else {
                match fs.stat(ctx, &target).await? {
                    Some(status) if status.is_directory => {
                        return Err(FsError::already_exists(&target));
                    }
                    Some(_) if !options.overwrite => {
                        return Err(FsError::already_exists(&target));
                    }
                    _ => {}
                }
                fs.copy_file(ctx, &child.path, &target).await?;
            }
        }
    }
    Ok(())
}

/// Driver behind `move_to`: single files go through the backend's
/// `move_file` primitive; directories copy recursively, then delete the
/// source tree.
pub async fn move_with_options<F>(
    fs: &F,
    ctx: &Context,
    source: &Path,
    dest: &Path,
    options: MoveOptions,
) -> FsResult<()>
where
    F: FileSystem + ?Sized,
{
    ctx.check_cancelled()?;
    let src = fs
        .stat(ctx, source)
        .await?
        .ok_or_else(|| FsError::not_found(source))?;

    if !src.is_directory {
        let target = resolve_file_destination(fs, ctx, source, dest, options.overwrite).await?;
        return fs.move_file(ctx, source, &target).await;
    }

    if !options.recursive {
        return Err(FsError::recursive_not_specified(source));
    }
    copy_with_options(
        fs,
        ctx,
        source,
        dest,
        CopyOptions {
            overwrite: options.overwrite,
            recursive: true,
        },
    )
    .await?;
    fs.delete(ctx, source, DeleteOptions { recursive: true }).await
}

/// Pre-open check for reads: the target must exist and be a file.
pub async fn ensure_read_target<F>(fs: &F, ctx: &Context, path: &Path) -> FsResult<FileStatus>
where
    F: FileSystem + ?Sized,
{
    ctx.check_cancelled()?;
    match fs.stat(ctx, path).await? {
        None => Err(FsError::not_found(path)),
        Some(status) if status.is_directory => Err(FsError::not_a_file(path)),
        Some(status) => Ok(status),
    }
}

/// Pre-open check for writes: a directory target is `NotAFile`, an existing
/// file in `Write` mode is `AlreadyExists`, and a fresh target needs an
/// existing parent directory.
pub async fn ensure_write_target<F>(
    fs: &F,
    ctx: &Context,
    path: &Path,
    mode: WriteMode,
) -> FsResult<()>
where
    F: FileSystem + ?Sized,
{
    ctx.check_cancelled()?;
    match fs.stat(ctx, path).await? {
        Some(status) if status.is_directory => Err(FsError::not_a_file(path)),
        Some(_) if mode == WriteMode::Write => Err(FsError::already_exists(path)),
        Some(_) => Ok(()),
        None => {
            let Some(parent) = path.parent() else {
                return Err(FsError::not_a_file(path));
            };
            match fs.stat(ctx, &parent).await? {
                Some(status) if status.is_directory => Ok(()),
                Some(_) => Err(FsError::not_a_directory(&parent)),
                None => Err(FsError::not_found(&parent)),
            }
        }
    }
}
