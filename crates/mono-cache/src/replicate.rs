//! Parallel tree replication
//!
//! The replicator walks a source tree and recreates it at a destination,
//! hardlinking regular files, recreating symlinks with their literal target
//! strings, and falling back to a byte copy when the filesystem refuses
//! hardlinks (cross-device, unsupported). Two shapes share the per-entry
//! logic:
//!
//! - [`seed_tree`]: two-phase and parallel. A single-threaded walk collects
//!   directories (pre-order) and files in lexical order, applying
//!   artifact-specific skip rules; then a bounded worker pool drains the
//!   file list with a per-file timeout and a no-progress watchdog.
//! - [`hardlink_tree`]: single-threaded, no skip rules, no timeouts. Used
//!   when the source is a well-formed cache entry being fanned back into a
//!   workspace.
//!
//! Source symlinks are never followed: replication acts on `lstat` results,
//! so a symlink in the source is a symlink in the destination.

use mono_core::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

#[cfg(unix)]
use std::os::unix::fs::symlink;
#[cfg(windows)]
use std::os::windows::fs::symlink_file as symlink;

const DEFAULT_NUM_WORKERS: usize = 16;
const DEFAULT_PROGRESS_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_FILE_TIMEOUT: Duration = Duration::from_secs(10);
const WATCHDOG_TICK: Duration = Duration::from_secs(5);

/// Options for [`seed_tree`].
#[derive(Debug, Clone)]
pub struct SeedOptions {
    /// Artifact name driving the skip rules (`"cargo"` skips object files,
    /// incremental state, and the in-flight build marker).
    pub artifact_name: String,
    /// Operation name used in log lines and stall errors
    /// ("seeding", "restoring", ...).
    pub operation: String,
    /// Size of the worker pool draining the file queue.
    pub num_workers: usize,
    /// Abort the whole replication when no file completes within this
    /// window.
    pub progress_timeout: Duration,
    /// Give up waiting on a single file operation after this long. The
    /// underlying blocking task is abandoned, not interrupted: it may still
    /// complete in the background after the error is returned.
    pub file_timeout: Duration,
}

impl Default for SeedOptions {
    fn default() -> Self {
        Self {
            artifact_name: String::new(),
            operation: "seeding".into(),
            num_workers: DEFAULT_NUM_WORKERS,
            progress_timeout: DEFAULT_PROGRESS_TIMEOUT,
            file_timeout: DEFAULT_FILE_TIMEOUT,
        }
    }
}

impl SeedOptions {
    /// Default options with the skip rules of the given artifact.
    #[must_use]
    pub fn for_artifact(name: impl Into<String>) -> Self {
        Self {
            artifact_name: name.into(),
            ..Self::default()
        }
    }

    /// Set the operation name used in logs and stall errors.
    #[must_use]
    pub fn operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = operation.into();
        self
    }
}

struct DirSpec {
    path: PathBuf,
    perm: std::fs::Permissions,
}

struct FileSpec {
    src: PathBuf,
    dst: PathBuf,
}

struct ReplicationPlan {
    dirs: Vec<DirSpec>,
    files: Vec<FileSpec>,
}

fn walk_err(e: walkdir::Error) -> Error {
    let path = e.path().map(Path::to_path_buf);
    match e.into_io_error() {
        Some(io) => match path {
            Some(p) => Error::io(io, p, "walk"),
            None => Error::io_no_path(io, "walk"),
        },
        None => Error::configuration("filesystem loop detected during walk"),
    }
}

/// Walk phase: collect directories pre-order and files in lexical order,
/// applying skip rules. A directory whose relative path (with trailing `/`)
/// matches a skip rule is not descended into.
fn plan_replication(src: &Path, dst: &Path, artifact: &str) -> Result<ReplicationPlan> {
    let mut dirs = Vec::new();
    let mut files = Vec::new();

    let mut walker = WalkDir::new(src).sort_by_file_name().into_iter();
    while let Some(entry) = walker.next() {
        let entry = entry.map_err(walk_err)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|_| {
                Error::configuration(format!(
                    "walked path {} is not under {}",
                    entry.path().display(),
                    src.display()
                ))
            })?
            .to_path_buf();
        let rel_str = rel.to_string_lossy();

        if entry.file_type().is_dir() {
            if !rel_str.is_empty() && should_skip_path(&format!("{rel_str}/"), artifact) {
                walker.skip_current_dir();
                continue;
            }
            let meta = entry.metadata().map_err(walk_err)?;
            dirs.push(DirSpec {
                path: dst.join(&rel),
                perm: meta.permissions(),
            });
        } else {
            if should_skip_path(&rel_str, artifact) {
                continue;
            }
            files.push(FileSpec {
                src: entry.path().to_path_buf(),
                dst: dst.join(&rel),
            });
        }
    }

    Ok(ReplicationPlan { dirs, files })
}

fn create_dirs(dirs: &[DirSpec]) -> Result<()> {
    for dir in dirs {
        std::fs::create_dir_all(&dir.path)
            .map_err(|e| Error::io(e, &dir.path, "create_dir_all"))?;
        std::fs::set_permissions(&dir.path, dir.perm.clone())
            .map_err(|e| Error::io(e, &dir.path, "set_permissions"))?;
    }
    Ok(())
}

/// Replicate `src` into `dst` with a parallel worker pool.
///
/// Directories are created (with their source modes) before any file beneath
/// them; files are then claimed by `num_workers` workers in walk order, with
/// no guarantee of completion order. The first worker error cancels the
/// rest; a watchdog cancels everything when no file completes within
/// `progress_timeout`.
///
/// # Errors
///
/// Surfaces the first per-file error, [`Error::FileTimeout`] for a wedged
/// file operation, or [`Error::Stalled`] when the watchdog fired.
pub async fn seed_tree(src: &Path, dst: &Path, opts: SeedOptions) -> Result<()> {
    let plan = {
        let src = src.to_path_buf();
        let dst = dst.to_path_buf();
        let artifact = opts.artifact_name.clone();
        tokio::task::spawn_blocking(move || plan_replication(&src, &dst, &artifact))
            .await
            .map_err(|e| Error::configuration(format!("replication walk panicked: {e}")))??
    };

    tracing::info!(
        operation = %opts.operation,
        artifact = %opts.artifact_name,
        files = plan.files.len(),
        src = %src.display(),
        "replicating tree"
    );

    let started = Instant::now();

    let dirs = plan.dirs;
    tokio::task::spawn_blocking(move || create_dirs(&dirs))
        .await
        .map_err(|e| Error::configuration(format!("directory creation panicked: {e}")))??;

    let total = plan.files.len();
    if total == 0 {
        return Ok(());
    }

    let files = Arc::new(plan.files);
    let cursor = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicU64::new(0));
    // Milliseconds since `started` at the last successful file completion.
    let last_progress = Arc::new(AtomicU64::new(0));
    let stalled = Arc::new(AtomicBool::new(false));
    let cancel = CancellationToken::new();

    let watchdog = tokio::spawn(watchdog_loop(
        started,
        Arc::clone(&last_progress),
        Arc::clone(&stalled),
        cancel.clone(),
        opts.progress_timeout,
    ));

    let mut workers = JoinSet::new();
    for _ in 0..opts.num_workers.max(1) {
        workers.spawn(worker_loop(
            Arc::clone(&files),
            Arc::clone(&cursor),
            Arc::clone(&completed),
            Arc::clone(&last_progress),
            cancel.clone(),
            started,
            opts.file_timeout,
        ));
    }

    let mut first_error: Option<Error> = None;
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
            Err(e) => {
                if first_error.is_none() {
                    first_error = Some(Error::configuration(format!(
                        "replication worker panicked: {e}"
                    )));
                }
            }
        }
    }
    cancel.cancel();
    let _ = watchdog.await;

    if let Some(err) = first_error {
        return Err(err);
    }
    if stalled.load(Ordering::Relaxed) {
        return Err(Error::Stalled {
            operation: opts.operation.clone(),
            waited: opts.progress_timeout,
        });
    }

    tracing::info!(
        operation = %opts.operation,
        artifact = %opts.artifact_name,
        files = completed.load(Ordering::Relaxed),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "tree replicated"
    );
    Ok(())
}

async fn watchdog_loop(
    started: Instant,
    last_progress: Arc<AtomicU64>,
    stalled: Arc<AtomicBool>,
    cancel: CancellationToken,
    progress_timeout: Duration,
) {
    let mut tick = tokio::time::interval(WATCHDOG_TICK);
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = tick.tick() => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                let last_ms = last_progress.load(Ordering::Relaxed);
                if elapsed_ms.saturating_sub(last_ms) > progress_timeout.as_millis() as u64 {
                    tracing::warn!(
                        timeout_secs = progress_timeout.as_secs(),
                        "no replication progress, cancelling workers"
                    );
                    stalled.store(true, Ordering::Relaxed);
                    cancel.cancel();
                    return;
                }
            }
        }
    }
}

async fn worker_loop(
    files: Arc<Vec<FileSpec>>,
    cursor: Arc<AtomicUsize>,
    completed: Arc<AtomicU64>,
    last_progress: Arc<AtomicU64>,
    cancel: CancellationToken,
    started: Instant,
    file_timeout: Duration,
) -> Result<()> {
    loop {
        // Cancellation is observed between files, never mid-file.
        if cancel.is_cancelled() {
            return Ok(());
        }
        let idx = cursor.fetch_add(1, Ordering::Relaxed);
        let Some(file) = files.get(idx) else {
            return Ok(());
        };

        if let Err(e) = link_or_copy_with_timeout(&file.src, &file.dst, file_timeout).await {
            cancel.cancel();
            return Err(e);
        }

        last_progress.store(started.elapsed().as_millis() as u64, Ordering::Relaxed);
        let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
        if done % 1000 == 0 {
            tracing::debug!(files_done = done, "replication progress");
        }
    }
}

async fn link_or_copy_with_timeout(src: &Path, dst: &Path, timeout: Duration) -> Result<()> {
    let path = src.to_path_buf();
    with_file_timeout(src, timeout, {
        let dst = dst.to_path_buf();
        move || link_or_copy(&path, &dst)
    })
    .await
}

async fn with_file_timeout<F>(path: &Path, timeout: Duration, op: F) -> Result<()>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    let work = tokio::task::spawn_blocking(op);
    match tokio::time::timeout(timeout, work).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(Error::configuration(format!(
            "file replication panicked: {e}"
        ))),
        // The abandoned blocking task may still complete in the background.
        Err(_) => Err(Error::FileTimeout {
            path: path.into(),
            waited: timeout,
        }),
    }
}

/// Replicate one directory entry: recreate symlinks verbatim, hardlink
/// regular files, fall back to a byte copy when the filesystem refuses the
/// link. An already-existing destination counts as success.
pub(crate) fn link_or_copy(src: &Path, dst: &Path) -> Result<()> {
    let meta = std::fs::symlink_metadata(src).map_err(|e| Error::io(e, src, "lstat"))?;

    if meta.file_type().is_symlink() {
        let target = std::fs::read_link(src).map_err(|e| Error::io(e, src, "readlink"))?;
        return match symlink(&target, dst) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(Error::io(e, dst, "symlink")),
        };
    }

    match std::fs::hard_link(src, dst) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) if is_hardlink_unsupported(&e) => match std::fs::copy(src, dst) {
            Ok(_) => Ok(()),
            Err(e) => Err(Error::io(e, dst, "copy")),
        },
        Err(e) => Err(Error::io(e, dst, "link")),
    }
}

/// Single-threaded recursive hardlink of `src` into `dst` with the same
/// per-entry semantics as [`seed_tree`] but no skip rules, workers, or
/// timeouts.
///
/// # Errors
///
/// Surfaces the first I/O error with path context.
pub fn hardlink_tree(src: &Path, dst: &Path) -> Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(walk_err)?;
        let rel = match entry.path().strip_prefix(src) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        let target = dst.join(rel);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| Error::io(e, &target, "create_dir_all"))?;
            let meta = entry.metadata().map_err(walk_err)?;
            std::fs::set_permissions(&target, meta.permissions())
                .map_err(|e| Error::io(e, &target, "set_permissions"))?;
        } else {
            link_or_copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Byte-copy `src` into `dst`, preserving modes and recreating symlinks
/// verbatim. Used when a rename into the cache crosses devices.
pub(crate) fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(walk_err)?;
        let rel = match entry.path().strip_prefix(src) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        let target = dst.join(rel);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| Error::io(e, &target, "create_dir_all"))?;
            let meta = entry.metadata().map_err(walk_err)?;
            std::fs::set_permissions(&target, meta.permissions())
                .map_err(|e| Error::io(e, &target, "set_permissions"))?;
        } else if entry.file_type().is_symlink() {
            let link = std::fs::read_link(entry.path())
                .map_err(|e| Error::io(e, entry.path(), "readlink"))?;
            match symlink(&link, &target) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(Error::io(e, &target, "symlink")),
            }
        } else {
            std::fs::copy(entry.path(), &target).map_err(|e| Error::io(e, &target, "copy"))?;
        }
    }
    Ok(())
}

fn is_cross_device(err: &std::io::Error) -> bool {
    // Prefer the structured kind; the message match covers platforms that
    // do not classify EXDEV.
    err.kind() == std::io::ErrorKind::CrossesDevices
        || err.to_string().contains("cross-device link")
}

fn is_hardlink_unsupported(err: &std::io::Error) -> bool {
    is_cross_device(err)
        || err.kind() == std::io::ErrorKind::Unsupported
        || err.to_string().contains("operation not supported")
}

pub(crate) fn rename_is_cross_device(err: &std::io::Error) -> bool {
    is_cross_device(err)
}

/// Whether a path relative to the replication root is excluded from cache
/// entries for the given artifact. Directory paths are checked with a
/// trailing `/`.
pub(crate) fn should_skip_path(rel: &str, artifact: &str) -> bool {
    match artifact {
        "cargo" => should_skip_cargo_path(rel),
        _ => false,
    }
}

fn should_skip_cargo_path(rel: &str) -> bool {
    if rel.ends_with(".o") || rel.ends_with(".d") {
        return true;
    }
    if rel.contains("/incremental/") || rel.starts_with("incremental/") {
        return true;
    }
    // In-flight build marker, not a lockfile.
    rel == ".cargo-lock"
}
