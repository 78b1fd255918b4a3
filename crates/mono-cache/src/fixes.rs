//! Toolchain-specific post-restore fixes
//!
//! Cached trees embed assumptions from the workspace that built them;
//! right after a restore those assumptions are repaired per toolchain.
//! The dispatch table below is the extension point: adding a toolchain
//! means adding a row.

use mono_core::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::task::JoinSet;

const TOUCH_WORKERS: usize = 8;

enum Fix {
    /// Reset mtimes on cargo's `dep-*` fingerprint files so the next build
    /// re-validates instead of trusting timestamps recorded for a different
    /// workspace path.
    TouchCargoFingerprints,
    /// Drop `node_modules/.bin`: its symlink targets encode absolute paths
    /// from the installing workspace. The follow-up install recreates it.
    RemoveNodeBinDir,
}

const FIXES: &[(&str, Fix)] = &[
    ("cargo", Fix::TouchCargoFingerprints),
    ("npm", Fix::RemoveNodeBinDir),
    ("yarn", Fix::RemoveNodeBinDir),
    ("pnpm", Fix::RemoveNodeBinDir),
    ("bun", Fix::RemoveNodeBinDir),
];

/// Apply the post-restore fix for `artifact` to a freshly materialized
/// path. Artifacts without a table entry are a no-op.
pub async fn apply_post_restore_fixes(artifact: &str, materialized: &Path) -> Result<()> {
    let Some((_, fix)) = FIXES.iter().find(|(name, _)| *name == artifact) else {
        return Ok(());
    };
    match fix {
        Fix::TouchCargoFingerprints => touch_cargo_fingerprints(materialized).await,
        Fix::RemoveNodeBinDir => remove_node_bin_dir(materialized).await,
    }
}

async fn touch_cargo_fingerprints(target_dir: &Path) -> Result<()> {
    let now = filetime::FileTime::now();

    for profile in ["debug", "release"] {
        let fingerprint_dir = target_dir.join(profile).join(".fingerprint");
        if !fingerprint_dir.is_dir() {
            continue;
        }

        let dep_files = {
            let dir = fingerprint_dir.clone();
            tokio::task::spawn_blocking(move || collect_dep_files(&dir))
                .await
                .map_err(|e| Error::configuration(format!("fingerprint scan panicked: {e}")))??
        };
        if dep_files.is_empty() {
            continue;
        }

        tracing::debug!(
            dir = %fingerprint_dir.display(),
            files = dep_files.len(),
            "touching fingerprint dep files"
        );

        let files = Arc::new(dep_files);
        let cursor = Arc::new(AtomicUsize::new(0));
        let mut workers = JoinSet::new();
        for _ in 0..TOUCH_WORKERS {
            let files = Arc::clone(&files);
            let cursor = Arc::clone(&cursor);
            workers.spawn_blocking(move || -> Result<()> {
                loop {
                    let idx = cursor.fetch_add(1, Ordering::Relaxed);
                    let Some(path) = files.get(idx) else {
                        return Ok(());
                    };
                    filetime::set_file_times(path, now, now)
                        .map_err(|e| Error::io(e, path, "touch"))?;
                }
            });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(e) => {
                    return Err(Error::configuration(format!("touch worker panicked: {e}")));
                }
            }
        }
    }

    Ok(())
}

/// Fingerprint layout is `<dir>/<crate-hash>/dep-*`; only regular `dep-`
/// files count. Unreadable crate dirs are skipped.
fn collect_dep_files(fingerprint_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dep_files = Vec::new();

    let crates = std::fs::read_dir(fingerprint_dir)
        .map_err(|e| Error::io(e, fingerprint_dir, "read_dir"))?;
    for crate_entry in crates {
        let crate_entry = crate_entry.map_err(|e| Error::io(e, fingerprint_dir, "read_dir"))?;
        let crate_dir = crate_entry.path();
        if !crate_dir.is_dir() {
            continue;
        }
        let Ok(entries) = std::fs::read_dir(&crate_dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                continue;
            }
            if entry.file_name().to_string_lossy().starts_with("dep-") {
                dep_files.push(path);
            }
        }
    }

    Ok(dep_files)
}

async fn remove_node_bin_dir(node_modules_dir: &Path) -> Result<()> {
    let bin_dir = node_modules_dir.join(".bin");
    if !bin_dir.is_dir() {
        return Ok(());
    }
    tokio::fs::remove_dir_all(&bin_dir)
        .await
        .map_err(|e| Error::io(e, &bin_dir, "remove .bin"))
}
