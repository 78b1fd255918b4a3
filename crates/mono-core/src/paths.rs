//! Path and identity helpers for the on-disk cache layout
//!
//! Everything under the mono home is addressed by plain string joins; no
//! canonicalization or symlink resolution happens here. The layout:
//!
//! ```text
//! ~/.mono/
//!   cache_global/                      # shared download/compiler caches
//!     cargo/  npm/  yarn/  pnpm/  sccache/
//!   cache_local/
//!     <project_id:12-hex>/
//!       <artifact_name>/
//!         <cache_key:16-hex>/          # entry root
//!         <cache_key:16-hex>.lock      # sidecar advisory lock
//! ```

use crate::{Error, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// The mono home directory (`~/.mono`).
///
/// # Errors
///
/// Returns an error if the user home directory cannot be resolved.
pub fn mono_home() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| Error::configuration("could not determine home directory"))?;
    Ok(home.join(".mono"))
}

/// Per-project local cache root under the given mono home.
#[must_use]
pub fn local_cache_dir(home: &Path) -> PathBuf {
    home.join("cache_local")
}

/// Shared global cache root (download caches, sccache) under the given home.
#[must_use]
pub fn global_cache_dir(home: &Path) -> PathBuf {
    home.join("cache_global")
}

/// Stable project identifier: the first 12 hex chars of the SHA-256 of the
/// project root's absolute path string. Pure function, no I/O; collisions
/// are ignored because the path space is tiny in practice.
#[must_use]
pub fn project_id(root: &Path) -> String {
    let digest = Sha256::digest(root.to_string_lossy().as_bytes());
    hex::encode(digest)[..12].to_string()
}

/// Cache directory for one project: `<local_cache>/<project_id>`.
#[must_use]
pub fn project_cache_dir(local_cache: &Path, root: &Path) -> PathBuf {
    local_cache.join(project_id(root))
}

/// Cache entry path for one artifact at one fingerprint:
/// `<local_cache>/<project_id>/<artifact>/<key>`.
#[must_use]
pub fn artifact_cache_path(local_cache: &Path, root: &Path, artifact: &str, key: &str) -> PathBuf {
    project_cache_dir(local_cache, root).join(artifact).join(key)
}
