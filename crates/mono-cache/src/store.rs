//! The cache store: restore, store, sync, and seed operations
//!
//! [`CacheManager`] owns the three-layer layout under the mono home and is
//! the only code that mutates cache entries. Entries are created by moving
//! a fully built tree into place (or replicating it there) and are replaced
//! wholesale, never edited; per-entry advisory locks serialize concurrent
//! writers across processes, and readers need no lock at all.

use crate::conflicts;
use crate::fingerprint::compute_cache_key;
use crate::fixes;
use crate::lock::CacheLock;
use crate::replicate::{self, SeedOptions, hardlink_tree, seed_tree};
use mono_core::config::ArtifactConfig;
use mono_core::{Error, Result, paths};
use std::ffi::OsStr;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// One artifact's cache coordinates for one workspace, as computed by
/// [`CacheManager::prepare_entries`].
#[derive(Debug, Clone)]
pub struct ArtifactCacheEntry {
    /// Artifact name ("cargo", "npm", ...).
    pub name: String,
    /// The 16-hex fingerprint.
    pub key: String,
    /// Entry root: `<cache_local>/<project_id>/<name>/<key>`.
    pub cache_path: PathBuf,
    /// Absolute workspace paths this entry materializes.
    pub workspace_paths: Vec<PathBuf>,
    /// Whether the entry directory existed at preparation time.
    pub hit: bool,
}

/// Options for [`CacheManager::sync`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// After moving a tree into the cache, fan it back out into the
    /// workspace as hardlinks (instead of leaving the workspace empty).
    pub hardlink_back: bool,
}

/// Handle on the artifact cache. Cheap to construct; all state lives on
/// disk.
#[derive(Debug, Clone)]
pub struct CacheManager {
    home_dir: PathBuf,
    local_cache_dir: PathBuf,
    sccache_available: bool,
}

impl CacheManager {
    /// Manager rooted at the real mono home (`~/.mono`).
    ///
    /// # Errors
    ///
    /// Fails when the user home directory cannot be resolved.
    pub fn new() -> Result<Self> {
        Ok(Self::with_home(paths::mono_home()?))
    }

    /// Manager rooted at an explicit home directory (tests, overrides).
    #[must_use]
    pub fn with_home(home_dir: PathBuf) -> Self {
        let local_cache_dir = paths::local_cache_dir(&home_dir);
        let sccache_available = which::which("sccache").is_ok();
        Self {
            home_dir,
            local_cache_dir,
            sccache_available,
        }
    }

    /// Override sccache detection (callers that probe differently, tests).
    #[must_use]
    pub fn with_sccache_available(mut self, available: bool) -> Self {
        self.sccache_available = available;
        self
    }

    #[must_use]
    pub fn home_dir(&self) -> &Path {
        &self.home_dir
    }

    #[must_use]
    pub fn local_cache_dir(&self) -> &Path {
        &self.local_cache_dir
    }

    #[must_use]
    pub fn global_cache_dir(&self) -> PathBuf {
        paths::global_cache_dir(&self.home_dir)
    }

    #[must_use]
    pub(crate) fn sccache_available(&self) -> bool {
        self.sccache_available
    }

    /// Cache directory for a project root.
    #[must_use]
    pub fn project_cache_dir(&self, root: &Path) -> PathBuf {
        paths::project_cache_dir(&self.local_cache_dir, root)
    }

    /// Entry path for one artifact at one fingerprint.
    #[must_use]
    pub fn artifact_cache_path(&self, root: &Path, artifact: &str, key: &str) -> PathBuf {
        paths::artifact_cache_path(&self.local_cache_dir, root, artifact, key)
    }

    /// Fingerprint every artifact in the workspace and report hit/miss
    /// against the cache on disk.
    ///
    /// # Errors
    ///
    /// Propagates fingerprinting failures (unreadable key files, failing
    /// key commands).
    pub async fn prepare_entries(
        &self,
        artifacts: &[ArtifactConfig],
        root: &Path,
        workspace: &Path,
    ) -> Result<Vec<ArtifactCacheEntry>> {
        let mut entries = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            let key = compute_cache_key(artifact, workspace).await?;
            let cache_path = self.artifact_cache_path(root, &artifact.name, &key);
            let hit = cache_path.is_dir();
            tracing::debug!(artifact = %artifact.name, key = %key, hit, "prepared cache entry");
            entries.push(ArtifactCacheEntry {
                name: artifact.name.clone(),
                key,
                cache_path,
                workspace_paths: artifact.paths.iter().map(|p| workspace.join(p)).collect(),
                hit,
            });
        }
        Ok(entries)
    }

    /// Materialize a cache entry into its workspace paths.
    ///
    /// The existing workspace trees are removed first: the caller has
    /// already decided to adopt the cache. After replication the artifact's
    /// post-restore fixes run on each materialized path.
    ///
    /// # Errors
    ///
    /// Any failure leaves the workspace path in an undefined state; callers
    /// treat the artifact as a miss and fall back to a full build.
    pub async fn restore(&self, entry: &ArtifactCacheEntry) -> Result<()> {
        for workspace_path in &entry.workspace_paths {
            let mut src = entry.cache_path.join(base_name(workspace_path)?);
            if !src.is_dir() {
                // Entries written by earlier layouts keyed this directory
                // by artifact name rather than the path basename.
                src = entry.cache_path.join(&entry.name);
            }

            remove_all_blocking(workspace_path).await?;

            seed_tree(
                &src,
                workspace_path,
                SeedOptions::for_artifact(&entry.name).operation("restoring"),
            )
            .await?;

            fixes::apply_post_restore_fixes(&entry.name, workspace_path).await?;
        }
        Ok(())
    }

    /// Move a freshly built artifact tree into the cache, then fan it back
    /// into the workspace as hardlinks so the build keeps working in place.
    ///
    /// The move is a rename: workspace and cache are expected to live on
    /// one device here (the replicating paths handle cross-device).
    ///
    /// # Errors
    ///
    /// Surfaces rename and hardlink failures; the workspace build remains
    /// usable whenever the rename itself succeeded.
    pub async fn store(&self, entry: &ArtifactCacheEntry) -> Result<()> {
        tokio::fs::create_dir_all(&entry.cache_path)
            .await
            .map_err(|e| Error::io(e, &entry.cache_path, "create_dir_all"))?;

        for workspace_path in &entry.workspace_paths {
            if !workspace_path.is_dir() {
                continue;
            }
            let target = entry.cache_path.join(base_name(workspace_path)?);

            tokio::fs::rename(workspace_path, &target)
                .await
                .map_err(|e| Error::io(e, workspace_path, "rename into cache"))?;

            let (src, dst) = (target.clone(), workspace_path.clone());
            tokio::task::spawn_blocking(move || hardlink_tree(&src, &dst))
                .await
                .map_err(|e| Error::configuration(format!("hardlink worker panicked: {e}")))??;
        }

        tracing::info!(artifact = %entry.name, key = %entry.key, "stored artifact in cache");
        Ok(())
    }

    /// Consolidate late build output into the cache. Idempotent: an
    /// already-cached key or a lock held by another process is a silent
    /// no-op.
    ///
    /// # Errors
    ///
    /// Refuses with [`Error::BuildInProgress`] when an in-flight marker is
    /// present; surfaces move/copy failures, including the composite
    /// [`Error::Recovery`] when a hardlink-back and its rollback both went
    /// wrong.
    pub async fn sync(
        &self,
        artifacts: &[ArtifactConfig],
        root: &Path,
        workspace: &Path,
        opts: SyncOptions,
    ) -> Result<()> {
        for artifact in artifacts {
            self.sync_artifact(artifact, root, workspace, opts).await?;
        }
        Ok(())
    }

    async fn sync_artifact(
        &self,
        artifact: &ArtifactConfig,
        root: &Path,
        workspace: &Path,
        opts: SyncOptions,
    ) -> Result<()> {
        if conflicts::is_build_in_progress(workspace, &artifact.name) {
            return Err(Error::BuildInProgress {
                artifact: artifact.name.clone(),
                detail: "in-flight build marker present, cannot sync".into(),
            });
        }

        let key = compute_cache_key(artifact, workspace).await?;
        let cache_path = self.artifact_cache_path(root, &artifact.name, &key);

        if cache_path.is_dir() {
            tracing::debug!(artifact = %artifact.name, key = %key, "already cached, skipping sync");
            return Ok(());
        }

        for rel in &artifact.paths {
            let local = workspace.join(rel);
            if !local.is_dir() {
                continue;
            }
            self.move_to_cache(&local, &cache_path, opts.hardlink_back)
                .await?;
        }

        Ok(())
    }

    async fn move_to_cache(
        &self,
        local: &Path,
        cache_path: &Path,
        hardlink_back: bool,
    ) -> Result<()> {
        let Some(_lock) = CacheLock::acquire(cache_path)? else {
            // Another process is syncing this key.
            return Ok(());
        };

        let target = cache_path.join(base_name(local)?);
        if target.is_dir() {
            return Ok(());
        }

        tokio::fs::create_dir_all(cache_path)
            .await
            .map_err(|e| Error::io(e, cache_path, "create_dir_all"))?;

        match tokio::fs::rename(local, &target).await {
            Ok(()) => {}
            Err(e) if replicate::rename_is_cross_device(&e) => {
                return self
                    .copy_into_cache(local, &target, cache_path, hardlink_back)
                    .await;
            }
            Err(e) => return Err(Error::io(e, local, "rename into cache")),
        }

        if hardlink_back {
            let (src, dst) = (target.clone(), local.to_path_buf());
            let linked = tokio::task::spawn_blocking(move || hardlink_tree(&src, &dst))
                .await
                .map_err(|e| Error::configuration(format!("hardlink worker panicked: {e}")))?;

            if let Err(primary) = linked {
                // The workspace tree is gone until the rename is undone;
                // only a successful rename-back makes cleanup safe.
                let recovery = match std::fs::rename(&target, local) {
                    Err(e) => format!("recovery rename failed: {e}"),
                    Ok(()) => match remove_all(cache_path) {
                        Err(e) => {
                            format!("workspace tree restored, but cache cleanup failed: {e}")
                        }
                        Ok(()) => "workspace tree restored from the cache copy".into(),
                    },
                };
                return Err(Error::Recovery {
                    path: local.into(),
                    primary: primary.to_string(),
                    recovery,
                });
            }
        }

        Ok(())
    }

    /// Cross-device path: replicate into the cache byte by byte. With
    /// `hardlink_back` the workspace still holds the original tree, so
    /// there is nothing to fan out; otherwise the original is removed to
    /// complete the move.
    async fn copy_into_cache(
        &self,
        local: &Path,
        target: &Path,
        cache_path: &Path,
        hardlink_back: bool,
    ) -> Result<()> {
        let (src, dst) = (local.to_path_buf(), target.to_path_buf());
        let copied = tokio::task::spawn_blocking(move || replicate::copy_tree(&src, &dst))
            .await
            .map_err(|e| Error::configuration(format!("copy worker panicked: {e}")))?;

        if let Err(e) = copied {
            if let Err(cleanup) = remove_all(cache_path) {
                tracing::warn!(
                    path = %cache_path.display(),
                    "failed to clean partial cache entry: {cleanup}"
                );
            }
            return Err(e);
        }

        if hardlink_back {
            return Ok(());
        }
        remove_all(local).map_err(|e| Error::io(e, local, "remove_all"))
    }

    /// Promote pre-existing artifact trees at the project root into the
    /// cache, without disturbing the root. Only happens when the root's
    /// fingerprint matches the workspace's; a stale root must not poison
    /// the cache.
    ///
    /// # Errors
    ///
    /// Propagates fingerprinting and replication failures. A partially
    /// written entry is removed best-effort before the error surfaces.
    pub async fn seed_from_root(
        &self,
        artifacts: &[ArtifactConfig],
        root: &Path,
        workspace: &Path,
    ) -> Result<()> {
        for artifact in artifacts {
            self.seed_artifact_from_root(artifact, root, workspace)
                .await?;
        }
        Ok(())
    }

    async fn seed_artifact_from_root(
        &self,
        artifact: &ArtifactConfig,
        root: &Path,
        workspace: &Path,
    ) -> Result<()> {
        if root == workspace {
            return Ok(());
        }

        let workspace_key = compute_cache_key(artifact, workspace).await?;
        let cache_path = self.artifact_cache_path(root, &artifact.name, &workspace_key);
        if cache_path.is_dir() {
            return Ok(());
        }

        let root_key = compute_cache_key(artifact, root).await?;
        if workspace_key != root_key {
            tracing::debug!(
                artifact = %artifact.name,
                "root fingerprint differs from workspace, not seeding"
            );
            return Ok(());
        }

        if conflicts::is_build_in_progress(root, &artifact.name) {
            return Ok(());
        }

        for rel in &artifact.paths {
            let root_path = root.join(rel);
            if !root_path.is_dir() {
                continue;
            }
            if let Err(e) = self
                .seed_to_cache(&root_path, &cache_path, &artifact.name)
                .await
            {
                if let Err(cleanup) = remove_all(&cache_path) {
                    tracing::warn!(
                        path = %cache_path.display(),
                        "failed to clean partial cache entry: {cleanup}"
                    );
                }
                return Err(e);
            }
        }

        Ok(())
    }

    async fn seed_to_cache(&self, source: &Path, cache_path: &Path, artifact: &str) -> Result<()> {
        tokio::fs::create_dir_all(cache_path)
            .await
            .map_err(|e| Error::io(e, cache_path, "create_dir_all"))?;

        let target = cache_path.join(base_name(source)?);
        if target.is_dir() {
            return Ok(());
        }

        seed_tree(source, &target, SeedOptions::for_artifact(artifact)).await
    }
}

fn base_name(path: &Path) -> Result<&OsStr> {
    path.file_name()
        .ok_or_else(|| Error::configuration(format!("path {} has no base name", path.display())))
}

/// `remove_dir_all` that tolerates an absent path and plain files.
pub(crate) fn remove_all(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotADirectory => {
            match std::fs::remove_file(path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e),
            }
        }
        Err(e) => Err(e),
    }
}

async fn remove_all_blocking(path: &Path) -> Result<()> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || remove_all(&owned))
        .await
        .map_err(|e| Error::configuration(format!("removal worker panicked: {e}")))?
        .map_err(|e| Error::io(e, path, "remove_all"))
}
