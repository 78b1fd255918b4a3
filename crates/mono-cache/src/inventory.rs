//! Cache inventory and eviction
//!
//! Enumeration walks the fixed three-level layout
//! (`<project_id>/<artifact>/<key>`) without locks: entries appear
//! atomically and disappear wholesale, so a read error mid-walk just means
//! "entry gone" and the entry is skipped. Eviction policy (age, size
//! budgets) lives outside the engine; this module only measures and
//! removes.

use crate::store::{CacheManager, remove_all};
use chrono::{DateTime, Utc};
use mono_core::{Error, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[cfg(unix)]
use std::os::unix::fs::MetadataExt;

/// Size summary for one cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSizeEntry {
    pub project_id: String,
    pub artifact: String,
    pub key: String,
    pub size_bytes: u64,
}

/// Full inventory record for one cache entry.
#[derive(Debug, Clone)]
pub struct CacheEntryInfo {
    pub project_id: String,
    pub artifact: String,
    pub key: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub file_count: u64,
    pub mod_time: DateTime<Utc>,
    /// True when at least one regular file in the entry has an inode link
    /// count above one, i.e. some workspace still shares it.
    pub in_use: bool,
}

struct EntryStats {
    size_bytes: u64,
    file_count: u64,
    in_use: bool,
}

impl CacheManager {
    /// Sizes of every cache entry. A missing cache directory is an empty
    /// list, not an error.
    ///
    /// # Errors
    ///
    /// Only fails when the top-level cache directory exists but cannot be
    /// read.
    pub fn get_cache_sizes(&self) -> Result<Vec<CacheSizeEntry>> {
        Ok(self
            .collect_entries()?
            .into_iter()
            .map(|info| CacheSizeEntry {
                project_id: info.project_id,
                artifact: info.artifact,
                key: info.key,
                size_bytes: info.size_bytes,
            })
            .collect())
    }

    /// Full inventory records for every cache entry, including link-count
    /// based in-use detection.
    ///
    /// # Errors
    ///
    /// Only fails when the top-level cache directory exists but cannot be
    /// read.
    pub fn list_entries(&self) -> Result<Vec<CacheEntryInfo>> {
        self.collect_entries()
    }

    fn collect_entries(&self) -> Result<Vec<CacheEntryInfo>> {
        let mut entries = Vec::new();
        let local = self.local_cache_dir();
        if !local.is_dir() {
            return Ok(entries);
        }

        let projects = std::fs::read_dir(local).map_err(|e| Error::io(e, local, "read_dir"))?;
        for project in projects.flatten() {
            let project_path = project.path();
            if !project_path.is_dir() {
                continue;
            }
            let project_id = project.file_name().to_string_lossy().into_owned();

            let Ok(artifacts) = std::fs::read_dir(&project_path) else {
                continue;
            };
            for artifact in artifacts.flatten() {
                let artifact_path = artifact.path();
                if !artifact_path.is_dir() {
                    continue;
                }
                let artifact_name = artifact.file_name().to_string_lossy().into_owned();

                let Ok(keys) = std::fs::read_dir(&artifact_path) else {
                    continue;
                };
                for key_entry in keys.flatten() {
                    let key_path = key_entry.path();
                    if !key_path.is_dir() {
                        continue;
                    }

                    let Some(stats) = entry_stats(&key_path) else {
                        // Entry vanished mid-walk.
                        continue;
                    };
                    let mod_time = std::fs::metadata(&key_path)
                        .and_then(|m| m.modified())
                        .map(DateTime::<Utc>::from)
                        .unwrap_or_default();

                    entries.push(CacheEntryInfo {
                        project_id: project_id.clone(),
                        artifact: artifact_name.clone(),
                        key: key_entry.file_name().to_string_lossy().into_owned(),
                        path: key_path,
                        size_bytes: stats.size_bytes,
                        file_count: stats.file_count,
                        mod_time,
                        in_use: stats.in_use,
                    });
                }
            }
        }

        Ok(entries)
    }

    /// Remove one cache entry, then prune the artifact and project
    /// directories if they ended up empty. Pruning trouble is swallowed.
    ///
    /// # Errors
    ///
    /// Fails only when the entry itself cannot be removed.
    pub fn remove_cache_entry(&self, project_id: &str, artifact: &str, key: &str) -> Result<()> {
        let artifact_dir = self.local_cache_dir().join(project_id).join(artifact);
        let entry_path = artifact_dir.join(key);

        remove_all(&entry_path).map_err(|e| Error::io(e, &entry_path, "remove_all"))?;
        // Sidecar lock of the removed entry.
        let mut lock_path = entry_path.into_os_string();
        lock_path.push(".lock");
        let _ = std::fs::remove_file(PathBuf::from(lock_path));

        prune_if_empty(&artifact_dir);
        prune_if_empty(&self.local_cache_dir().join(project_id));
        Ok(())
    }

    /// Remove the whole local cache. Returns how many entries and bytes
    /// were freed.
    ///
    /// # Errors
    ///
    /// Fails when enumeration of an existing cache or its removal fails.
    pub fn remove_all_cache(&self) -> Result<(usize, u64)> {
        let entries = self.get_cache_sizes()?;
        let total: u64 = entries.iter().map(|e| e.size_bytes).sum();

        remove_all(self.local_cache_dir())
            .map_err(|e| Error::io(e, self.local_cache_dir(), "remove_all"))?;

        tracing::info!(
            entries = entries.len(),
            freed = %human_bytes(total),
            "removed local cache"
        );
        Ok((entries.len(), total))
    }
}

/// Recursive stats for one entry; `None` when the entry disappeared while
/// being read.
fn entry_stats(path: &Path) -> Option<EntryStats> {
    let mut stats = EntryStats {
        size_bytes: 0,
        file_count: 0,
        in_use: false,
    };
    for entry in WalkDir::new(path) {
        let entry = entry.ok()?;
        if !entry.file_type().is_file() {
            continue;
        }
        let meta = entry.metadata().ok()?;
        stats.size_bytes += meta.len();
        stats.file_count += 1;
        #[cfg(unix)]
        if meta.nlink() > 1 {
            stats.in_use = true;
        }
    }
    Some(stats)
}

fn prune_if_empty(dir: &Path) {
    let Ok(mut entries) = std::fs::read_dir(dir) else {
        return;
    };
    if entries.next().is_none() {
        let _ = std::fs::remove_dir(dir);
    }
}

/// Render a byte count the way the CLI reports cache sizes.
#[must_use]
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.2} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn seeded_manager() -> (TempDir, CacheManager) {
        let tmp = TempDir::new().unwrap();
        let manager = CacheManager::with_home(tmp.path().join("home"));

        let entry = manager
            .local_cache_dir()
            .join("aaaabbbbcccc/cargo/0123456789abcdef");
        fs::create_dir_all(entry.join("target/debug")).unwrap();
        fs::write(entry.join("target/debug/app.rlib"), vec![0u8; 2048]).unwrap();
        fs::write(entry.join("target/debug/app.rmeta"), vec![0u8; 1024]).unwrap();

        (tmp, manager)
    }

    #[test]
    fn missing_cache_dir_is_empty_not_error() {
        let tmp = TempDir::new().unwrap();
        let manager = CacheManager::with_home(tmp.path().join("home"));
        assert!(manager.get_cache_sizes().unwrap().is_empty());
        assert!(manager.list_entries().unwrap().is_empty());
    }

    #[test]
    fn sizes_sum_regular_files() {
        let (_tmp, manager) = seeded_manager();
        let sizes = manager.get_cache_sizes().unwrap();
        assert_eq!(sizes.len(), 1);
        assert_eq!(sizes[0].project_id, "aaaabbbbcccc");
        assert_eq!(sizes[0].artifact, "cargo");
        assert_eq!(sizes[0].key, "0123456789abcdef");
        assert_eq!(sizes[0].size_bytes, 3072);
    }

    #[cfg(unix)]
    #[test]
    fn in_use_follows_link_count() {
        let (tmp, manager) = seeded_manager();

        let entries = manager.list_entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].file_count, 2);
        assert!(!entries[0].in_use);

        // A workspace hardlink bumps the inode link count.
        let cached = entries[0].path.join("target/debug/app.rlib");
        fs::hard_link(&cached, tmp.path().join("shared.rlib")).unwrap();

        let entries = manager.list_entries().unwrap();
        assert!(entries[0].in_use);
    }

    #[test]
    fn remove_entry_prunes_empty_parents() {
        let (_tmp, manager) = seeded_manager();

        manager
            .remove_cache_entry("aaaabbbbcccc", "cargo", "0123456789abcdef")
            .unwrap();

        assert!(!manager.local_cache_dir().join("aaaabbbbcccc").exists());
        assert!(manager.local_cache_dir().is_dir());
    }

    #[test]
    fn remove_entry_keeps_populated_parents() {
        let (_tmp, manager) = seeded_manager();
        let other = manager
            .local_cache_dir()
            .join("aaaabbbbcccc/cargo/fedcba9876543210");
        fs::create_dir_all(&other).unwrap();

        manager
            .remove_cache_entry("aaaabbbbcccc", "cargo", "0123456789abcdef")
            .unwrap();

        assert!(other.is_dir());
    }

    #[test]
    fn remove_all_reports_counts_and_empties() {
        let (_tmp, manager) = seeded_manager();

        let (count, bytes) = manager.remove_all_cache().unwrap();
        assert_eq!(count, 1);
        assert_eq!(bytes, 3072);
        assert!(manager.get_cache_sizes().unwrap().is_empty());
    }

    #[test]
    fn human_bytes_units() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(2048), "2.00 KB");
        assert_eq!(human_bytes(5 * 1024 * 1024), "5.00 MB");
    }
}
