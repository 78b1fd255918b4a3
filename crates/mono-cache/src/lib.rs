//! Content-addressed, hardlink-shared build artifact cache
//!
//! This crate lets sibling workspaces with identical dependency manifests
//! materialize their build trees in seconds instead of minutes: a built
//! `target/` or `node_modules/` tree is moved into a per-project cache and
//! fanned back out as hardlinks, so every subsequent workspace with the same
//! fingerprint shares the same inodes.
//!
//! # On-disk layout
//!
//! ```text
//! ~/.mono/
//!   cache_global/                       # shared download/compiler caches
//!     cargo/  npm/  yarn/  pnpm/  sccache/
//!   cache_local/
//!     <project_id:12-hex>/
//!       <artifact_name>/
//!         <cache_key:16-hex>/           # entry root, children named after
//!         <cache_key:16-hex>.lock       #   each cached path's basename
//! ```
//!
//! The presence of the entry directory is the hit signal; there is no
//! metadata file. Entries are only ever replaced wholesale (remove +
//! recreate), never mutated in place, so readers need no lock.
//!
//! # Components
//!
//! - [`fingerprint`]: stable 16-hex cache key from manifest contents and
//!   key-command output
//! - [`replicate`]: parallel tree replication with hardlink/symlink/copy
//!   semantics, per-file timeouts, and a no-progress watchdog
//! - [`store`]: the [`CacheManager`] restore/store/sync/seed operations
//! - [`lock`]: non-blocking advisory locks serializing per-entry mutation
//! - [`conflicts`]: build-in-progress markers and best-effort process scans
//! - [`inventory`]: entry enumeration, size accounting, eviction
//! - [`fixes`]: toolchain-specific post-restore repairs
//!
//! # Example
//!
//! ```rust,no_run
//! use mono_cache::{CacheManager, SyncOptions};
//! use mono_core::config::detect_artifacts;
//! use std::path::Path;
//!
//! # async fn demo() -> mono_core::Result<()> {
//! let root = Path::new("/home/dev/project");
//! let workspace = Path::new("/home/dev/project/workspaces/feature-x");
//!
//! let manager = CacheManager::new()?;
//! let artifacts = detect_artifacts(workspace);
//! for entry in manager.prepare_entries(&artifacts, root, workspace).await? {
//!     if entry.hit {
//!         manager.restore(&entry).await?;
//!     }
//! }
//! manager
//!     .sync(&artifacts, root, workspace, SyncOptions::default())
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod conflicts;
pub mod env;
pub mod fingerprint;
pub mod fixes;
pub mod inventory;
pub mod lock;
pub mod replicate;
pub mod store;

pub use conflicts::{BuildProcess, check_build_conflicts, detect_running_build_processes};
pub use fingerprint::compute_cache_key;
pub use fixes::apply_post_restore_fixes;
pub use inventory::{CacheEntryInfo, CacheSizeEntry, human_bytes};
pub use lock::CacheLock;
pub use replicate::{SeedOptions, hardlink_tree, seed_tree};
pub use store::{ArtifactCacheEntry, CacheManager, SyncOptions};

// The engine's callers get the shared error type from here.
pub use mono_core::{Error, Result};
