//! The `build.*` configuration schema
//!
//! mono's outer configuration file is YAML; the cache engine recognizes the
//! `build` section. Artifacts may be configured explicitly or, when the list
//! is empty, detected by probing the workspace for known lockfiles.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How build artifacts are obtained for a new workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStrategy {
    /// Restore from the local artifact cache, build on miss (the default).
    #[default]
    Layered,
    /// Always build from source.
    Compile,
    /// Only use download caches, no artifact sharing.
    Download,
    /// No caching at all.
    None,
}

/// One cacheable artifact: a named subtree of a workspace whose contents are
/// derived from its dependency manifests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactConfig {
    /// Toolchain name ("cargo", "npm", ...). Drives skip rules and
    /// post-restore fixes.
    pub name: String,
    /// Workspace-relative manifest files hashed into the fingerprint.
    /// Missing files are skipped, supporting optional manifests.
    #[serde(default)]
    pub key_files: Vec<String>,
    /// Shell commands whose stdout is hashed into the fingerprint
    /// (typically tool versions).
    #[serde(default)]
    pub key_commands: Vec<String>,
    /// Workspace-relative roots whose contents are cached.
    #[serde(default)]
    pub paths: Vec<String>,
}

/// Cache retention knobs. Parsed and carried for the eviction policy that
/// lives outside the engine; the engine itself never interprets them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheLimits {
    pub max_size: Option<String>,
    pub max_age: Option<String>,
    pub auto_clean: bool,
}

/// The `build` section of mono's configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub strategy: BuildStrategy,
    pub download_cache: bool,
    /// Three-state sccache switch: `Some(true)` requires it, `Some(false)`
    /// disables it, `None` auto-detects from PATH.
    pub sccache: Option<bool>,
    pub artifacts: Vec<ArtifactConfig>,
    pub cache: CacheLimits,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            strategy: BuildStrategy::default(),
            download_cache: true,
            sccache: None,
            artifacts: Vec::new(),
            cache: CacheLimits::default(),
        }
    }
}

/// Top-level view of the outer YAML config, reduced to what the engine
/// consumes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonoConfig {
    pub build: BuildConfig,
}

impl MonoConfig {
    /// Parse the outer YAML configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the document is not valid YAML or
    /// does not match the schema.
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| Error::configuration(format!("invalid mono config: {e}")))
    }
}

impl BuildConfig {
    /// The artifacts to operate on: the configured list, or lockfile-probed
    /// defaults when the list is empty.
    #[must_use]
    pub fn effective_artifacts(&self, workspace: &Path) -> Vec<ArtifactConfig> {
        if self.artifacts.is_empty() {
            detect_artifacts(workspace)
        } else {
            self.artifacts.clone()
        }
    }
}

/// Lockfile probes for artifact auto-detection: (lockfile, artifact name,
/// tool-version key command, cached path).
const ARTIFACT_PROBES: &[(&str, &str, &str, &str)] = &[
    ("Cargo.lock", "cargo", "rustc --version", "target"),
    ("package-lock.json", "npm", "node --version", "node_modules"),
    ("yarn.lock", "yarn", "node --version", "node_modules"),
    ("pnpm-lock.yaml", "pnpm", "node --version", "node_modules"),
];

/// Probe a workspace for known lockfiles and derive default artifacts.
///
/// Each detected artifact fingerprints its lockfile plus the toolchain
/// version, and caches the toolchain's output tree.
#[must_use]
pub fn detect_artifacts(workspace: &Path) -> Vec<ArtifactConfig> {
    let mut artifacts = Vec::new();
    for (lockfile, name, version_cmd, cached_path) in ARTIFACT_PROBES {
        if !workspace.join(lockfile).is_file() {
            continue;
        }
        tracing::debug!(lockfile, artifact = name, "detected artifact");
        artifacts.push(ArtifactConfig {
            name: (*name).to_string(),
            key_files: vec![(*lockfile).to_string()],
            key_commands: vec![(*version_cmd).to_string()],
            paths: vec![(*cached_path).to_string()],
        });
    }
    artifacts
}
