//! Compiler-cache environment contribution
//!
//! Builds run with their download and compiler caches pointed into
//! `cache_global/`, so every workspace of every project shares one cargo
//! registry, one npm cache, and one sccache store. With the `none`
//! strategy the build environment is left untouched.

use crate::store::CacheManager;
use mono_core::config::{BuildConfig, BuildStrategy};

impl CacheManager {
    /// Environment variables to inject into build commands for the given
    /// configuration.
    #[must_use]
    pub fn build_env_vars(&self, cfg: &BuildConfig) -> Vec<(String, String)> {
        if cfg.strategy == BuildStrategy::None {
            return Vec::new();
        }

        let global = self.global_cache_dir();
        let mut vars = vec![
            ("CARGO_HOME".into(), global.join("cargo").display().to_string()),
            (
                "npm_config_cache".into(),
                global.join("npm").display().to_string(),
            ),
            (
                "YARN_CACHE_FOLDER".into(),
                global.join("yarn").display().to_string(),
            ),
            ("PNPM_HOME".into(), global.join("pnpm").display().to_string()),
        ];

        if self.sccache_enabled(cfg) {
            vars.push(("RUSTC_WRAPPER".into(), "sccache".into()));
            vars.push((
                "SCCACHE_DIR".into(),
                global.join("sccache").display().to_string(),
            ));
        }

        vars
    }

    /// `Some(false)` disables sccache outright; `Some(true)` and `None`
    /// both defer to whether the binary is actually on PATH.
    fn sccache_enabled(&self, cfg: &BuildConfig) -> bool {
        cfg.sccache.unwrap_or(true) && self.sccache_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn manager(sccache: bool) -> CacheManager {
        CacheManager::with_home(PathBuf::from("/home/dev/.mono")).with_sccache_available(sccache)
    }

    fn lookup<'a>(vars: &'a [(String, String)], key: &str) -> Option<&'a str> {
        vars.iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn none_strategy_contributes_nothing() {
        let cfg = BuildConfig {
            strategy: BuildStrategy::None,
            ..BuildConfig::default()
        };
        assert!(manager(true).build_env_vars(&cfg).is_empty());
    }

    #[test]
    fn download_caches_point_into_cache_global() {
        let vars = manager(false).build_env_vars(&BuildConfig::default());

        assert_eq!(
            lookup(&vars, "CARGO_HOME"),
            Some("/home/dev/.mono/cache_global/cargo")
        );
        assert_eq!(
            lookup(&vars, "npm_config_cache"),
            Some("/home/dev/.mono/cache_global/npm")
        );
        assert_eq!(
            lookup(&vars, "YARN_CACHE_FOLDER"),
            Some("/home/dev/.mono/cache_global/yarn")
        );
        assert_eq!(
            lookup(&vars, "PNPM_HOME"),
            Some("/home/dev/.mono/cache_global/pnpm")
        );
        assert_eq!(lookup(&vars, "RUSTC_WRAPPER"), None);
    }

    #[test]
    fn sccache_enabled_when_available_and_permitted() {
        let vars = manager(true).build_env_vars(&BuildConfig::default());
        assert_eq!(lookup(&vars, "RUSTC_WRAPPER"), Some("sccache"));
        assert_eq!(
            lookup(&vars, "SCCACHE_DIR"),
            Some("/home/dev/.mono/cache_global/sccache")
        );
    }

    #[test]
    fn sccache_config_off_wins_over_availability() {
        let cfg = BuildConfig {
            sccache: Some(false),
            ..BuildConfig::default()
        };
        let vars = manager(true).build_env_vars(&cfg);
        assert_eq!(lookup(&vars, "RUSTC_WRAPPER"), None);
    }

    #[test]
    fn sccache_requested_but_missing_stays_off() {
        let cfg = BuildConfig {
            sccache: Some(true),
            ..BuildConfig::default()
        };
        let vars = manager(false).build_env_vars(&cfg);
        assert_eq!(lookup(&vars, "RUSTC_WRAPPER"), None);
    }
}
