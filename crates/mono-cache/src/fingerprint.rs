//! Artifact fingerprinting
//!
//! A cache key is the first 16 hex chars of a SHA-256 over, in order, the
//! bytes of every configured key file followed by the stdout of every key
//! command. Two workspaces with identical manifests and toolchain versions
//! therefore land on the same cache entry.

use mono_core::config::ArtifactConfig;
use mono_core::{Error, Result};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::Path;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// Hex chars of the digest kept as the cache key.
const KEY_LEN: usize = 16;

/// Compute the cache key for one artifact in the given workspace.
///
/// Key files are streamed into the digest in list order; a missing key file
/// contributes nothing (optional manifests are expected), any other read
/// error is surfaced. Key commands run under `sh -c` with the ambient
/// environment and the workspace as working directory; their stdout is
/// hashed, stderr is ignored, and a non-zero exit is a hard error.
///
/// # Errors
///
/// Returns [`Error::Io`] for unreadable key files and [`Error::KeyCommand`]
/// when a key command cannot be spawned or exits non-zero.
pub async fn compute_cache_key(artifact: &ArtifactConfig, workspace: &Path) -> Result<String> {
    let mut hasher = Sha256::new();

    for key_file in &artifact.key_files {
        let path = workspace.join(key_file);
        let mut file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(Error::io(e, &path, "open key file")),
        };

        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = file
                .read(&mut buf)
                .await
                .map_err(|e| Error::io(e, &path, "read key file"))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
    }

    for command in &artifact.key_commands {
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(workspace)
            .output()
            .await
            .map_err(|e| Error::KeyCommand {
                command: command.clone(),
                detail: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(Error::KeyCommand {
                command: command.clone(),
                detail: format!(
                    "{}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        hasher.update(&output.stdout);
    }

    Ok(hex::encode(hasher.finalize())[..KEY_LEN].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn artifact(key_files: &[&str], key_commands: &[&str]) -> ArtifactConfig {
        ArtifactConfig {
            name: "cargo".into(),
            key_files: key_files.iter().map(|s| (*s).to_string()).collect(),
            key_commands: key_commands.iter().map(|s| (*s).to_string()).collect(),
            paths: vec!["target".into()],
        }
    }

    #[tokio::test]
    async fn empty_artifact_hashes_empty_input() {
        let dir = TempDir::new().unwrap();
        let key = compute_cache_key(&artifact(&[], &[]), dir.path())
            .await
            .unwrap();
        // SHA-256 of the empty string, truncated.
        assert_eq!(key, "e3b0c44298fc1c14");
    }

    #[tokio::test]
    async fn key_is_stable_and_sixteen_hex() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("Cargo.lock"), "lock-content").unwrap();

        let a = artifact(&["Cargo.lock"], &[]);
        let k1 = compute_cache_key(&a, dir.path()).await.unwrap();
        let k2 = compute_cache_key(&a, dir.path()).await.unwrap();
        assert_eq!(k1, k2);
        assert_eq!(k1.len(), 16);
        assert!(k1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn key_file_content_change_invalidates() {
        let dir = TempDir::new().unwrap();
        let a = artifact(&["Cargo.lock"], &[]);

        std::fs::write(dir.path().join("Cargo.lock"), "A").unwrap();
        let k1 = compute_cache_key(&a, dir.path()).await.unwrap();

        std::fs::write(dir.path().join("Cargo.lock"), "B").unwrap();
        let k2 = compute_cache_key(&a, dir.path()).await.unwrap();

        assert_ne!(k1, k2);
    }

    #[tokio::test]
    async fn missing_key_file_is_skipped() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("Cargo.lock"), "content").unwrap();

        let with_missing = artifact(&["not-there.toml", "Cargo.lock"], &[]);
        let without = artifact(&["Cargo.lock"], &[]);

        assert_eq!(
            compute_cache_key(&with_missing, dir.path()).await.unwrap(),
            compute_cache_key(&without, dir.path()).await.unwrap()
        );
    }

    #[tokio::test]
    async fn command_stdout_feeds_the_key() {
        let dir = TempDir::new().unwrap();
        let k1 = compute_cache_key(&artifact(&[], &["printf one"]), dir.path())
            .await
            .unwrap();
        let k2 = compute_cache_key(&artifact(&[], &["printf two"]), dir.path())
            .await
            .unwrap();
        assert_ne!(k1, k2);
    }

    #[tokio::test]
    async fn command_stderr_is_ignored() {
        let dir = TempDir::new().unwrap();
        let quiet = compute_cache_key(&artifact(&[], &["printf out"]), dir.path())
            .await
            .unwrap();
        let noisy = compute_cache_key(
            &artifact(&[], &["printf out; printf noise >&2"]),
            dir.path(),
        )
        .await
        .unwrap();
        assert_eq!(quiet, noisy);
    }

    #[tokio::test]
    async fn failing_command_is_a_hard_error() {
        let dir = TempDir::new().unwrap();
        let err = compute_cache_key(&artifact(&[], &["exit 3"]), dir.path())
            .await
            .unwrap_err();
        match err {
            Error::KeyCommand { command, .. } => assert_eq!(command, "exit 3"),
            other => panic!("expected KeyCommand, got {other}"),
        }
    }

    #[tokio::test]
    async fn commands_run_in_the_workspace() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("marker"), "here").unwrap();

        let key = compute_cache_key(&artifact(&[], &["cat marker"]), dir.path())
            .await
            .unwrap();
        let expected = {
            let mut h = Sha256::new();
            h.update(b"here");
            hex::encode(h.finalize())[..16].to_string()
        };
        assert_eq!(key, expected);
    }
}
