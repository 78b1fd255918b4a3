//! Error types shared across the mono crates

use miette::Diagnostic;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Error type for mono operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// I/O error during cache operations
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(mono::io),
        help("Check file permissions and ensure the path exists")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "read", "rename", "link")
        operation: String,
    },

    /// Configuration or validation error
    #[error("Configuration error: {message}")]
    #[diagnostic(code(mono::config))]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },

    /// A fingerprint key command exited non-zero or could not be spawned
    #[error("key command `{command}` failed: {detail}")]
    #[diagnostic(
        code(mono::cache::key_command),
        help("Every key command must succeed for the artifact fingerprint to be computed")
    )]
    KeyCommand {
        /// The command line as configured
        command: String,
        /// Exit status or spawn failure description
        detail: String,
    },

    /// An in-flight build marker or live build process was detected
    #[error("build in progress for {artifact}: {detail}")]
    #[diagnostic(
        code(mono::cache::build_in_progress),
        help("Wait for the running build to finish, then retry")
    )]
    BuildInProgress {
        /// Artifact whose build tree is busy
        artifact: String,
        /// What was detected (marker file or process list)
        detail: String,
    },

    /// A bulk replication made no progress for the configured window
    #[error("{operation} stalled: no progress for {}s", waited.as_secs())]
    #[diagnostic(code(mono::cache::stalled))]
    Stalled {
        /// Operation name ("seeding", "restoring", ...)
        operation: String,
        /// The no-progress window that elapsed
        waited: Duration,
    },

    /// A single file operation exceeded its timeout
    #[error("file operation on {} timed out after {}s", path.display(), waited.as_secs())]
    #[diagnostic(code(mono::cache::file_timeout))]
    FileTimeout {
        /// File the replicator gave up waiting on
        path: Box<Path>,
        /// Per-file timeout that elapsed
        waited: Duration,
    },

    /// A cache mutation failed and its rollback was attempted
    #[error("sync of {} failed: {primary}; {recovery}", path.display())]
    #[diagnostic(code(mono::cache::recovery))]
    Recovery {
        /// Workspace path whose sync failed
        path: Box<Path>,
        /// The original failure
        primary: String,
        /// What the rollback attempt did (or failed to do)
        recovery: String,
    },
}

impl Error {
    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create an I/O error with path context
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create an I/O error without path context
    #[must_use]
    pub fn io_no_path(source: std::io::Error, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            path: None,
            operation: operation.into(),
        }
    }
}

/// Result type for mono operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_display_includes_path() {
        let err = Error::io(
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
            "/some/dir",
            "rename",
        );
        let msg = err.to_string();
        assert!(msg.contains("rename"));
        assert!(msg.contains("/some/dir"));
    }

    #[test]
    fn io_error_without_path() {
        let err = Error::io_no_path(std::io::Error::other("boom"), "walk");
        assert_eq!(err.to_string(), "I/O walk failed");
    }

    #[test]
    fn key_command_display() {
        let err = Error::KeyCommand {
            command: "rustc --version".into(),
            detail: "exit status: 1".into(),
        };
        assert!(err.to_string().contains("rustc --version"));
        assert!(err.to_string().contains("exit status: 1"));
    }

    #[test]
    fn stalled_reports_window_seconds() {
        let err = Error::Stalled {
            operation: "restoring".into(),
            waited: Duration::from_secs(30),
        };
        assert_eq!(err.to_string(), "restoring stalled: no progress for 30s");
    }
}
