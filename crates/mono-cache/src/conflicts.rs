//! Build-conflict detection
//!
//! Two advisory signals guard destructive cache operations: toolchain
//! in-flight markers inside the artifact tree (cargo drops
//! `target/.cargo-lock` while a build runs) and a best-effort scan for
//! live `cargo`/`rustc` processes referencing the project. The process scan
//! must never make a cache operation fail; any enumeration trouble reads as
//! "no conflicts detected".

use mono_core::{Error, Result};
use std::path::{Path, PathBuf};
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};

/// A running process that would conflict with cache mutation.
#[derive(Debug, Clone)]
pub struct BuildProcess {
    pub pid: u32,
    pub command: String,
}

/// The in-flight build marker for an artifact, if its toolchain has one.
pub(crate) fn build_marker(workspace: &Path, artifact: &str) -> Option<PathBuf> {
    match artifact {
        "cargo" => Some(workspace.join("target").join(".cargo-lock")),
        _ => None,
    }
}

/// Whether the artifact's toolchain currently has a build in flight in the
/// given workspace.
#[must_use]
pub fn is_build_in_progress(workspace: &Path, artifact: &str) -> bool {
    build_marker(workspace, artifact).is_some_and(|marker| marker.is_file())
}

/// Enumerate running `cargo`/`rustc` processes whose command line mentions
/// the project path. Best-effort: failures surface as an empty list.
#[must_use]
pub fn detect_running_build_processes(project_path: &Path) -> Vec<BuildProcess> {
    let needle = project_path.to_string_lossy();

    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::All,
        true,
        ProcessRefreshKind::nothing().with_cmd(UpdateKind::Always),
    );

    let mut found = Vec::new();
    for (pid, process) in system.processes() {
        let command = process
            .cmd()
            .iter()
            .map(|part| part.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ");
        if !command.contains("cargo") && !command.contains("rustc") {
            continue;
        }
        if !command.contains(needle.as_ref()) {
            continue;
        }
        found.push(BuildProcess {
            pid: pid.as_u32(),
            command,
        });
    }
    found.sort_by_key(|p| p.pid);
    found
}

/// Refuse when anything would make a cargo build block: an in-flight
/// marker file, or live cargo/rustc processes for this project.
///
/// # Errors
///
/// Returns [`Error::BuildInProgress`] naming the marker or the PIDs.
pub fn check_build_conflicts(project_path: &Path) -> Result<()> {
    if let Some(marker) = build_marker(project_path, "cargo") {
        if marker.is_file() {
            return Err(Error::BuildInProgress {
                artifact: "cargo".into(),
                detail: format!(
                    "lock file exists at {}; another cargo process may be running",
                    marker.display()
                ),
            });
        }
    }

    let processes = detect_running_build_processes(project_path);
    if !processes.is_empty() {
        let pids = processes
            .iter()
            .map(|p| p.pid.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(Error::BuildInProgress {
            artifact: "cargo".into(),
            detail: format!(
                "{} running cargo/rustc process(es) for {} (PIDs: {pids})",
                processes.len(),
                project_path.display()
            ),
        });
    }

    Ok(())
}
