//! Isolation backend trait and implementations.
//!
//! Backends take a fully built [`Invocation`] and run it under a deadline.
//! Resource caps are enforced by the container runtime; the backend only
//! handles process management, I/O capture and termination on timeout.

mod docker;

pub use docker::DockerBackend;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::invocation::Invocation;

/// Result of a run that finished before the deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Exit code of the process (0 = success).
    pub exit_code: i32,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
    /// Whether either stream hit the output cap and was cut short.
    pub truncated: bool,
}

/// Appended to a stream that was cut at the output cap.
pub const TRUNCATION_MARKER: &str = "\n[output truncated]\n";

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    /// The process exited on its own.
    Exited(ExecutionResult),
    /// The deadline passed; the container has been terminated.
    TimedOut,
}

/// Trait for isolation backends.
#[async_trait]
pub trait IsolationBackend: Send + Sync {
    /// Run the invocation, giving up after `deadline`.
    ///
    /// Returning [`RunStatus::TimedOut`] means the backend has already
    /// terminated everything it started. `Err` is reserved for failures of
    /// the backend itself (spawn errors, broken pipes, a runtime that never
    /// started the container), never for a non-zero exit of the program.
    async fn execute(&self, invocation: &Invocation, deadline: Duration) -> Result<RunStatus>;
}

/// Write an executable shell script standing in for the container CLI.
#[cfg(all(test, unix))]
pub(crate) fn fake_cli(dir: &std::path::Path, body: &str) -> String {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-runtime");
    std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}
