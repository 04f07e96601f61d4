//! Container CLI backend.
//!
//! Spawns `docker run ...` (or a compatible CLI) and captures its output.
//! Killing the CLI client alone does not stop the container, so on timeout
//! the client is killed first (it can no longer create or start anything)
//! and the container is then force-removed by name and checked to be gone.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, error, instrument, warn};

use super::{ExecutionResult, IsolationBackend, RunStatus, TRUNCATION_MARKER};
use crate::config::Config;
use crate::invocation::Invocation;

/// Exit codes `docker run` uses for its own failures (daemon unreachable,
/// image missing, bad flag, command not runnable).
const RUNTIME_EXIT_CODES: [i32; 3] = [125, 126, 127];

/// Backend that drives a container runtime through its CLI.
#[derive(Debug, Clone)]
pub struct DockerBackend {
    kill_timeout: Duration,
    max_output_bytes: usize,
}

impl DockerBackend {
    /// Create a backend; `kill_timeout` bounds the forced removal after a
    /// timeout and `max_output_bytes` caps each captured stream.
    #[must_use]
    pub const fn new(kill_timeout: Duration, max_output_bytes: usize) -> Self {
        Self {
            kill_timeout,
            max_output_bytes,
        }
    }

    /// Create a backend from the process configuration.
    #[must_use]
    pub const fn from_config(config: &Config) -> Self {
        Self::new(config.runtime.kill_timeout(), config.limits.max_output_bytes)
    }

    /// Force-remove a container. Errors are logged, not returned.
    async fn remove_container(&self, program: &str, name: &str) {
        let removal = Command::new(program)
            .args(["rm", "--force", name])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(self.kill_timeout, removal).await {
            Ok(Ok(output)) if output.status.success() => {
                debug!(container = %name, "Removed timed-out container");
            }
            Ok(Ok(output)) => {
                warn!(
                    container = %name,
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "Container removal exited non-zero"
                );
            }
            Ok(Err(e)) => warn!(container = %name, error = %e, "Failed to spawn container removal"),
            Err(_) => warn!(container = %name, "Container removal timed out"),
        }
    }

    /// Whether the runtime still knows a container by this name.
    async fn container_exists(&self, program: &str, name: &str) -> bool {
        let inspect = Command::new(program)
            .args(["inspect", "--type", "container", name])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        match tokio::time::timeout(self.kill_timeout, inspect).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                warn!(container = %name, error = %e, "Failed to spawn container inspect");
                false
            }
            // Unknown; assume it is still there so removal is retried
            Err(_) => true,
        }
    }

    /// Remove the container and confirm it is gone, retrying once.
    async fn ensure_removed(&self, program: &str, name: &str) {
        for attempt in 1..=2 {
            self.remove_container(program, name).await;
            if !self.container_exists(program, name).await {
                return;
            }
            warn!(container = %name, attempt, "Container still present after removal");
        }
        error!(container = %name, "Failed to remove timed-out container");
    }
}

impl Default for DockerBackend {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Read at most `limit` bytes, then drain the rest so the writer never
/// blocks on a full pipe. Returns the kept bytes and whether any were dropped.
async fn read_capped<R>(reader: &mut R, limit: usize) -> std::io::Result<(Vec<u8>, bool)>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let limit = u64::try_from(limit).unwrap_or(u64::MAX);
    (&mut *reader).take(limit).read_to_end(&mut buf).await?;
    let dropped = tokio::io::copy(reader, &mut tokio::io::sink()).await?;
    Ok((buf, dropped > 0))
}

fn decode(bytes: &[u8], truncated: bool) -> String {
    let mut text = String::from_utf8_lossy(bytes).into_owned();
    if truncated {
        text.push_str(TRUNCATION_MARKER);
    }
    text
}

#[async_trait]
impl IsolationBackend for DockerBackend {
    #[instrument(skip(self, invocation), fields(container = %invocation.container_name))]
    async fn execute(&self, invocation: &Invocation, deadline: Duration) -> Result<RunStatus> {
        debug!(program = %invocation.program, "Starting container");

        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn container runtime: {}", invocation.program))?;

        // Take pipe handles out so `child` stays in scope for kill-on-timeout
        let mut child_stdout = child.stdout.take().context("Failed to open stdout")?;
        let mut child_stderr = child.stderr.take().context("Failed to open stderr")?;
        let limit = self.max_output_bytes;

        // The deadline covers output collection and exit, so a program that
        // closes its pipes but keeps running still times out.
        let run_to_exit = async {
            let (r1, r2) = tokio::join!(
                read_capped(&mut child_stdout, limit),
                read_capped(&mut child_stderr, limit),
            );
            let stdout = r1.context("Failed to read stdout")?;
            let stderr = r2.context("Failed to read stderr")?;
            let status = child.wait().await.context("Failed to wait for process")?;
            Ok::<_, anyhow::Error>((status, stdout, stderr))
        };

        let outcome = tokio::time::timeout(deadline, run_to_exit).await;
        let Ok(finished) = outcome else {
            warn!("Run exceeded deadline, terminating container");
            if let Err(e) = child.kill().await {
                debug!(error = %e, "Container client already exited");
            }
            self.ensure_removed(&invocation.program, &invocation.container_name)
                .await;
            return Ok(RunStatus::TimedOut);
        };
        let (status, (stdout_buf, stdout_cut), (stderr_buf, stderr_cut)) = finished?;
        let exit_code = status.code().unwrap_or(-1);

        // The runtime writes the cidfile once the container exists; without
        // it, a runtime exit code is the CLI's own failure.
        if RUNTIME_EXIT_CODES.contains(&exit_code)
            && !tokio::fs::try_exists(&invocation.cidfile)
                .await
                .unwrap_or(false)
        {
            anyhow::bail!(
                "Container runtime failed (exit {exit_code}): {}",
                String::from_utf8_lossy(&stderr_buf).trim()
            );
        }

        if stdout_cut || stderr_cut {
            warn!(limit, "Output exceeded cap and was truncated");
        }

        let result = ExecutionResult {
            exit_code,
            stdout: decode(&stdout_buf, stdout_cut),
            stderr: decode(&stderr_buf, stderr_cut),
            truncated: stdout_cut || stderr_cut,
        };

        debug!(exit_code = result.exit_code, "Execution completed");

        Ok(RunStatus::Exited(result))
    }
}
