//! Turns execution outcomes into the text returned to callers.
//!
//! The program's own output (stdout or stderr) is the payload; failures of
//! the orchestrator itself are errors, never payload text.

use serde::{Deserialize, Serialize};

use crate::driver::ExecutionOutcome;

/// Payload returned when the deadline passes.
pub const TIMEOUT_MESSAGE: &str = "Error: Execution timed out";

/// Inbound request shared by the HTTP and MCP boundaries.
#[derive(Debug, Clone, Deserialize)]
pub struct RunRequest {
    pub language: String,
    pub code: String,
}

/// Outbound payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResponse {
    pub output: String,
}

/// Outcomes that are not a text payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunError {
    /// Bad input; nothing was executed.
    #[error("Unsupported language: '{language}'")]
    UnsupportedLanguage { language: String },
    /// The host failed to prepare or launch the run.
    #[error("Execution setup failed: {0}")]
    Setup(String),
}

impl RunError {
    /// Whether the caller is at fault.
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::UnsupportedLanguage { .. })
    }
}

/// Map an outcome to its payload text or a boundary error.
pub fn report(outcome: ExecutionOutcome) -> Result<String, RunError> {
    match outcome {
        ExecutionOutcome::Success { stdout } => Ok(stdout),
        ExecutionOutcome::RuntimeFailure { stderr, .. } => Ok(stderr),
        ExecutionOutcome::Timeout => Ok(TIMEOUT_MESSAGE.to_string()),
        ExecutionOutcome::UnsupportedLanguage { language } => {
            Err(RunError::UnsupportedLanguage { language })
        }
        ExecutionOutcome::SetupFailure { reason } => Err(RunError::Setup(reason)),
    }
}
