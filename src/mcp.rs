//! MCP server implementation using rmcp.
//!
//! Exposes the execution driver as a single `run` tool.

use std::sync::Arc;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content, Implementation, ServerCapabilities, ServerInfo};
use rmcp::schemars;
use rmcp::transport::stdio;
use rmcp::{tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{error, info};

use crate::backend::IsolationBackend;
use crate::driver::{Driver, ExecutionOutcome};
use crate::report::report;

/// MCP server for sandboxed code execution.
pub struct SandboxServer<B> {
    driver: Arc<Driver<B>>,
    tool_router: ToolRouter<Self>,
}

impl<B> Clone for SandboxServer<B> {
    fn clone(&self) -> Self {
        Self {
            driver: Arc::clone(&self.driver),
            tool_router: self.tool_router.clone(),
        }
    }
}

/// Parameters for the run tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct RunParams {
    /// The language of the snippet (e.g., "python", "cpp").
    #[schemars(description = "The language of the snippet (e.g., 'python', 'javascript', 'cpp', 'java')")]
    pub language: String,

    /// The source code to run.
    #[schemars(description = "The source code to run")]
    pub code: String,
}

#[tool_router]
impl<B: IsolationBackend + 'static> SandboxServer<B> {
    /// Create a new sandbox server.
    pub fn new(driver: Arc<Driver<B>>) -> Self {
        Self {
            driver,
            tool_router: Self::tool_router(),
        }
    }

    /// Run a snippet in an isolated container.
    #[tool(description = "Run a code snippet in a resource-capped container and return its output")]
    async fn run(
        &self,
        Parameters(params): Parameters<RunParams>,
    ) -> Result<CallToolResult, McpError> {
        info!(language = %params.language, code_len = params.code.len(), "Running snippet");

        let outcome = self
            .driver
            .run(&params.language, params.code.as_bytes())
            .await;
        let is_error = !matches!(outcome, ExecutionOutcome::Success { .. });

        match report(outcome) {
            Ok(output) if is_error => Ok(CallToolResult::error(vec![Content::text(output)])),
            Ok(output) => Ok(CallToolResult::success(vec![Content::text(output)])),
            Err(e) if e.is_client_error() => {
                let available = self.driver.registry().languages();
                Err(McpError::invalid_params(
                    format!("{e}. Available: {available:?}"),
                    None,
                ))
            }
            Err(e) => {
                error!(error = %e, "Execution failed");
                Ok(CallToolResult::error(vec![Content::text(format!(
                    "Execution error: {e}"
                ))]))
            }
        }
    }
}

#[tool_handler]
impl<B: IsolationBackend + 'static> ServerHandler for SandboxServer<B> {
    fn get_info(&self) -> ServerInfo {
        let languages = self.driver.registry().languages();
        let timeout = self.driver.deadline().as_secs();

        ServerInfo {
            protocol_version: rmcp::model::ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "sandbox-runner".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(format!(
                "Run code snippets in isolated, resource-capped containers.\n\
                 Supported languages: {languages:?}\n\
                 Each run is limited to {timeout}s of wall-clock time.\n\
                 \n\
                 Use the 'run' tool with:\n\
                 - language: one of {languages:?}\n\
                 - code: the code to run"
            )),
        }
    }
}

/// Serve the sandbox server over stdio.
pub async fn serve_stdio<B: IsolationBackend + 'static>(
    driver: Arc<Driver<B>>,
) -> anyhow::Result<()> {
    let server = SandboxServer::new(driver);

    info!("Starting MCP server on stdio");

    let service = server
        .serve(stdio())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start MCP server: {e}"))?;

    service
        .waiting()
        .await
        .map_err(|e| anyhow::anyhow!("MCP server error: {e}"))?;

    Ok(())
}
