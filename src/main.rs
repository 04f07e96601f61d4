//! sandbox-runner daemon
//!
//! Runs code snippets in resource-capped containers, exposed over HTTP
//! (default) or as an MCP server on stdio.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sandbox_runner_daemon::backend::DockerBackend;
use sandbox_runner_daemon::config::Config;
use sandbox_runner_daemon::driver::Driver;
use sandbox_runner_daemon::language::Registry;
use sandbox_runner_daemon::{http, mcp};

#[derive(Parser, Debug)]
#[command(name = "sandbox-runner-daemon")]
#[command(about = "Runs code snippets in resource-capped containers")]
struct Args {
    /// Run in stdio mode (for MCP clients)
    #[arg(long, conflicts_with = "listen")]
    stdio: bool,

    /// Address for the HTTP server
    #[arg(long, default_value = "127.0.0.1:8000")]
    listen: SocketAddr,

    /// JSON configuration file (overrides SANDBOX_RUNNER_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging (stderr so stdout is free for MCP protocol)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match &args.config {
        Some(path) => Config::from_file(path),
        None => Config::from_env(),
    }
    .context("Failed to load configuration")?;

    let registry = Arc::new(Registry::with_overrides(&config.languages));

    info!(
        languages = ?registry.languages(),
        runtime = %config.runtime.program,
        scratch_dir = %config.scratch_dir.display(),
        timeout_seconds = config.limits.timeout_seconds,
        "Loaded configuration"
    );

    let backend = DockerBackend::from_config(&config);
    let driver = Arc::new(Driver::new(&config, registry, backend));

    if args.stdio {
        mcp::serve_stdio(driver).await?;
    } else {
        http::serve(args.listen, driver, &config.server).await?;
    }

    Ok(())
}
