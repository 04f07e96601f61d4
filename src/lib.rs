//! sandbox-runner daemon library
//!
//! This crate provides the core functionality for the sandbox-runner daemon:
//! - Language profiles and the registry resolving them
//! - Per-request workspaces with guaranteed cleanup
//! - Container invocations and the backend that runs them under a deadline
//! - The driver classifying outcomes, and the reporter formatting them
//! - HTTP and MCP boundaries

pub mod backend;
pub mod config;
pub mod driver;
pub mod http;
pub mod invocation;
pub mod language;
pub mod mcp;
pub mod report;
pub mod workspace;
