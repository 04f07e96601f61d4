//! HTTP boundary.
//!
//! `POST /run` takes `{language, code}` and answers `{output}`. Each run is
//! spawned as its own task, so a client that disconnects does not cancel
//! the container mid-flight; the driver still releases the workspace.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio::sync::Semaphore;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::backend::IsolationBackend;
use crate::config::ServerConfig;
use crate::driver::Driver;
use crate::report::{report, RunRequest, RunResponse};

/// Shared state of the HTTP handlers.
pub struct AppState<B> {
    driver: Arc<Driver<B>>,
    /// Admission limit; `None` when disabled.
    permits: Option<Arc<Semaphore>>,
}

/// Build the router.
pub fn router<B: IsolationBackend + 'static>(
    driver: Arc<Driver<B>>,
    server: &ServerConfig,
) -> Router {
    let permits = (server.max_concurrent_runs > 0)
        .then(|| Arc::new(Semaphore::new(server.max_concurrent_runs)));
    let state = Arc::new(AppState { driver, permits });

    Router::new()
        .route("/run", post(run_code::<B>))
        .route("/languages", get(list_languages::<B>))
        .route("/health", get(health))
        .layer(cors_layer(&server.allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the HTTP boundary until Ctrl-C.
pub async fn serve<B: IsolationBackend + 'static>(
    addr: SocketAddr,
    driver: Arc<Driver<B>>,
    server: &ServerConfig,
) -> Result<()> {
    let app = router(driver, server);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!(%addr, "Starting HTTP server");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await
        .context("HTTP server error")?;

    Ok(())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(%origin, error = %e, "Skipping invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn run_code<B: IsolationBackend + 'static>(
    State(state): State<Arc<AppState<B>>>,
    Json(req): Json<RunRequest>,
) -> Response {
    let permit = match &state.permits {
        Some(permits) => match Arc::clone(permits).try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(_) => {
                warn!(language = %req.language, "Rejecting run: admission limit reached");
                return (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({ "error": "Too many concurrent executions, retry later" })),
                )
                    .into_response();
            }
        },
        None => None,
    };

    let driver = Arc::clone(&state.driver);
    let task = tokio::spawn(async move {
        let outcome = driver.run(&req.language, req.code.as_bytes()).await;
        drop(permit);
        outcome
    });

    let outcome = match task.await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(error = %e, "Execution task failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Execution task failed" })),
            )
                .into_response();
        }
    };

    match report(outcome) {
        Ok(output) => (StatusCode::OK, Json(RunResponse { output })).into_response(),
        Err(e) if e.is_client_error() => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": e.to_string(),
                "available": state.driver.registry().languages(),
            })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn list_languages<B: IsolationBackend + 'static>(
    State(state): State<Arc<AppState<B>>>,
) -> Json<serde_json::Value> {
    Json(json!({ "languages": state.driver.registry().languages() }))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
