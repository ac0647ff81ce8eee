//! Axum server setup and router configuration.

use crate::shutdown::shutdown_signal;
use crate::state::AppState;
use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use paywatch_core::cache::{get_typed, latest_block_key};
use paywatch_sdk::objects::Network;
use serde::Serialize;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Build the main application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .with_state(state)
}

#[derive(Serialize)]
struct NetworkHealth {
    network: Network,
    /// Last chain head published by the latest-block worker, if still fresh.
    latest_block: Option<u64>,
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    networks: Vec<NetworkHealth>,
}

/// Returns OK while the process is up, with each network's cached chain head.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let mut networks = Vec::with_capacity(state.networks.len());
    for network in state.networks.iter().copied() {
        let latest_block = get_typed::<u64>(state.cache.as_ref(), &latest_block_key(network))
            .await
            .ok()
            .flatten();
        networks.push(NetworkHealth {
            network,
            latest_block,
        });
    }

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        networks,
    })
}

/// Ready check response.
#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    database: &'static str,
}

/// Reports ready only when the database answers.
async fn ready_check(State(state): State<AppState>) -> impl IntoResponse {
    match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => (
            StatusCode::OK,
            Json(ReadyResponse {
                status: "ready",
                database: "connected",
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadyResponse {
                    status: "not_ready",
                    database: "unreachable",
                }),
            )
        }
    }
}

/// Run the server until a shutdown signal arrives, then broadcast shutdown
/// to the background processors.
pub async fn run_server(
    router: Router,
    addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        })
        .await
}
