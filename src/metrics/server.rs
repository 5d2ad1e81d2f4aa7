//! HTTP server for camera controller metrics.
//!
//! `/metrics` serves the Prometheus registry. `/health` lists the last
//! pushed state of each controller, one `facing state` line each, and
//! answers `503 Service Unavailable` while any controller is failed.

use crate::controller::{ControllerState, ControllerStatus};
use crate::metrics::{MetricsRegistry, MetricsSnapshot};
use std::fmt::Write as _;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;

/// Errors that can occur during metrics server operations.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind to address: {0}")]
    Bind(#[from] std::io::Error),

    #[error("server error: {0}")]
    Server(String),
}

/// Where the metrics server listens. The port comes from the
/// `[metrics]` section of the configuration file.
#[derive(Debug, Clone)]
pub struct MetricsServerConfig {
    /// Address to bind the server to.
    pub bind_addr: SocketAddr,
}

impl Default for MetricsServerConfig {
    fn default() -> Self {
        Self::with_port(9090)
    }
}

impl MetricsServerConfig {
    /// Creates a config listening on all interfaces at `port`.
    pub fn with_port(port: u16) -> Self {
        Self {
            bind_addr: ([0, 0, 0, 0], port).into(),
        }
    }
}

/// Latest controller snapshot as seen by the HTTP handlers.
pub struct MetricsState {
    registry: MetricsRegistry,
    controllers: Vec<ControllerStatus>,
}

impl MetricsState {
    /// Applies a controller status snapshot to the registry and keeps it
    /// for `/health`.
    pub fn update(&mut self, snapshot: &MetricsSnapshot) {
        self.registry.update(snapshot);
        self.controllers.clone_from(&snapshot.controllers);
    }

    /// True once a snapshot has been pushed and no controller is failed.
    pub fn is_healthy(&self) -> bool {
        !self.controllers.is_empty()
            && !self
                .controllers
                .iter()
                .any(|s| matches!(s.state, ControllerState::Failed(_)))
    }

    fn health_report(&self) -> String {
        let mut report = String::new();
        for status in &self.controllers {
            let _ = writeln!(report, "{} {}", status.facing, status.state);
        }
        report
    }
}

/// HTTP server for exposing Prometheus metrics.
pub struct MetricsServer {
    config: MetricsServerConfig,
    state: Arc<RwLock<MetricsState>>,
}

impl MetricsServer {
    pub fn new(config: MetricsServerConfig, registry: MetricsRegistry) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(MetricsState {
                registry,
                controllers: Vec::new(),
            })),
        }
    }

    /// Returns the shared state for pushing snapshots.
    pub fn state(&self) -> Arc<RwLock<MetricsState>> {
        Arc::clone(&self.state)
    }

    /// Serves `/metrics` and `/health` until the task is dropped.
    pub async fn run(self) -> Result<(), ServerError> {
        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/health", get(health_handler))
            .layer(CorsLayer::permissive())
            .with_state(self.state);

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "Metrics server listening");

        axum::serve(listener, app)
            .await
            .map_err(|e| ServerError::Server(e.to_string()))
    }
}

async fn metrics_handler(State(state): State<Arc<RwLock<MetricsState>>>) -> impl IntoResponse {
    let state = state.read().await;

    match state.registry.encode() {
        Ok(output) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            output,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}"),
        ),
    }
}

async fn health_handler(State(state): State<Arc<RwLock<MetricsState>>>) -> impl IntoResponse {
    let state = state.read().await;

    if state.controllers.is_empty() {
        return (StatusCode::OK, "no snapshot yet\n".to_string());
    }
    let code = if state.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, state.health_report())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::Failure;
    use crate::device::Facing;

    #[test]
    fn test_config_default() {
        let config = MetricsServerConfig::default();
        assert_eq!(config.bind_addr.port(), 9090);
    }

    fn server() -> MetricsServer {
        MetricsServer::new(
            MetricsServerConfig::with_port(0),
            MetricsRegistry::new().unwrap(),
        )
    }

    fn status(facing: Facing, state: ControllerState) -> ControllerStatus {
        let mut status = ControllerStatus::new(facing);
        status.state = state;
        status
    }

    #[tokio::test]
    async fn test_state_update_is_visible_to_handler() {
        let server = server();
        let state = server.state();
        state.write().await.update(&MetricsSnapshot {
            controllers: vec![status(Facing::Front, ControllerState::Streaming)],
        });

        let response = metrics_handler(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_reports_controller_states() {
        let state = server().state();
        let response = health_handler(State(Arc::clone(&state))).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        state.write().await.update(&MetricsSnapshot {
            controllers: vec![
                status(Facing::Back, ControllerState::Streaming),
                status(Facing::Front, ControllerState::Closed),
            ],
        });
        {
            let state = state.read().await;
            assert!(state.is_healthy());
            assert_eq!(state.health_report(), "back streaming\nfront closed\n");
        }

        state.write().await.update(&MetricsSnapshot {
            controllers: vec![
                status(Facing::Back, ControllerState::Failed(Failure::Disconnected)),
                status(Facing::Front, ControllerState::Streaming),
            ],
        });
        assert!(!state.read().await.is_healthy());
        let response = health_handler(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
