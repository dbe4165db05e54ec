//! `HeraldServer`: Axum HTTP + `WebSocket` front of a worker.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::http;
use crate::registry::ConnectionRegistry;
use crate::websocket::session::{SessionConfig, run_ws_session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// The worker's connection registry.
    pub registry: Arc<dyn ConnectionRegistry>,
    /// Per-socket session settings.
    pub session: SessionConfig,
    /// Max inbound `WebSocket` message size.
    pub max_message_size: usize,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The Herald HTTP server.
pub struct HeraldServer {
    config: ServerConfig,
    registry: Arc<dyn ConnectionRegistry>,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
    shutdown: CancellationToken,
}

impl HeraldServer {
    /// Create a server in front of `registry`.
    pub fn new(
        config: ServerConfig,
        registry: Arc<dyn ConnectionRegistry>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        Self {
            config,
            registry,
            metrics,
            start_time: Instant::now(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            registry: Arc::clone(&self.registry),
            session: SessionConfig::from_config(&self.config),
            max_message_size: self.config.max_message_size,
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/", get(http::index))
            .route("/notify", post(http::notify))
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id()),
            )
    }

    /// Bind and serve in the background.
    ///
    /// Returns the bound address and the serve task. The task finishes after
    /// [`stop`](Self::stop) once in-flight requests complete.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.clone();

        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(error) = serve.await {
                error!(%error, "http server failed");
            }
        });
        info!(%addr, "herald server listening");
        Ok((addr, handle))
    }

    /// Stop accepting requests.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}

/// GET /ws: upgrade and hand the socket to a relay session.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| run_ws_session(socket, state.registry, state.session))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.registry.connection_count(),
        state.registry.is_shutdown_initiated(),
    ))
}

/// GET /metrics in Prometheus text format.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
