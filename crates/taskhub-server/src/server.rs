//! `TaskhubServer`: Axum router and listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use taskhub_notify::ConnectionHub;
use taskhub_settings::ServerSettings;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::errors::{Result, ServerError};
use crate::health::{self, HealthResponse};
use crate::metrics;
use crate::websocket::ws_handler;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Connection hub upgraded sockets are handed to.
    pub hub: Arc<ConnectionHub>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle; `/metrics` answers 404 without one.
    pub metrics: Option<PrometheusHandle>,
}

/// The HTTP/WebSocket front of a taskhub process.
pub struct TaskhubServer {
    settings: ServerSettings,
    state: AppState,
}

impl TaskhubServer {
    /// Server over `hub`.
    pub fn new(
        settings: ServerSettings,
        hub: Arc<ConnectionHub>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        Self {
            settings,
            state: AppState {
                hub,
                start_time: Instant::now(),
                metrics,
            },
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
    }

    /// Bind and serve until `cancel` fires.
    ///
    /// Graceful HTTP shutdown only covers plain requests; upgraded sockets
    /// belong to the hub and close with it.
    pub async fn listen(&self, cancel: CancellationToken) -> Result<ServerHandle> {
        let addr = self.settings.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "taskhub listening");

        let router = self.router();
        let task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { cancel.cancelled().await })
                .await?;
            Ok::<(), ServerError>(())
        });
        Ok(ServerHandle { local_addr, task })
    }
}

/// A running listener.
pub struct ServerHandle {
    local_addr: SocketAddr,
    task: JoinHandle<Result<()>>,
}

impl ServerHandle {
    /// Bound address (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the listener to finish.
    pub async fn stopped(self) -> Result<()> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(ServerError::Serve(std::io::Error::other(e))),
        }
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.hub.connection_count(),
        state.hub.is_accepting(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use taskhub_settings::HubSettings;
    use tower::ServiceExt;

    fn make_server(metrics: Option<PrometheusHandle>) -> TaskhubServer {
        TaskhubServer::new(
            ServerSettings::default(),
            ConnectionHub::new(HubSettings::default()),
            metrics,
        )
    }

    async fn get(app: Router, uri: &str, user: Option<&str>) -> (StatusCode, String) {
        let mut req = Request::builder().uri(uri);
        if let Some(user) = user {
            req = req.header("x-user-id", user);
        }
        let resp = app.oneshot(req.body(Body::empty()).unwrap()).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 100_000).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn health_reports_connections() {
        let (status, body) = get(make_server(None).router(), "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert!(parsed["uptime_secs"].is_number());
    }

    #[tokio::test]
    async fn ws_requires_user_header() {
        let (status, _) = get(make_server(None).router(), "/ws", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn ws_without_upgrade_is_rejected() {
        let (status, _) = get(make_server(None).router(), "/ws", Some("alice")).await;
        assert!(status.is_client_error());
        assert_ne!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn ws_refused_while_shutting_down() {
        let server = make_server(None);
        server.state.hub.shutdown().await;
        let (status, _) = get(server.router(), "/ws", Some("alice")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (_, body) = get(server.router(), "/health", None).await;
        assert!(body.contains("shutting_down"));
    }

    #[tokio::test]
    async fn metrics_endpoint() {
        let (status, _) = get(make_server(None).router(), "/metrics", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let handle = PrometheusBuilder::new().build_recorder().handle();
        let (status, _) = get(make_server(Some(handle)).router(), "/metrics", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let (status, _) = get(make_server(None).router(), "/nonexistent", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listen_binds_ephemeral_port_and_stops() {
        let settings = ServerSettings {
            host: "127.0.0.1".into(),
            port: 0,
            ..ServerSettings::default()
        };
        let server = TaskhubServer::new(settings, ConnectionHub::new(HubSettings::default()), None);
        let cancel = CancellationToken::new();
        let handle = server.listen(cancel.clone()).await.unwrap();
        assert_ne!(handle.local_addr().port(), 0);

        cancel.cancel();
        handle.stopped().await.unwrap();
    }
}
