//! `HuddleServer`: Axum HTTP + `WebSocket` server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use huddle_auth::CredentialVerifier;
use huddle_core::{ConversationId, InstanceId};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::services::ChatServices;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::session::{SessionContext, run_ws_session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Per-session collaborators.
    pub session: SessionContext,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Shutdown coordinator.
    pub shutdown: ShutdownCoordinator,
    /// When the server started.
    pub start_time: Instant,
    /// This process's instance ID.
    pub instance_id: InstanceId,
    /// Prometheus handle, if a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The chat server.
pub struct HuddleServer {
    config: ServerConfig,
    session: SessionContext,
    shutdown: ShutdownCoordinator,
    instance_id: InstanceId,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

impl HuddleServer {
    /// Create a new server.
    pub fn new(
        config: ServerConfig,
        verifier: Arc<dyn CredentialVerifier>,
        services: ChatServices,
        instance_id: InstanceId,
        shutdown: ShutdownCoordinator,
    ) -> Self {
        let session = SessionContext {
            verifier,
            services,
            heartbeat_interval: config.heartbeat_interval(),
            heartbeat_timeout: config.heartbeat_timeout(),
            outbound_queue: config.outbound_queue,
            shutdown: shutdown.token(),
            active: Arc::new(AtomicUsize::new(0)),
        };
        Self {
            config,
            session,
            shutdown,
            instance_id,
            metrics: None,
            start_time: Instant::now(),
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            session: self.session.clone(),
            config: Arc::new(self.config.clone()),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            instance_id: self.instance_id.clone(),
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ws/chat/{conversation_id}", get(ws_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind and serve until the shutdown token fires.
    ///
    /// Returns the bound address (useful with port 0) and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = served {
                error!(error = %e, "server error");
            }
        });
        info!(%addr, instance_id = %self.instance_id, "listening");
        Ok((addr, handle))
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Joined sessions right now.
    pub fn connection_count(&self) -> usize {
        self.session.active.load(Ordering::SeqCst)
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let resp = health::health_check(
        state.start_time,
        state.session.active.load(Ordering::SeqCst),
        state.session.services.bus.room_count(),
        state.instance_id.as_str(),
        state.shutdown.is_shutting_down(),
    );
    Json(resp)
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

/// GET /ws/chat/{conversation_id}
///
/// Capacity is checked before the upgrade. Token problems are reported after
/// it, as close codes the client can act on.
async fn ws_handler(
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
    Query(query): Query<WsQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if state.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }
    let active = state.session.active.load(Ordering::SeqCst);
    if active >= state.config.max_connections {
        warn!(active, max = state.config.max_connections, "connection limit reached");
        return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
    }
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            debug!(%rejection, "not a websocket upgrade");
            return rejection.into_response();
        }
    };

    let ctx = state.session.clone();
    let sessions = state.shutdown.sessions().clone();
    let conversation_id = ConversationId::new(conversation_id);
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| {
            sessions.track_future(run_ws_session(socket, conversation_id, query.token, ctx))
        })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalBus;
    use crate::presence::MemoryPresence;
    use crate::test_support::FakeGateway;
    use axum::body::Body;
    use axum::http::Request;
    use huddle_auth::JwtVerifier;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;

    fn make_server(config: ServerConfig) -> HuddleServer {
        let services = ChatServices::new(
            Arc::new(FakeGateway::with_users(&["alice"])),
            Arc::new(LocalBus::new()),
            Arc::new(MemoryPresence::new()),
        );
        HuddleServer::new(
            config,
            Arc::new(JwtVerifier::new("secret", 0)),
            services,
            InstanceId::from("i-test"),
            ShutdownCoordinator::new(),
        )
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 10_000)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap_or_default())
    }

    fn upgrade_request(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("connection", "upgrade")
            .header("upgrade", "websocket")
            .header("sec-websocket-version", "13")
            .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn server_with_default_config() {
        let server = make_server(ServerConfig::default());
        assert_eq!(server.config().host, "127.0.0.1");
        assert_eq!(server.config().port, 0);
        assert_eq!(server.connection_count(), 0);
        assert!(!server.shutdown().is_shutting_down());
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let server = make_server(ServerConfig::default());
        let (status, body) = get_json(server.router(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connections"], 0);
        assert_eq!(body["rooms"], 0);
        assert_eq!(body["instance_id"], "i-test");
        assert!(body["uptime_secs"].is_number());
    }

    #[tokio::test]
    async fn health_reports_draining_after_shutdown() {
        let server = make_server(ServerConfig::default());
        server.shutdown().shutdown();
        let (_, body) = get_json(server.router(), "/health").await;
        assert_eq!(body["status"], "draining");
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_not_found() {
        let server = make_server(ServerConfig::default());
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_renders_prometheus_text() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let server = make_server(ServerConfig::default()).with_metrics(recorder.handle());
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn plain_get_on_ws_route_is_rejected() {
        let server = make_server(ServerConfig::default());
        let req = Request::builder()
            .uri("/ws/chat/7?token=abc")
            .body(Body::empty())
            .unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn non_numeric_conversation_is_rejected() {
        let server = make_server(ServerConfig::default());
        let resp = server
            .router()
            .oneshot(upgrade_request("/ws/chat/seven"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn connection_limit_returns_503() {
        let config = ServerConfig {
            max_connections: 0,
            ..ServerConfig::default()
        };
        let server = make_server(config);
        let resp = server
            .router()
            .oneshot(upgrade_request("/ws/chat/7?token=abc"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn shutting_down_refuses_upgrades() {
        let server = make_server(ServerConfig::default());
        server.shutdown().shutdown();
        let resp = server
            .router()
            .oneshot(upgrade_request("/ws/chat/7"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = make_server(ServerConfig::default());
        let req = Request::builder()
            .uri("/nonexistent")
            .body(Body::empty())
            .unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
