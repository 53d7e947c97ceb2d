/**
 * The HTTP frontend: binds a listener and routes traffic to either the SSE
 * session opener or the per-session POST handler.
 *
 * GET / (or /sse) opens a session: a transport is created, the exposed MCP
 * server is bound to it, and the response streams SSE events starting with
 * the `endpoint` event that tells the client where to POST. POST /messages
 * (or /sessions) accepts one JSON-RPC message for the session named by the
 * `sessionId` query parameter. /health and /api/list-targets are auxiliary.
 */
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use rmcp::{model::ClientJsonRpcMessage, ServerHandler, ServiceExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::io;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::error::ProxyError;
use crate::registry::UpstreamRegistry;
use crate::session::{self, SessionMap, SseSessionTransport};

/// Canonical POST path advertised in the `endpoint` event.
pub const POST_ENDPOINT: &str = "/messages";

/// Settings for the SSE frontend.
pub struct SseServerConfig {
    /// Interval for SSE keep-alive pings; `None` disables them.
    pub keep_alive: Option<Duration>,
    pub ct: CancellationToken,
}

impl Default for SseServerConfig {
    fn default() -> Self {
        Self {
            keep_alive: Some(Duration::from_secs(15)),
            ct: CancellationToken::new(),
        }
    }
}

#[derive(Clone)]
struct AppState {
    sessions: SessionMap,
    transport_tx: mpsc::UnboundedSender<(SseSessionTransport, CancellationToken)>,
    keep_alive: Option<Duration>,
    ct: CancellationToken,
}

/// The frontend's service side: a queue of freshly opened session
/// transports, each waiting for an MCP server to be bound to it.
pub struct SseServer {
    transport_rx: mpsc::UnboundedReceiver<(SseSessionTransport, CancellationToken)>,
    ct: CancellationToken,
}

impl SseServer {
    /// Build the frontend. Returns the server half and the axum router;
    /// callers may merge extra routes before serving.
    pub fn new(config: SseServerConfig) -> (SseServer, Router) {
        let sessions: SessionMap = Arc::new(RwLock::new(HashMap::new()));
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();

        let state = AppState {
            sessions,
            transport_tx,
            keep_alive: config.keep_alive,
            ct: config.ct.clone(),
        };

        let cors_layer = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        let router = Router::new()
            .route("/", get(sse_handler))
            .route("/sse", get(sse_handler))
            .route(POST_ENDPOINT, post(post_handler))
            .route("/sessions", post(post_handler))
            .layer(cors_layer)
            .with_state(state);

        let server = SseServer {
            transport_rx,
            ct: config.ct,
        };
        (server, router)
    }

    /// Bind an MCP server to every incoming session. Each session is served
    /// in its own task until the client disconnects or shutdown.
    pub fn with_service<S, F>(mut self, factory: F) -> CancellationToken
    where
        S: ServerHandler,
        F: Fn() -> S + Send + 'static,
    {
        let ct = self.ct.clone();
        tokio::spawn(async move {
            while let Some((transport, session_ct)) = self.transport_rx.recv().await {
                let session_id = transport.session_id().clone();
                let service = factory();
                tokio::spawn(async move {
                    let server = match service.serve_with_ct(transport, session_ct).await {
                        Ok(server) => server,
                        Err(err) => {
                            error!("session {} failed to initialize: {}", session_id, err);
                            return;
                        }
                    };
                    if let Err(err) = server.waiting().await {
                        error!("session {} task failed: {}", session_id, err);
                    }
                });
            }
        });
        ct
    }
}

/// Auxiliary routes: health probe and the upstream listing.
pub fn api_routes(registry: UpstreamRegistry) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route(
            "/api/list-targets",
            get(move || {
                let registry = registry.clone();
                async move { Json(registry.list().await) }
            }),
        )
}

/// Run the frontend until the token is cancelled. Long-lived SSE streams
/// are expected; there is no idle timeout.
pub async fn serve(listener: TcpListener, router: Router, ct: CancellationToken) -> io::Result<()> {
    info!(
        "SSE server running on {} (GET / for SSE, POST {} for messages)",
        listener.local_addr()?,
        POST_ENDPOINT
    );
    axum::serve(listener, router)
        .with_graceful_shutdown(ct.cancelled_owned())
        .await
}

async fn sse_handler(State(state): State<AppState>) -> Result<Response, StatusCode> {
    let session_ct = state.ct.child_token();
    let (session_id, transport, events) =
        session::create(POST_ENDPOINT, state.sessions.clone(), session_ct.clone());
    info!("session {} established", session_id);

    if state.transport_tx.send((transport, session_ct)).is_err() {
        // No service is consuming transports; nothing can answer this
        // session.
        error!("no MCP service attached; rejecting session {}", session_id);
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }

    let sse = Sse::new(events);
    let mut response = match state.keep_alive {
        Some(interval) => sse
            .keep_alive(KeepAlive::new().interval(interval).text("keepalive"))
            .into_response(),
        None => sse.into_response(),
    };
    let headers = response.headers_mut();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-transform"),
    );
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    Ok(response)
}

#[derive(Deserialize)]
struct PostQuery {
    #[serde(rename = "sessionId")]
    session_id: String,
}

async fn post_handler(
    State(state): State<AppState>,
    Query(query): Query<PostQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with("application/json"))
        .unwrap_or(false);
    if !is_json {
        warn!(
            "session {}: {}",
            query.session_id,
            ProxyError::Protocol("content-type must be application/json".to_string())
        );
        return (
            StatusCode::BAD_REQUEST,
            "Unsupported content-type: expected application/json",
        )
            .into_response();
    }

    let handle = session::lock_read(&state.sessions)
        .get(query.session_id.as_str())
        .cloned();
    let Some(handle) = handle else {
        return (StatusCode::BAD_REQUEST, "Invalid session ID").into_response();
    };

    let message: ClientJsonRpcMessage = match serde_json::from_slice(&body) {
        Ok(message) => message,
        Err(err) => {
            warn!(
                "session {}: {}",
                query.session_id,
                ProxyError::Protocol(err.to_string())
            );
            return (StatusCode::BAD_REQUEST, format!("Invalid message: {}", err)).into_response();
        }
    };

    match handle.push(message).await {
        Ok(()) => (StatusCode::ACCEPTED, "Accepted").into_response(),
        Err(err) => {
            // The transport was found but is already torn down.
            warn!("session {}: {}", query.session_id, err);
            (StatusCode::INTERNAL_SERVER_ERROR, "Session closed").into_response()
        }
    }
}
