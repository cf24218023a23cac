//! HTTP routes and per-request session startup.

use std::io;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;

use super::body::frame_channel;
use crate::config::Config;
use crate::error::DaemonError;
use crate::metrics;
use crate::producer::{create_producer, ProducerSpec};
use crate::registry::SessionRegistry;
use crate::streaming::{cancel_pair, StreamSession, SSE_HEADERS};

const SERVICE_NAME: &str = "sse-streaming-rs";
const DEFAULT_PROMPT: &str = "Tell me about streaming";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppInner>,
}

struct AppInner {
    config: Config,
    registry: SessionRegistry,
    session_permits: Arc<Semaphore>,
}

impl AppState {
    pub fn new(config: Config, registry: SessionRegistry) -> Self {
        let limit = config.server.max_sessions.min(Semaphore::MAX_PERMITS);
        let session_permits = Arc::new(Semaphore::new(limit));
        Self {
            inner: Arc::new(AppInner {
                config,
                registry,
                session_permits,
            }),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    /// Remaining session capacity.
    pub fn available_permits(&self) -> usize {
        self.inner.session_permits.available_permits()
    }

    /// Spawn a session for `spec` and return its streaming response.
    pub fn start_stream(&self, spec: ProducerSpec) -> Result<Response, DaemonError> {
        let inner = &self.inner;
        if inner.registry.is_shutdown() {
            return Err(DaemonError::Shutdown);
        }

        let permit = inner
            .session_permits
            .clone()
            .try_acquire_owned()
            .map_err(|_| DaemonError::SessionLimit)?;

        metrics::record_session_opened();
        let guard = inner.registry.register_session();
        let producer = create_producer(spec, &inner.config.producers);

        let (handle, signal) = cancel_pair();
        let signal = signal.with_shutdown(guard.subscribe());
        let (sink, body) = frame_channel(inner.config.server.write_timeout(), handle);

        let mut session = StreamSession::new(guard.id(), producer, sink, signal)
            .with_keepalive(inner.config.server.keepalive_interval())
            .with_guard(guard);

        tokio::spawn(async move {
            // Capacity is returned once the session has closed
            let _permit = permit;
            session.run().await;
        });

        Ok((SSE_HEADERS, Body::from_stream(body)).into_response())
    }

    fn stream(&self, spec: ProducerSpec) -> Response {
        self.start_stream(spec).unwrap_or_else(rejected)
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/stream", get(stream_heartbeat))
        .route("/stream/llm", get(stream_llm))
        .route("/stream/progress/{task_name}", get(stream_progress))
        .route("/stream/post", post(stream_post))
        .with_state(state)
}

/// Serve `state` on `listener` until the registry shuts down.
///
/// Whatever ends the server also shuts the registry down, so waiters on the
/// shutdown broadcast never outlive it.
pub async fn serve(listener: TcpListener, state: AppState) -> io::Result<()> {
    let registry = state.registry().clone();
    let mut shutdown_rx = registry.subscribe();

    let result = axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.wait_for(|shutdown| *shutdown).await;
        })
        .await;

    if !registry.is_shutdown() {
        tracing::warn!("Server exited before shutdown was requested");
        registry.shutdown();
    }
    result
}

/// Map a refused stream request to an HTTP response.
pub fn rejected(err: DaemonError) -> Response {
    let status = match &err {
        DaemonError::SessionLimit | DaemonError::Shutdown => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    metrics::record_session_rejected();
    tracing::warn!(error = %err, status = status.as_u16(), "Stream request rejected");
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}

/// GET /
async fn index() -> impl IntoResponse {
    Json(json!({
        "message": "SSE streaming API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "basic_stream": "/stream",
            "llm_stream": "/stream/llm",
            "progress_stream": "/stream/progress/{task_name}",
            "post_stream": "/stream/post"
        },
        "health": "/health"
    }))
}

/// GET /health
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "active_sessions": state.registry().active_sessions()
    }))
}

/// GET /stream
///
/// Heartbeat every `heartbeat_interval_ms`, forever unless a limit is set.
async fn stream_heartbeat(State(state): State<AppState>) -> Response {
    state.stream(ProducerSpec::Heartbeat)
}

#[derive(Debug, Deserialize)]
struct LlmQuery {
    prompt: Option<String>,
}

/// GET /stream/llm?prompt=...
async fn stream_llm(State(state): State<AppState>, Query(query): Query<LlmQuery>) -> Response {
    let prompt = query.prompt.unwrap_or_else(|| DEFAULT_PROMPT.to_string());
    state.stream(ProducerSpec::Tokens { prompt })
}

#[derive(Debug, Deserialize)]
struct ProgressQuery {
    steps: Option<u32>,
}

/// GET /stream/progress/{task_name}?steps=N
async fn stream_progress(
    State(state): State<AppState>,
    Path(task_name): Path<String>,
    Query(query): Query<ProgressQuery>,
) -> Response {
    state.stream(ProducerSpec::Progress {
        task: task_name,
        steps: query.steps,
    })
}

#[derive(Debug, Deserialize)]
struct EchoQuery {
    chunk_size: Option<usize>,
}

/// Body of `POST /stream/post`.
#[derive(Debug, Deserialize)]
pub struct EchoRequest {
    pub message: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// POST /stream/post
///
/// Echoes `message` back in chunks of `chunk_size` words.
async fn stream_post(
    State(state): State<AppState>,
    Query(query): Query<EchoQuery>,
    Json(request): Json<EchoRequest>,
) -> Response {
    tracing::debug!(
        user_id = ?request.user_id,
        message_len = request.message.len(),
        "Echo request"
    );
    state.stream(ProducerSpec::Echo {
        body: request.message,
        user_id: request.user_id,
        chunk_size: query.chunk_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_limit(max_sessions: usize) -> AppState {
        let mut config = Config::default();
        config.server.max_sessions = max_sessions;
        AppState::new(config, SessionRegistry::new())
    }

    #[tokio::test]
    async fn test_session_limit_rejects() {
        let state = state_with_limit(1);

        let first = state.start_stream(ProducerSpec::Heartbeat).unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(
            first.headers().get("content-type").unwrap(),
            "text/event-stream"
        );
        assert_eq!(state.available_permits(), 0);

        let second = state.start_stream(ProducerSpec::Heartbeat);
        assert!(matches!(second, Err(DaemonError::SessionLimit)));
    }

    #[tokio::test]
    async fn test_shutdown_rejects() {
        let state = state_with_limit(10);
        state.registry().shutdown();

        let result = state.start_stream(ProducerSpec::Heartbeat);
        assert!(matches!(result, Err(DaemonError::Shutdown)));
        assert_eq!(state.available_permits(), 10);
    }

    #[tokio::test]
    async fn test_oversized_limit_is_clamped() {
        let state = state_with_limit(usize::MAX);
        assert_eq!(state.available_permits(), Semaphore::MAX_PERMITS);

        let response = state.start_stream(ProducerSpec::Heartbeat).unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.available_permits(), Semaphore::MAX_PERMITS - 1);
    }

    #[tokio::test]
    async fn test_serve_returns_on_shutdown() {
        let state = state_with_limit(10);
        let registry = state.registry().clone();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let server = tokio::spawn(serve(listener, state));
        registry.shutdown();

        let result = tokio::time::timeout(std::time::Duration::from_secs(5), server)
            .await
            .expect("server should stop after shutdown")
            .unwrap();
        assert!(result.is_ok());
    }

    #[test]
    fn test_rejected_status() {
        assert_eq!(
            rejected(DaemonError::SessionLimit).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            rejected(DaemonError::Config("x".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_echo_request_user_id_optional() {
        let request: EchoRequest = serde_json::from_str(r#"{"message":"hi"}"#).unwrap();
        assert_eq!(request.message, "hi");
        assert!(request.user_id.is_none());
    }
}
