//! HTTP API: start and stop sessions, read summaries, stream progress.

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};

use pagewise::ScrapeRequest;

use crate::session::SessionManager;
use crate::types::{ServerError, ServerResult, SessionSummary, StartResponse, StopRequest};

/// Shared state handed to every handler.
pub struct ServerState {
    pub manager: Arc<SessionManager>,
    pub started_at: Instant,
}

impl ServerState {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self {
            manager,
            started_at: Instant::now(),
        }
    }
}

/// Build the router with every endpoint.
pub fn router(state: Arc<ServerState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/scrape", post(handle_start))
        .route("/api/stop", post(handle_stop_body))
        .route("/api/fields", get(handle_fields))
        .route("/api/events", get(handle_bus_events))
        .route("/api/sessions", get(handle_list))
        .route("/api/sessions/:id", get(handle_summary))
        .route("/api/sessions/:id/stop", post(handle_stop))
        .route("/api/sessions/:id/events", get(handle_session_events))
        .layer(cors)
        .with_state(state)
}

/// HTTP transport for the scrape API.
pub struct HttpTransport {
    state: Arc<ServerState>,
}

impl HttpTransport {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self {
            state: Arc::new(ServerState::new(manager)),
        }
    }

    /// Serve on `addr` until `shutdown` resolves.
    pub async fn run(
        &self,
        addr: &str,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> ServerResult<()> {
        let app = router(Arc::clone(&self.state));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;

        tracing::info!("HTTP API listening on http://{local}");
        self.state
            .manager
            .events()
            .emit(crate::events::ScrapeEvent::ServerStarted {
                version: env!("CARGO_PKG_VERSION").to_string(),
                addr: local.to_string(),
            });

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

// ── Handlers ────────────────────────────────────────────────────

async fn handle_health(State(state): State<Arc<ServerState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "activeSessions": state.manager.active_count().await,
        "uptimeSecs": state.started_at.elapsed().as_secs(),
    }))
}

async fn handle_start(
    State(state): State<Arc<ServerState>>,
    body: Result<Json<ScrapeRequest>, JsonRejection>,
) -> ServerResult<impl IntoResponse> {
    let Json(request) = body.map_err(|e| ServerError::InvalidRequest(e.body_text()))?;
    let session_id = state.manager.start(request).await?;
    Ok((StatusCode::ACCEPTED, Json(StartResponse { session_id })))
}

async fn handle_stop(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> ServerResult<Json<Value>> {
    state.manager.stop(&id).await?;
    Ok(Json(json!({ "sessionId": id, "stopping": true })))
}

async fn handle_stop_body(
    State(state): State<Arc<ServerState>>,
    body: Result<Json<StopRequest>, JsonRejection>,
) -> ServerResult<Json<Value>> {
    let Json(StopRequest { session_id }) =
        body.map_err(|e| ServerError::InvalidRequest(e.body_text()))?;
    handle_stop(State(state), Path(session_id)).await
}

async fn handle_summary(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> ServerResult<Json<SessionSummary>> {
    Ok(Json(state.manager.summary(&id).await?))
}

async fn handle_list(State(state): State<Arc<ServerState>>) -> Json<Value> {
    let sessions = state.manager.list().await;
    Json(json!({ "count": sessions.len(), "sessions": sessions }))
}

async fn handle_fields(State(state): State<Arc<ServerState>>) -> Json<Value> {
    let fields: Vec<&str> = state.manager.orchestrator().registry().names().collect();
    Json(json!({ "fields": fields }))
}

/// Progress of one session as SSE. The stream ends after the terminal
/// event.
async fn handle_session_events(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> ServerResult<Sse<impl futures::Stream<Item = Result<Event, Infallible>>>> {
    let mut subscription = state.manager.subscribe(&id).await?;

    let stream = async_stream::stream! {
        while let Some(event) = subscription.receiver.recv().await {
            let is_final = event.is_final;
            if let Ok(json) = serde_json::to_string(&event) {
                yield Ok(Event::default().data(json));
            }
            if is_final {
                break;
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[derive(serde::Deserialize, Default)]
struct BusParams {
    session: Option<String>,
}

/// Lifecycle events of all sessions as SSE, optionally filtered with
/// `?session=<id>`.
async fn handle_bus_events(
    Query(params): Query<BusParams>,
    State(state): State<Arc<ServerState>>,
) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.manager.events().subscribe();
    let session_filter = params.session;

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Some(ref id) = session_filter {
                        if !event.matches_session(id) {
                            continue;
                        }
                    }
                    if let Ok(json) = serde_json::to_string(&event) {
                        yield Ok(Event::default().data(json));
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!("Event stream lagged, skipped {n} events");
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
