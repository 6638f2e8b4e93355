use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use axum::{extract::State, middleware, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use tb_core::config::TerminalConfig;
use tb_session::{PtySpawner, TermSize};
use tb_telemetry::request_id::request_id_middleware;
use tokio::sync::RwLock;
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::protocol::SizePolicy;
use crate::registry::{SessionInfo, SessionRegistry};
use crate::session::SessionState;
use crate::terminal_ws;

/// Shared state for every connection the server accepts.
pub struct BridgeState {
    /// Launches the CLI for a session.
    pub spawner: Arc<dyn PtySpawner>,
    pub sessions: Arc<RwLock<SessionRegistry>>,
    pub size_policy: SizePolicy,
    /// Size a session assumes until its browser reports one.
    pub initial_size: TermSize,
    pub start_time: Instant,
}

impl BridgeState {
    pub fn new(spawner: Arc<dyn PtySpawner>, terminal: &TerminalConfig) -> Self {
        Self {
            spawner,
            sessions: Arc::new(RwLock::new(SessionRegistry::new())),
            size_policy: SizePolicy::from(terminal),
            initial_size: TermSize::new(terminal.initial_cols, terminal.initial_rows),
            start_time: Instant::now(),
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    sessions: usize,
    running: usize,
    uptime_secs: u64,
}

/// GET /health — liveness plus session counts.
async fn health(State(state): State<Arc<BridgeState>>) -> impl IntoResponse {
    let registry = state.sessions.read().await;
    Json(HealthResponse {
        status: "ok",
        sessions: registry.len(),
        running: registry.count_in(SessionState::Running),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET /api/sessions — connected sessions, oldest first.
async fn list_sessions(State(state): State<Arc<BridgeState>>) -> impl IntoResponse {
    let registry = state.sessions.read().await;
    let sessions: Vec<SessionInfo> = registry.list().into_iter().cloned().collect();
    Json(sessions)
}

/// Build the bridge router: `/ws`, `/health` and `/api/sessions`.
pub fn api_router(state: Arc<BridgeState>) -> Router {
    Router::new()
        .route("/ws", get(terminal_ws::terminal_ws))
        .route("/health", get(health))
        .route("/api/sessions", get(list_sessions))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// [`api_router`] plus static browser assets for every other path.
pub fn app_router(state: Arc<BridgeState>, static_dir: Option<&Path>) -> Router {
    let router = api_router(state);
    match static_dir {
        Some(dir) => {
            tracing::info!(path = %dir.display(), "serving static assets");
            router.fallback_service(ServeDir::new(dir))
        }
        None => router,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
