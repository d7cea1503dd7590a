use anyhow::Result;
use axum::{
    routing::{get, patch, post},
    Router,
};
use std::future::Future;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::api::{handlers, hooks, ws};
use crate::hooks::HookEventProcessor;
use crate::hub::BroadcastHub;
use crate::store::AgentStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<AgentStore>,
    pub hooks: Arc<HookEventProcessor>,
    pub hub: Arc<BroadcastHub>,
}

impl AppState {
    pub fn new(store: Arc<AgentStore>) -> Self {
        Self {
            hooks: Arc::new(HookEventProcessor::new(Arc::clone(&store))),
            hub: Arc::clone(store.hub()),
            store,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/api/agents",
            get(handlers::list_agents).post(handlers::register_agent),
        )
        .route("/api/agents/handoff", post(handlers::handoff))
        .route("/api/agents/hierarchy", get(handlers::hierarchy))
        .route("/api/agents/hierarchy/:root_id", get(handlers::hierarchy_from))
        .route("/api/agents/search/:query", get(handlers::search_agents))
        .route(
            "/api/agents/projects/:project_path/stats",
            get(handlers::project_stats),
        )
        .route(
            "/api/agents/:id",
            get(handlers::get_agent).delete(handlers::delete_agent),
        )
        .route("/api/agents/:id/status", patch(handlers::update_status))
        .route("/api/agents/:id/logs", post(handlers::add_log))
        .route("/api/agents/:id/context", patch(handlers::update_context))
        .route("/api/hooks/claude-code", post(hooks::claude_code_hook))
        .route("/api/hooks/webhook/:kind", post(hooks::webhook))
        .route("/ws", get(ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve<F>(state: AppState, host: &str, port: u16, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(format!("{}:{}", host, port)).await?;

    log::info!("Switchboard listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
