use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::error::ApiError;
use crate::api::server::AppState;
use crate::types::{
    Agent, AgentFilter, AgentRegistration, AgentStats, AgentStatus, ContextMap, HandoffRequest,
    HierarchyNode, LogLevel,
};

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListAgentsQuery {
    pub project_path: Option<String>,
    pub status: Option<String>,
    pub parent_id: Option<String>,
    /// Comma separated; an agent must carry every listed tag.
    pub tags: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl From<ListAgentsQuery> for AgentFilter {
    fn from(query: ListAgentsQuery) -> Self {
        AgentFilter {
            project_path: query.project_path.filter(|p| !p.is_empty()),
            status: query
                .status
                .filter(|s| !s.is_empty())
                .map(AgentStatus::from),
            parent_id: query.parent_id.filter(|p| !p.is_empty()),
            tags: query
                .tags
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|t| !t.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            limit: query.limit,
            offset: query.offset.unwrap_or(0),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: AgentStatus,
}

#[derive(Debug, Deserialize)]
pub struct NewLogEntry {
    pub level: LogLevel,
    pub message: String,
    #[serde(default)]
    pub metadata: Option<ContextMap>,
}

#[derive(Debug, Deserialize)]
pub struct ContextUpdate {
    pub context: ContextMap,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    pub limit: Option<usize>,
}

pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let storage = state.store.storage();
    let degraded = storage.is_degraded();
    Json(json!({
        "status": if degraded { "degraded" } else { "healthy" },
        "timestamp": Utc::now(),
        "version": env!("CARGO_PKG_VERSION"),
        "storage": {
            "mode": storage.mode(),
            "degraded": degraded,
        },
        "connections": state.hub.connection_count().await,
    }))
}

pub async fn list_agents(
    State(state): State<AppState>,
    query: Result<Query<ListAgentsQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<Agent>>> {
    let Query(query) = query?;
    let agents = state.store.query(&AgentFilter::from(query)).await?;
    Ok(Json(agents))
}

pub async fn get_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Agent>> {
    Ok(Json(state.store.get(&id).await?))
}

pub async fn register_agent(
    State(state): State<AppState>,
    payload: Result<Json<AgentRegistration>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Agent>)> {
    let Json(registration) = payload?;
    let (agent, created) = state.store.register(registration).await?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(agent)))
}

pub async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<StatusUpdate>, JsonRejection>,
) -> ApiResult<Json<Agent>> {
    let Json(update) = payload?;
    Ok(Json(state.store.update_status(&id, update.status).await?))
}

pub async fn add_log(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<NewLogEntry>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let Json(entry) = payload?;
    state
        .store
        .add_log(&id, entry.level, &entry.message, entry.metadata)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn update_context(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<ContextUpdate>, JsonRejection>,
) -> ApiResult<Json<Agent>> {
    let Json(update) = payload?;
    Ok(Json(state.store.update_context(&id, update.context).await?))
}

pub async fn handoff(
    State(state): State<AppState>,
    payload: Result<Json<HandoffRequest>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let Json(request) = payload?;
    state.store.handoff(request).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.store.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn project_stats(
    State(state): State<AppState>,
    Path(project_path): Path<String>,
) -> ApiResult<Json<AgentStats>> {
    Ok(Json(state.store.stats(Some(&project_path)).await?))
}

pub async fn search_agents(
    State(state): State<AppState>,
    Path(query): Path<String>,
    params: Result<Query<SearchQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<Agent>>> {
    let Query(params) = params?;
    Ok(Json(state.store.search(&query, params.limit).await?))
}

pub async fn hierarchy(State(state): State<AppState>) -> ApiResult<Json<Vec<HierarchyNode>>> {
    Ok(Json(state.store.hierarchy(None).await?))
}

pub async fn hierarchy_from(
    State(state): State<AppState>,
    Path(root_id): Path<String>,
) -> ApiResult<Json<Vec<HierarchyNode>>> {
    Ok(Json(state.store.hierarchy(Some(&root_id)).await?))
}
