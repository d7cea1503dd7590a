use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use serde_json::{json, Value};

use crate::api::error::ApiError;
use crate::api::server::AppState;
use crate::hooks::{HookEnvelope, WebhookKind};

/// Acknowledge once the envelope parses; processing happens on its own task.
pub async fn claude_code_hook(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = payload?;
    let envelope = HookEnvelope::from_value(body)?;
    log::debug!(
        "Hook {} received for agent {}",
        envelope.event.name(),
        envelope.agent_id
    );
    state.hooks.dispatch(envelope);
    Ok(Json(json!({ "success": true })))
}

pub async fn webhook(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = payload?;
    match kind.parse::<WebhookKind>() {
        Ok(kind) => {
            let envelope = HookEnvelope::from_webhook(kind, body)?;
            state.hooks.dispatch(envelope);
        }
        Err(reason) => log::warn!("Dropping webhook: {}", reason),
    }
    Ok(Json(json!({ "success": true })))
}
