use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AgentId, ContextMap};

/// Record of an ownership transfer between two agents. Broadcast and logged,
/// never stored as a field on either agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoffContext {
    pub from_agent_id: AgentId,
    pub to_agent_id: AgentId,
    pub context: ContextMap,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Body of `POST /api/agents/handoff`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoffRequest {
    pub from_agent_id: AgentId,
    pub to_agent_id: AgentId,
    #[serde(default)]
    pub context: ContextMap,
    #[serde(default)]
    pub reason: String,
}

impl HandoffRequest {
    pub fn into_context(self) -> HandoffContext {
        HandoffContext {
            from_agent_id: self.from_agent_id,
            to_agent_id: self.to_agent_id,
            context: self.context,
            reason: self.reason,
            timestamp: Utc::now(),
        }
    }
}
