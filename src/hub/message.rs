use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::hub::channel::Channel;
use crate::types::{Agent, HandoffContext, LogEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerMessageKind {
    AgentUpdate,
    AgentDeleted,
    LogEntry,
    Handoff,
    Ping,
    Subscribed,
    Error,
}

/// Server to client frame: `{type, data, timestamp}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage {
    #[serde(rename = "type")]
    pub kind: ServerMessageKind,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl ServerMessage {
    pub fn new(kind: ServerMessageKind, data: Value) -> Self {
        Self {
            kind,
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn agent_update(agent: &Agent) -> Self {
        Self::new(
            ServerMessageKind::AgentUpdate,
            serde_json::to_value(agent).unwrap_or(Value::Null),
        )
    }

    pub fn agent_deleted(id: &str, project_path: &str) -> Self {
        Self::new(
            ServerMessageKind::AgentDeleted,
            json!({ "id": id, "projectPath": project_path }),
        )
    }

    pub fn log_entry(agent_id: &str, entry: &LogEntry) -> Self {
        Self::new(
            ServerMessageKind::LogEntry,
            json!({ "agentId": agent_id, "entry": entry }),
        )
    }

    pub fn handoff(handoff: &HandoffContext) -> Self {
        Self::new(
            ServerMessageKind::Handoff,
            serde_json::to_value(handoff).unwrap_or(Value::Null),
        )
    }

    pub fn ping() -> Self {
        Self::new(ServerMessageKind::Ping, Value::Null)
    }

    pub fn subscribed(channels: &[Channel]) -> Self {
        Self::new(ServerMessageKind::Subscribed, json!({ "channels": channels }))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ServerMessageKind::Error, json!({ "message": message.into() }))
    }
}

/// Client to server control frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Subscribe(Vec<Channel>),
    Unsubscribe(Vec<Channel>),
    Pong,
}

#[derive(Deserialize)]
struct RawClientFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, String> {
        let frame: RawClientFrame =
            serde_json::from_str(text).map_err(|e| format!("malformed frame: {}", e))?;

        match frame.kind.as_str() {
            "subscribe" => Ok(ClientMessage::Subscribe(parse_channels(&frame.data)?)),
            "unsubscribe" => Ok(ClientMessage::Unsubscribe(parse_channels(&frame.data)?)),
            "pong" => Ok(ClientMessage::Pong),
            other => Err(format!("unsupported message type: {}", other)),
        }
    }
}

fn parse_channels(data: &Value) -> Result<Vec<Channel>, String> {
    let raw = match data.get("channels") {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .ok_or_else(|| "channel names must be strings".to_string())
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(Value::String(single)) => vec![single.as_str()],
        _ => return Err("data.channels must be a list of channel names".to_string()),
    };

    raw.into_iter()
        .map(|name| name.parse::<Channel>().map_err(|e| e.to_string()))
        .collect()
}
