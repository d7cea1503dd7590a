use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::types::{AgentId, ContextMap};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HookParseError {
    #[error("hook payload must be a JSON object")]
    NotAnObject,

    #[error("missing or empty field: {0}")]
    MissingField(&'static str),

    #[error("invalid timestamp {0:?}, expected ISO 8601")]
    BadTimestamp(String),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentStarted {
    pub project_path: Option<String>,
    pub parent_id: Option<AgentId>,
    pub tags: Option<Vec<String>>,
    pub context: Option<ContextMap>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentStopped {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentFailed {
    pub error: Option<String>,
    pub message: Option<String>,
    pub details: Option<Value>,
}

impl AgentFailed {
    pub fn description(&self) -> &str {
        self.error
            .as_deref()
            .or(self.message.as_deref())
            .unwrap_or("agent reported an error")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolCall {
    #[serde(alias = "toolName")]
    pub tool: Option<String>,
    pub input: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolResult {
    #[serde(alias = "toolName")]
    pub tool: Option<String>,
    pub success: Option<bool>,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
}

impl ToolResult {
    /// Missing `success` counts as success.
    pub fn failed(&self) -> bool {
        self.success == Some(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskEvent {
    pub task: Option<Value>,
    pub description: Option<String>,
    pub result: Option<Value>,
}

impl TaskEvent {
    /// The value recorded in the agent's context.
    pub fn task_value(&self) -> Value {
        match (&self.task, &self.description) {
            (Some(task), _) => task.clone(),
            (None, Some(description)) => Value::String(description.clone()),
            (None, None) => Value::Null,
        }
    }

    pub fn label(&self) -> String {
        if let Some(description) = &self.description {
            return description.clone();
        }
        match &self.task {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Object(task)) => task
                .get("description")
                .or_else(|| task.get("title"))
                .or_else(|| task.get("id"))
                .and_then(Value::as_str)
                .unwrap_or("task")
                .to_string(),
            _ => "task".to_string(),
        }
    }
}

/// Known lifecycle events, plus a catch-all that keeps the raw payload.
#[derive(Debug, Clone, PartialEq)]
pub enum HookEvent {
    AgentStarted(AgentStarted),
    AgentStopped(AgentStopped),
    AgentError(AgentFailed),
    ToolCalled(ToolCall),
    ToolCompleted(ToolResult),
    ContextUpdated(ContextMap),
    TaskStarted(TaskEvent),
    TaskCompleted(TaskEvent),
    Unknown { event_type: String, payload: Value },
    /// A known event whose `data` does not have the expected shape.
    Malformed {
        event_type: String,
        reason: String,
        payload: Value,
    },
}

impl HookEvent {
    /// Never fails: bad `data` is carried as `Malformed` and dropped during processing.
    pub fn parse(event_type: &str, data: Value) -> Self {
        let decoded = match event_type {
            "agent.started" => decode(&data).map(HookEvent::AgentStarted),
            "agent.stopped" => decode(&data).map(HookEvent::AgentStopped),
            "agent.error" => decode(&data).map(HookEvent::AgentError),
            "tool.called" => decode(&data).map(HookEvent::ToolCalled),
            "tool.completed" => decode(&data).map(HookEvent::ToolCompleted),
            "context.updated" if data.is_object() => {
                return HookEvent::ContextUpdated(context_patch(data))
            }
            "context.updated" => Err("data must be an object".to_string()),
            "task.started" => decode(&data).map(HookEvent::TaskStarted),
            "task.completed" => decode(&data).map(HookEvent::TaskCompleted),
            other => {
                return HookEvent::Unknown {
                    event_type: other.to_string(),
                    payload: data,
                }
            }
        };
        decoded.unwrap_or_else(|reason| HookEvent::Malformed {
            event_type: event_type.to_string(),
            reason,
            payload: data,
        })
    }

    pub fn name(&self) -> &str {
        match self {
            HookEvent::AgentStarted(_) => "agent.started",
            HookEvent::AgentStopped(_) => "agent.stopped",
            HookEvent::AgentError(_) => "agent.error",
            HookEvent::ToolCalled(_) => "tool.called",
            HookEvent::ToolCompleted(_) => "tool.completed",
            HookEvent::ContextUpdated(_) => "context.updated",
            HookEvent::TaskStarted(_) => "task.started",
            HookEvent::TaskCompleted(_) => "task.completed",
            HookEvent::Unknown { event_type, .. } | HookEvent::Malformed { event_type, .. } => {
                event_type
            }
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(
            self,
            HookEvent::Unknown { .. } | HookEvent::Malformed { .. }
        )
    }
}

/// `{type, agentId, timestamp, data}` as posted by hook emitters.
#[derive(Debug, Clone, PartialEq)]
pub struct HookEnvelope {
    pub agent_id: AgentId,
    pub timestamp: DateTime<Utc>,
    /// `data.projectPath`, used when the agent has to be registered on the fly.
    pub project_path: Option<String>,
    pub event: HookEvent,
}

impl HookEnvelope {
    pub fn from_value(value: Value) -> Result<Self, HookParseError> {
        let Value::Object(mut body) = value else {
            return Err(HookParseError::NotAnObject);
        };

        let event_type = take_string(&mut body, "type").ok_or(HookParseError::MissingField("type"))?;
        let agent_id =
            take_string(&mut body, "agentId").ok_or(HookParseError::MissingField("agentId"))?;
        let timestamp = match body.remove("timestamp") {
            None | Some(Value::Null) => Utc::now(),
            Some(Value::String(raw)) => parse_timestamp(&raw)?,
            Some(other) => return Err(HookParseError::BadTimestamp(other.to_string())),
        };
        let data = match body.remove("data") {
            None | Some(Value::Null) => Value::Object(Map::new()),
            Some(data) => data,
        };

        let project_path = project_path_of(&data);
        let event = HookEvent::parse(&event_type, data);
        Ok(Self {
            agent_id,
            timestamp,
            project_path,
            event,
        })
    }

    /// Generic webhook body: `agentId` at the top level, everything else is event data.
    pub fn from_webhook(kind: WebhookKind, value: Value) -> Result<Self, HookParseError> {
        let Value::Object(mut body) = value else {
            return Err(HookParseError::NotAnObject);
        };

        let agent_id =
            take_string(&mut body, "agentId").ok_or(HookParseError::MissingField("agentId"))?;
        let timestamp = match body.remove("timestamp") {
            Some(Value::String(raw)) => parse_timestamp(&raw)?,
            _ => Utc::now(),
        };
        let data = match body.remove("data") {
            Some(data @ Value::Object(_)) => data,
            _ => Value::Object(body),
        };

        let project_path = project_path_of(&data);
        let event = HookEvent::parse(kind.event_type(), data);
        Ok(Self {
            agent_id,
            timestamp,
            project_path,
            event,
        })
    }
}

/// Route tag of `POST /api/hooks/webhook/:type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookKind {
    Start,
    Stop,
    Error,
    ContextUpdate,
}

impl WebhookKind {
    pub fn event_type(self) -> &'static str {
        match self {
            WebhookKind::Start => "agent.started",
            WebhookKind::Stop => "agent.stopped",
            WebhookKind::Error => "agent.error",
            WebhookKind::ContextUpdate => "context.updated",
        }
    }
}

impl FromStr for WebhookKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(WebhookKind::Start),
            "stop" => Ok(WebhookKind::Stop),
            "error" => Ok(WebhookKind::Error),
            "context-update" => Ok(WebhookKind::ContextUpdate),
            other => Err(format!("unrecognized webhook type: {}", other)),
        }
    }
}

impl fmt::Display for WebhookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            WebhookKind::Start => "start",
            WebhookKind::Stop => "stop",
            WebhookKind::Error => "error",
            WebhookKind::ContextUpdate => "context-update",
        };
        f.write_str(tag)
    }
}

fn decode<T: DeserializeOwned>(data: &Value) -> Result<T, String> {
    T::deserialize(data).map_err(|e| e.to_string())
}

/// `data.context` when it is an object, otherwise the whole of `data`.
fn context_patch(data: Value) -> ContextMap {
    match data {
        Value::Object(mut map) => match map.remove("context") {
            Some(Value::Object(context)) => context,
            Some(other) => {
                map.insert("context".to_string(), other);
                map
            }
            None => map,
        },
        _ => ContextMap::new(),
    }
}

fn project_path_of(data: &Value) -> Option<String> {
    data.get("projectPath")
        .and_then(Value::as_str)
        .filter(|p| !p.is_empty())
        .map(String::from)
}

fn take_string(body: &mut Map<String, Value>, key: &'static str) -> Option<String> {
    match body.remove(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s),
        _ => None,
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, HookParseError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| HookParseError::BadTimestamp(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_envelope() {
        let envelope = HookEnvelope::from_value(json!({
            "type": "agent.started",
            "agentId": "a1",
            "timestamp": "2024-05-01T12:00:00Z",
            "data": {"projectPath": "/p", "parentId": "root"}
        }))
        .unwrap();

        assert_eq!(envelope.agent_id, "a1");
        assert_eq!(envelope.project_path.as_deref(), Some("/p"));
        assert_eq!(envelope.timestamp.to_rfc3339(), "2024-05-01T12:00:00+00:00");
        match envelope.event {
            HookEvent::AgentStarted(started) => {
                assert_eq!(started.parent_id.as_deref(), Some("root"))
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_keeps_payload() {
        let envelope = HookEnvelope::from_value(json!({
            "type": "foo.bar",
            "agentId": "a1",
            "data": {"x": 1}
        }))
        .unwrap();

        assert!(!envelope.event.is_known());
        assert_eq!(envelope.event.name(), "foo.bar");
        assert_eq!(
            envelope.event,
            HookEvent::Unknown {
                event_type: "foo.bar".to_string(),
                payload: json!({"x": 1}),
            }
        );
    }

    #[test]
    fn test_structural_errors() {
        assert_eq!(
            HookEnvelope::from_value(json!([1, 2])),
            Err(HookParseError::NotAnObject)
        );
        assert_eq!(
            HookEnvelope::from_value(json!({"agentId": "a1"})),
            Err(HookParseError::MissingField("type"))
        );
        assert_eq!(
            HookEnvelope::from_value(json!({"type": "agent.stopped", "agentId": ""})),
            Err(HookParseError::MissingField("agentId"))
        );
        assert!(matches!(
            HookEnvelope::from_value(json!({
                "type": "agent.stopped", "agentId": "a1", "timestamp": "yesterday"
            })),
            Err(HookParseError::BadTimestamp(_))
        ));
    }

    #[test]
    fn test_bad_data_is_malformed_not_rejected() {
        let envelope = HookEnvelope::from_value(json!({
            "type": "tool.completed", "agentId": "a1", "data": {"success": "maybe"}
        }))
        .unwrap();
        assert!(!envelope.event.is_known());
        assert_eq!(envelope.event.name(), "tool.completed");
        match envelope.event {
            HookEvent::Malformed { payload, .. } => assert_eq!(payload, json!({"success": "maybe"})),
            other => panic!("unexpected event: {:?}", other),
        }

        let scalar = HookEnvelope::from_value(json!({
            "type": "agent.stopped", "agentId": "a1", "data": "done"
        }))
        .unwrap();
        assert!(matches!(scalar.event, HookEvent::Malformed { .. }));
    }

    #[test]
    fn test_context_patch_shapes() {
        let nested = HookEvent::parse("context.updated", json!({"context": {"k": 1}}));
        let flat = HookEvent::parse("context.updated", json!({"k": 1}));
        assert_eq!(nested, flat);
    }

    #[test]
    fn test_webhook_body() {
        let kind: WebhookKind = "context-update".parse().unwrap();
        let envelope =
            HookEnvelope::from_webhook(kind, json!({"agentId": "a1", "branch": "main"})).unwrap();

        match envelope.event {
            HookEvent::ContextUpdated(patch) => {
                assert_eq!(patch.get("branch"), Some(&json!("main")));
                assert!(patch.get("agentId").is_none());
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!("restart".parse::<WebhookKind>().is_err());
    }

    #[test]
    fn test_task_label() {
        let task = TaskEvent {
            task: Some(json!({"title": "write docs"})),
            ..TaskEvent::default()
        };
        assert_eq!(task.label(), "write docs");
        assert_eq!(TaskEvent::default().task_value(), Value::Null);
    }
}
