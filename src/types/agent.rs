use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

use super::{AgentId, AgentStatus, ContextMap, LogEntryId, LogLevel};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: AgentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<AgentId>,
    pub project_path: String,
    pub status: AgentStatus,
    pub created: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    #[serde(default)]
    pub context: ContextMap,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: LogEntryId,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ContextMap>,
}

/// Body of `POST /api/agents` and the input to `AgentStore::register`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRegistration {
    pub id: AgentId,
    #[serde(default)]
    pub parent_id: Option<AgentId>,
    pub project_path: String,
    #[serde(default)]
    pub status: Option<AgentStatus>,
    #[serde(default)]
    pub context: Option<ContextMap>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

impl Agent {
    pub fn new(id: AgentId, project_path: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            parent_id: None,
            project_path,
            status: AgentStatus::Idle,
            created: now,
            last_activity: now,
            context: ContextMap::new(),
            logs: Vec::new(),
            tags: BTreeSet::new(),
        }
    }

    /// Advance `last_activity`, strictly, even when the clock has not moved
    /// since the previous mutation.
    pub fn touch(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        self.last_activity = if now > self.last_activity {
            now
        } else {
            self.last_activity + Duration::microseconds(1)
        };
        self.last_activity
    }

    /// Shallow merge: top-level keys in `patch` replace existing ones.
    pub fn merge_context(&mut self, patch: ContextMap) {
        for (key, value) in patch {
            self.context.insert(key, value);
        }
    }

    /// Append a log entry, dropping the oldest entries beyond `max_logs`.
    pub fn push_log(&mut self, entry: LogEntry, max_logs: usize) {
        self.logs.push(entry);
        if self.logs.len() > max_logs {
            let overflow = self.logs.len() - max_logs;
            self.logs.drain(..overflow);
        }
    }

    pub fn context_size(&self) -> usize {
        serde_json::to_vec(&self.context)
            .map(|bytes| bytes.len())
            .unwrap_or(usize::MAX)
    }

    pub fn has_tags(&self, tags: &[String]) -> bool {
        tags.iter().all(|tag| self.tags.contains(tag))
    }

    /// Case-insensitive substring match over the fields the search endpoint covers.
    /// `needle` must already be lowercase.
    pub fn matches_search(&self, needle: &str) -> bool {
        if self.id.to_lowercase().contains(needle)
            || self.project_path.to_lowercase().contains(needle)
            || self.tags.iter().any(|t| t.to_lowercase().contains(needle))
        {
            return true;
        }
        self.context.values().any(|value| match value {
            Value::String(s) => s.to_lowercase().contains(needle),
            _ => false,
        })
    }
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            id: LogEntryId::new_v4(),
            timestamp: Utc::now(),
            level,
            message: message.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: ContextMap) -> Self {
        self.metadata = Some(metadata);
        self
    }
}
