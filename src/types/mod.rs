pub mod agent;
pub mod handoff;
pub mod query;

pub use agent::{Agent, AgentRegistration, LogEntry};
pub use handoff::{HandoffContext, HandoffRequest};
pub use query::{AgentFilter, AgentStats, HierarchyNode};

use serde::{Deserialize, Serialize};
use std::fmt;

pub type AgentId = String;
pub type LogEntryId = uuid::Uuid;

pub type ContextMap = serde_json::Map<String, serde_json::Value>;

/// Lifecycle status of an agent.
///
/// Statuses read back from storage that this build does not recognize are
/// kept verbatim in `Unknown` so they still round-trip and can be counted.
/// Mutations reject them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AgentStatus {
    Idle,
    Active,
    Error,
    Handoff,
    Complete,
    Unknown(String),
}

impl AgentStatus {
    pub const KNOWN: [AgentStatus; 5] = [
        AgentStatus::Idle,
        AgentStatus::Active,
        AgentStatus::Error,
        AgentStatus::Handoff,
        AgentStatus::Complete,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Active => "active",
            AgentStatus::Error => "error",
            AgentStatus::Handoff => "handoff",
            AgentStatus::Complete => "complete",
            AgentStatus::Unknown(raw) => raw,
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, AgentStatus::Unknown(_))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentStatus::Complete)
    }
}

impl Default for AgentStatus {
    fn default() -> Self {
        AgentStatus::Idle
    }
}

impl From<String> for AgentStatus {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "idle" => AgentStatus::Idle,
            "active" => AgentStatus::Active,
            "error" => AgentStatus::Error,
            "handoff" => AgentStatus::Handoff,
            "complete" => AgentStatus::Complete,
            _ => AgentStatus::Unknown(raw),
        }
    }
}

impl From<&str> for AgentStatus {
    fn from(raw: &str) -> Self {
        AgentStatus::from(raw.to_string())
    }
}

impl From<AgentStatus> for String {
    fn from(status: AgentStatus) -> Self {
        match status {
            AgentStatus::Unknown(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Debug,
}
