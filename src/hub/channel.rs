use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::types::AgentId;

/// Broadcast topic. Serialized as `agent:<id>`, `project:<path>` or `global`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Channel {
    Global,
    Agent(AgentId),
    Project(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid channel name: {0:?}")]
pub struct ChannelParseError(pub String);

impl Channel {
    pub fn agent(id: impl Into<AgentId>) -> Self {
        Channel::Agent(id.into())
    }

    pub fn project(path: impl Into<String>) -> Self {
        Channel::Project(path.into())
    }

    /// Every channel an update about this agent is published to.
    pub fn for_agent(id: &str, project_path: &str) -> [Channel; 3] {
        [
            Channel::agent(id),
            Channel::project(project_path),
            Channel::Global,
        ]
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Global => f.write_str("global"),
            Channel::Agent(id) => write!(f, "agent:{}", id),
            Channel::Project(path) => write!(f, "project:{}", path),
        }
    }
}

impl FromStr for Channel {
    type Err = ChannelParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "global" || s == "*" {
            return Ok(Channel::Global);
        }
        if let Some(id) = s.strip_prefix("agent:") {
            if !id.is_empty() {
                return Ok(Channel::agent(id));
            }
        }
        if let Some(path) = s.strip_prefix("project:") {
            if !path.is_empty() {
                return Ok(Channel::project(path));
            }
        }
        Err(ChannelParseError(s.to_string()))
    }
}

impl TryFrom<String> for Channel {
    type Error = ChannelParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Channel> for String {
    fn from(channel: Channel) -> Self {
        channel.to_string()
    }
}
