use thiserror::Error;

pub type AgentResult<T> = std::result::Result<T, AgentError>;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("{0}")]
    Validation(String),

    #[error("agent not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    /// Both storage providers failed for the same operation.
    #[error("storage unavailable: {0}")]
    Storage(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AgentError {
    pub fn validation(message: impl Into<String>) -> Self {
        AgentError::Validation(message.into())
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        AgentError::NotFound(id.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AgentError::NotFound(_))
    }
}

pub(crate) fn require_id(field: &str, value: &str) -> AgentResult<()> {
    if value.trim().is_empty() {
        return Err(AgentError::validation(format!("{} must not be empty", field)));
    }
    Ok(())
}
