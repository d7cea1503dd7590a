use anyhow::Result;
use async_trait::async_trait;

use crate::types::{Agent, AgentFilter};

/// Uniform record interface implemented by the durable and in-memory providers.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn get(&self, id: &str) -> Result<Option<Agent>>;
    async fn list(&self, filter: &AgentFilter) -> Result<Vec<Agent>>;

    /// Insert or replace the record keyed by `agent.id`.
    async fn put(&self, agent: &Agent) -> Result<()>;

    /// Returns whether a record was removed.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Succeeds only if the provider is reachable and serving requests.
    async fn ping(&self) -> Result<()>;
}
