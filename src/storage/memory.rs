use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::storage::traits::StorageBackend;
use crate::types::{Agent, AgentFilter, AgentId};

/// Guarded in-process map of agents.
///
/// Doubles as the fallback provider while the durable store is unreachable.
/// `evict_expired` drops `complete` agents that have been idle longer than the
/// configured TTL; agents in any other status are never evicted.
#[derive(Clone)]
pub struct InMemoryStore {
    agents: Arc<RwLock<HashMap<AgentId, Agent>>>,
    ttl: Option<Duration>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            agents: Arc::new(RwLock::new(HashMap::new())),
            ttl: None,
        }
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            agents: Arc::new(RwLock::new(HashMap::new())),
            ttl: Some(ttl),
        }
    }

    pub async fn len(&self) -> usize {
        self.agents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.agents.read().await.is_empty()
    }

    pub async fn evict_expired(&self) -> usize {
        let Some(ttl) = self.ttl else {
            return 0;
        };
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return 0;
        };
        let cutoff = Utc::now() - ttl;

        let mut agents = self.agents.write().await;
        let before = agents.len();
        agents.retain(|_, agent| !(agent.status.is_terminal() && agent.last_activity < cutoff));
        let evicted = before - agents.len();
        if evicted > 0 {
            log::debug!("In-memory store evicted {} expired agents", evicted);
        }
        evicted
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for InMemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, id: &str) -> Result<Option<Agent>> {
        let agents = self.agents.read().await;
        Ok(agents.get(id).cloned())
    }

    async fn list(&self, filter: &AgentFilter) -> Result<Vec<Agent>> {
        let agents = self.agents.read().await;
        let matching: Vec<Agent> = agents
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        drop(agents);
        Ok(filter.apply(matching))
    }

    async fn put(&self, agent: &Agent) -> Result<()> {
        let mut agents = self.agents.write().await;
        agents.insert(agent.id.clone(), agent.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut agents = self.agents.write().await;
        Ok(agents.remove(id).is_some())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AgentStatus;

    fn create_test_agent(id: &str, parent_id: Option<&str>) -> Agent {
        let mut agent = Agent::new(id.to_string(), "/project".to_string());
        agent.parent_id = parent_id.map(String::from);
        agent
    }

    #[tokio::test]
    async fn test_agent_operations() {
        let store = InMemoryStore::new();
        let agent = create_test_agent("a1", None);

        store.put(&agent).await.unwrap();

        let retrieved = store.get("a1").await.unwrap();
        assert_eq!(retrieved, Some(agent));
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_replaces_existing() {
        let store = InMemoryStore::new();
        let mut agent = create_test_agent("a1", None);
        store.put(&agent).await.unwrap();

        agent.status = AgentStatus::Active;
        store.put(&agent).await.unwrap();

        assert_eq!(store.len().await, 1);
        assert_eq!(store.get("a1").await.unwrap().unwrap().status, AgentStatus::Active);
    }

    #[tokio::test]
    async fn test_list_children_by_parent() {
        let store = InMemoryStore::new();
        store.put(&create_test_agent("parent", None)).await.unwrap();
        store.put(&create_test_agent("child1", Some("parent"))).await.unwrap();
        store.put(&create_test_agent("child2", Some("parent"))).await.unwrap();

        let filter = AgentFilter {
            parent_id: Some("parent".to_string()),
            ..AgentFilter::default()
        };
        let children = store.list(&filter).await.unwrap();
        assert_eq!(children.len(), 2);
    }

    #[tokio::test]
    async fn test_delete() {
        let store = InMemoryStore::new();
        store.put(&create_test_agent("a1", None)).await.unwrap();

        assert!(store.delete("a1").await.unwrap());
        assert!(!store.delete("a1").await.unwrap());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_evict_expired_only_touches_complete_agents() {
        let store = InMemoryStore::with_ttl(Duration::from_secs(60));
        let stale = Utc::now() - chrono::Duration::hours(2);

        let mut done = create_test_agent("done", None);
        done.status = AgentStatus::Complete;
        done.last_activity = stale;

        let mut busy = create_test_agent("busy", None);
        busy.status = AgentStatus::Active;
        busy.last_activity = stale;

        let mut fresh = create_test_agent("fresh", None);
        fresh.status = AgentStatus::Complete;

        for agent in [&done, &busy, &fresh] {
            store.put(agent).await.unwrap();
        }

        assert_eq!(store.evict_expired().await, 1);
        assert!(store.get("done").await.unwrap().is_none());
        assert!(store.get("busy").await.unwrap().is_some());
        assert!(store.get("fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_evict_without_ttl_is_noop() {
        let store = InMemoryStore::new();
        let mut done = create_test_agent("done", None);
        done.status = AgentStatus::Complete;
        done.last_activity = Utc::now() - chrono::Duration::days(30);
        store.put(&done).await.unwrap();

        assert_eq!(store.evict_expired().await, 0);
        assert_eq!(store.len().await, 1);
    }
}
