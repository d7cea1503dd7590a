//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use switchboard::config::{AgentConfig, HubConfig, StorageConfig};
use switchboard::hub::BroadcastHub;
use switchboard::storage::{FailoverStorage, InMemoryStore, StorageBackend};
use switchboard::types::{Agent, AgentFilter, AgentRegistration};
use switchboard::AgentStore;

/// Durable provider stand-in whose reachability can be toggled.
pub struct SwitchableBackend {
    pub inner: InMemoryStore,
    reachable: AtomicBool,
}

impl SwitchableBackend {
    pub fn new() -> Self {
        Self {
            inner: InMemoryStore::new(),
            reachable: AtomicBool::new(true),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(anyhow!("connection refused"))
        }
    }
}

#[async_trait]
impl StorageBackend for SwitchableBackend {
    fn name(&self) -> &'static str {
        "switchable"
    }

    async fn get(&self, id: &str) -> Result<Option<Agent>> {
        self.check()?;
        self.inner.get(id).await
    }

    async fn list(&self, filter: &AgentFilter) -> Result<Vec<Agent>> {
        self.check()?;
        self.inner.list(filter).await
    }

    async fn put(&self, agent: &Agent) -> Result<()> {
        self.check()?;
        self.inner.put(agent).await
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        self.check()?;
        self.inner.delete(id).await
    }

    async fn ping(&self) -> Result<()> {
        self.check()
    }
}

pub fn fast_storage_config() -> StorageConfig {
    StorageConfig {
        ping_timeout_ms: 200,
        health_cache_ms: 0,
        write_retries: 1,
        retry_backoff_ms: 1,
        ..StorageConfig::default()
    }
}

pub struct Harness {
    pub durable: Arc<SwitchableBackend>,
    pub storage: Arc<FailoverStorage>,
    pub hub: Arc<BroadcastHub>,
    pub store: Arc<AgentStore>,
}

/// Store wired to a switchable durable provider.
pub fn harness() -> Harness {
    let durable = Arc::new(SwitchableBackend::new());
    let storage = Arc::new(FailoverStorage::new(
        durable.clone(),
        Arc::new(InMemoryStore::new()),
        &fast_storage_config(),
    ));
    let hub = Arc::new(BroadcastHub::new(&HubConfig::default()));
    let store = Arc::new(AgentStore::new(
        Arc::clone(&storage),
        Arc::clone(&hub),
        AgentConfig::default(),
    ));
    Harness {
        durable,
        storage,
        hub,
        store,
    }
}

/// Store with no durable provider at all.
pub fn memory_store(hub: &HubConfig) -> Arc<AgentStore> {
    let storage = Arc::new(FailoverStorage::memory_only(Arc::new(InMemoryStore::new())));
    let hub = Arc::new(BroadcastHub::new(hub));
    Arc::new(AgentStore::new(storage, hub, AgentConfig::default()))
}

pub fn registration(id: &str, project: &str) -> AgentRegistration {
    AgentRegistration {
        id: id.to_string(),
        project_path: project.to_string(),
        ..AgentRegistration::default()
    }
}
