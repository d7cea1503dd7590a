use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use crate::config::StorageConfig;
use crate::error::{AgentError, AgentResult};
use crate::storage::memory::InMemoryStore;
use crate::storage::traits::StorageBackend;
use crate::types::{Agent, AgentFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    Durable,
    Memory,
}

/// The provider an operation was bound to when it started.
enum Route {
    Durable(Arc<dyn StorageBackend>),
    Memory,
}

/// Durable provider with automatic fallback to the in-memory provider.
///
/// Every operation picks its provider once, up front, and finishes there, so a
/// mode switch never splits a single operation. Once degraded, all operations
/// go to memory until `probe` sees the durable provider answer again. Records
/// written to memory while degraded are not replayed into the durable store.
pub struct FailoverStorage {
    durable: Option<Arc<dyn StorageBackend>>,
    memory: Arc<InMemoryStore>,
    degraded: AtomicBool,
    last_healthy: Mutex<Option<Instant>>,
    ping_timeout: Duration,
    health_cache: Duration,
    write_retries: u32,
    retry_backoff: Duration,
}

impl FailoverStorage {
    pub fn new(
        durable: Arc<dyn StorageBackend>,
        memory: Arc<InMemoryStore>,
        config: &StorageConfig,
    ) -> Self {
        Self {
            durable: Some(durable),
            memory,
            degraded: AtomicBool::new(false),
            last_healthy: Mutex::new(None),
            ping_timeout: config.ping_timeout(),
            health_cache: config.health_cache(),
            write_retries: config.write_retries,
            retry_backoff: config.retry_backoff(),
        }
    }

    /// No durable provider configured: memory is the primary store and the
    /// service is never reported as degraded.
    pub fn memory_only(memory: Arc<InMemoryStore>) -> Self {
        let config = StorageConfig::default();
        Self {
            durable: None,
            memory,
            degraded: AtomicBool::new(false),
            last_healthy: Mutex::new(None),
            ping_timeout: config.ping_timeout(),
            health_cache: config.health_cache(),
            write_retries: 0,
            retry_backoff: config.retry_backoff(),
        }
    }

    pub fn mode(&self) -> StorageMode {
        if self.durable.is_some() && !self.is_degraded() {
            StorageMode::Durable
        } else {
            StorageMode::Memory
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    pub async fn get(&self, id: &str) -> AgentResult<Option<Agent>> {
        if let Route::Durable(durable) = self.route().await {
            match self.attempt(&durable, 0, |b| async move { b.get(id).await }).await {
                Ok(agent) => return Ok(agent),
                Err(e) => self.enter_degraded(&format!("get failed: {:#}", e)),
            }
        }
        self.on_memory(self.memory.get(id).await)
    }

    pub async fn list(&self, filter: &AgentFilter) -> AgentResult<Vec<Agent>> {
        if let Route::Durable(durable) = self.route().await {
            match self.attempt(&durable, 0, |b| async move { b.list(filter).await }).await {
                Ok(agents) => return Ok(agents),
                Err(e) => self.enter_degraded(&format!("list failed: {:#}", e)),
            }
        }
        self.on_memory(self.memory.list(filter).await)
    }

    pub async fn put(&self, agent: &Agent) -> AgentResult<()> {
        if let Route::Durable(durable) = self.route().await {
            let retries = self.write_retries;
            match self.attempt(&durable, retries, |b| async move { b.put(agent).await }).await {
                Ok(()) => return Ok(()),
                Err(e) => self.enter_degraded(&format!("write failed: {:#}", e)),
            }
        }
        self.on_memory(self.memory.put(agent).await)
    }

    pub async fn delete(&self, id: &str) -> AgentResult<bool> {
        if let Route::Durable(durable) = self.route().await {
            let retries = self.write_retries;
            match self.attempt(&durable, retries, |b| async move { b.delete(id).await }).await {
                Ok(removed) => return Ok(removed),
                Err(e) => self.enter_degraded(&format!("delete failed: {:#}", e)),
            }
        }
        self.on_memory(self.memory.delete(id).await)
    }

    /// Background health check. Returns true when the durable provider is in use
    /// after the probe.
    pub async fn probe(&self) -> bool {
        self.memory.evict_expired().await;

        let Some(durable) = &self.durable else {
            return false;
        };

        match self.timed_ping(durable).await {
            Ok(()) => {
                self.mark_healthy().await;
                if self.degraded.swap(false, Ordering::AcqRel) {
                    log::info!(
                        "Durable storage ({}) reachable again, leaving in-memory mode",
                        durable.name()
                    );
                }
                true
            }
            Err(e) => {
                self.enter_degraded(&format!("health probe failed: {:#}", e));
                false
            }
        }
    }

    pub fn spawn_health_probe(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let storage = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        storage.probe().await;
                    }
                    _ = shutdown.changed() => break,
                }
            }
            log::debug!("Storage health probe stopped");
        })
    }

    async fn route(&self) -> Route {
        let Some(durable) = &self.durable else {
            return Route::Memory;
        };
        if self.is_degraded() {
            return Route::Memory;
        }
        if self.recently_healthy().await {
            return Route::Durable(Arc::clone(durable));
        }
        match self.timed_ping(durable).await {
            Ok(()) => {
                self.mark_healthy().await;
                Route::Durable(Arc::clone(durable))
            }
            Err(e) => {
                self.enter_degraded(&format!("health check failed: {:#}", e));
                Route::Memory
            }
        }
    }

    /// Run `op` against the durable provider, retrying up to `retries` extra
    /// times with exponential backoff. Each try is bounded by the ping timeout.
    async fn attempt<T, F, Fut>(
        &self,
        durable: &Arc<dyn StorageBackend>,
        retries: u32,
        op: F,
    ) -> Result<T>
    where
        F: Fn(Arc<dyn StorageBackend>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut tries = 0;
        loop {
            let outcome = match timeout(self.ping_timeout, op(Arc::clone(durable))).await {
                Ok(result) => result,
                Err(_) => Err(anyhow!("timed out after {:?}", self.ping_timeout)),
            };
            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if tries < retries => {
                    let backoff = self.retry_backoff * 2u32.saturating_pow(tries);
                    tries += 1;
                    log::warn!(
                        "Durable storage ({}) operation failed (try {}/{}), retrying in {:?}: {:#}",
                        durable.name(),
                        tries,
                        retries + 1,
                        backoff,
                        e
                    );
                    sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn timed_ping(&self, durable: &Arc<dyn StorageBackend>) -> Result<()> {
        match timeout(self.ping_timeout, durable.ping()).await {
            Ok(result) => result,
            Err(_) => Err(anyhow!("ping timed out after {:?}", self.ping_timeout)),
        }
    }

    async fn recently_healthy(&self) -> bool {
        let last = self.last_healthy.lock().await;
        matches!(*last, Some(at) if at.elapsed() < self.health_cache)
    }

    async fn mark_healthy(&self) {
        *self.last_healthy.lock().await = Some(Instant::now());
    }

    fn enter_degraded(&self, reason: &str) {
        if !self.degraded.swap(true, Ordering::AcqRel) {
            let name = self.durable.as_ref().map(|d| d.name()).unwrap_or("durable");
            log::error!(
                "Durable storage ({}) unavailable, switching to in-memory mode: {}",
                name,
                reason
            );
        }
    }

    fn on_memory<T>(&self, result: Result<T>) -> AgentResult<T> {
        result.map_err(|e| AgentError::Storage(format!("in-memory provider failed: {:#}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Memory-backed durable stand-in that can be switched off.
    struct FlakyBackend {
        inner: InMemoryStore,
        reachable: AtomicBool,
        puts: AtomicUsize,
    }

    impl FlakyBackend {
        fn new() -> Self {
            Self {
                inner: InMemoryStore::new(),
                reachable: AtomicBool::new(true),
                puts: AtomicUsize::new(0),
            }
        }

        fn set_reachable(&self, reachable: bool) {
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
    impl StorageBackend for FlakyBackend {
        fn name(&self) -> &'static str {
            "flaky"
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
            self.puts.fetch_add(1, Ordering::SeqCst);
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

    fn fast_config() -> StorageConfig {
        StorageConfig {
            ping_timeout_ms: 200,
            health_cache_ms: 0,
            write_retries: 2,
            retry_backoff_ms: 1,
            ..StorageConfig::default()
        }
    }

    fn setup() -> (Arc<FlakyBackend>, Arc<InMemoryStore>, FailoverStorage) {
        let durable = Arc::new(FlakyBackend::new());
        let memory = Arc::new(InMemoryStore::new());
        let storage = FailoverStorage::new(durable.clone(), memory.clone(), &fast_config());
        (durable, memory, storage)
    }

    fn agent(id: &str) -> Agent {
        Agent::new(id.to_string(), "/p".to_string())
    }

    #[tokio::test]
    async fn test_writes_go_to_durable_when_healthy() {
        let (durable, memory, storage) = setup();

        storage.put(&agent("a1")).await.unwrap();

        assert!(durable.inner.get("a1").await.unwrap().is_some());
        assert!(memory.is_empty().await);
        assert_eq!(storage.mode(), StorageMode::Durable);
    }

    #[tokio::test]
    async fn test_unreachable_durable_falls_back_to_memory() {
        let (durable, memory, storage) = setup();
        durable.set_reachable(false);

        storage.put(&agent("a1")).await.unwrap();
        let fetched = storage.get("a1").await.unwrap();

        assert!(fetched.is_some());
        assert!(storage.is_degraded());
        assert_eq!(storage.mode(), StorageMode::Memory);
        assert_eq!(memory.len().await, 1);
    }

    #[tokio::test]
    async fn test_failed_write_retries_before_failover() {
        let durable = Arc::new(FlakyBackend::new());
        let config = StorageConfig {
            health_cache_ms: 60_000,
            ..fast_config()
        };
        let storage = FailoverStorage::new(durable.clone(), Arc::new(InMemoryStore::new()), &config);

        // Cached health lets the write reach the provider after it goes down.
        storage.get("warmup").await.unwrap();
        durable.set_reachable(false);

        storage.put(&agent("a1")).await.unwrap();

        assert_eq!(durable.puts.load(Ordering::SeqCst), 3);
        assert!(storage.is_degraded());
        assert!(storage.get("a1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_probe_restores_durable_mode() {
        let (durable, memory, storage) = setup();
        durable.set_reachable(false);
        storage.put(&agent("lost")).await.unwrap();
        assert!(storage.is_degraded());

        // Still degraded while the provider is down.
        assert!(!storage.probe().await);

        durable.set_reachable(true);
        assert!(storage.probe().await);
        assert!(!storage.is_degraded());

        storage.put(&agent("a2")).await.unwrap();
        assert!(durable.inner.get("a2").await.unwrap().is_some());
        assert!(memory.get("a2").await.unwrap().is_none());
        // Fallback data is not replayed.
        assert!(storage.get("lost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_only_is_never_degraded() {
        let memory = Arc::new(InMemoryStore::new());
        let storage = FailoverStorage::memory_only(memory);

        storage.put(&agent("a1")).await.unwrap();

        assert!(!storage.is_degraded());
        assert_eq!(storage.mode(), StorageMode::Memory);
        assert!(!storage.probe().await);
        assert_eq!(storage.list(&AgentFilter::all()).await.unwrap().len(), 1);
    }
}
