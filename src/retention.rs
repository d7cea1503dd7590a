use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::RetentionConfig;
use crate::error::AgentResult;
use crate::store::AgentStore;
use crate::types::{AgentFilter, AgentStatus};

/// Deletes `complete` agents idle for longer than the retention window.
pub struct RetentionPolicy {
    store: Arc<AgentStore>,
    window: Duration,
}

impl RetentionPolicy {
    pub fn new(store: Arc<AgentStore>, window: Duration) -> Self {
        Self { store, window }
    }

    pub fn from_config(store: Arc<AgentStore>, config: &RetentionConfig) -> Self {
        Self::new(store, config.window())
    }

    /// One pass. Returns how many agents were deleted.
    pub async fn sweep(&self) -> AgentResult<usize> {
        let cutoff = chrono::Duration::from_std(self.window)
            .ok()
            .and_then(|window| Utc::now().checked_sub_signed(window));
        let Some(cutoff) = cutoff else {
            return Ok(0);
        };

        let candidates = self
            .store
            .query(&AgentFilter::all().with_status(AgentStatus::Complete))
            .await?;

        let mut deleted = 0;
        for agent in candidates {
            if !agent.status.is_terminal() || agent.last_activity >= cutoff {
                continue;
            }
            match self.store.delete(&agent.id).await {
                Ok(()) => deleted += 1,
                Err(e) if e.is_not_found() => {}
                Err(e) => log::warn!("Retention failed to delete agent {}: {}", agent.id, e),
            }
        }
        if deleted > 0 {
            log::info!("Retention sweep removed {} expired agents", deleted);
        }
        Ok(deleted)
    }

    pub fn spawn(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep().await {
                            log::error!("Retention sweep failed: {}", e);
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
            log::debug!("Retention loop stopped");
        })
    }
}
