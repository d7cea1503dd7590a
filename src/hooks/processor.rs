use serde_json::{json, Value};
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::error::{AgentError, AgentResult};
use crate::hooks::event::{HookEnvelope, HookEvent};
use crate::store::AgentStore;
use crate::types::{AgentRegistration, AgentStatus, ContextMap, LogLevel};

const UNKNOWN_PROJECT: &str = "unknown";

/// Translates hook events into `AgentStore` calls.
///
/// Holds no state of its own; the store is the only thing it touches.
pub struct HookEventProcessor {
    store: Arc<AgentStore>,
}

impl HookEventProcessor {
    pub fn new(store: Arc<AgentStore>) -> Self {
        Self { store }
    }

    /// Process on a separate task so the work finishes even if the caller goes away.
    pub fn dispatch(self: &Arc<Self>, envelope: HookEnvelope) -> JoinHandle<()> {
        let processor = Arc::clone(self);
        tokio::spawn(async move { processor.process(envelope).await })
    }

    /// Apply the event, logging instead of returning any failure.
    pub async fn process(&self, envelope: HookEnvelope) {
        let event = envelope.event.name().to_string();
        let agent_id = envelope.agent_id.clone();
        match self.apply(envelope).await {
            Ok(true) => log::debug!("Processed {} for agent {}", event, agent_id),
            Ok(false) => {}
            Err(e) => log::error!("Failed to process {} for agent {}: {}", event, agent_id, e),
        }
    }

    /// Returns false when the event was ignored.
    pub async fn apply(&self, envelope: HookEnvelope) -> AgentResult<bool> {
        let HookEnvelope {
            agent_id,
            timestamp,
            project_path,
            event,
        } = envelope;

        match &event {
            HookEvent::Unknown { event_type, .. } => {
                log::warn!("Ignoring unknown hook event {} for agent {}", event_type, agent_id);
                return Ok(false);
            }
            HookEvent::Malformed {
                event_type, reason, ..
            } => {
                log::warn!(
                    "Ignoring malformed {} for agent {}: {}",
                    event_type,
                    agent_id,
                    reason
                );
                return Ok(false);
            }
            _ => {}
        }

        let store = &self.store;
        let mut metadata = ContextMap::new();
        metadata.insert("hookEvent".to_string(), json!(event.name()));
        metadata.insert("hookTimestamp".to_string(), json!(timestamp));

        let (level, message) = match event {
            HookEvent::AgentStarted(started) => {
                let existing = match store.get(&agent_id).await {
                    Ok(agent) => Some(agent),
                    Err(e) if e.is_not_found() => None,
                    Err(e) => return Err(e),
                };
                match existing {
                    Some(agent) => {
                        let registration = AgentRegistration {
                            id: agent_id.clone(),
                            parent_id: started.parent_id,
                            project_path: started
                                .project_path
                                .unwrap_or_else(|| agent.project_path.clone()),
                            status: Some(AgentStatus::Active),
                            context: started.context,
                            tags: started.tags,
                        };
                        // With unique registration on, a restart only flips the status.
                        match store.register(registration).await {
                            Ok(_) => {}
                            Err(AgentError::Conflict(_)) => {
                                store.update_status(&agent_id, AgentStatus::Active).await?;
                            }
                            Err(e) => return Err(e),
                        }
                        log::debug!("Agent {} restarted", agent.id);
                    }
                    None => {
                        store
                            .register(AgentRegistration {
                                id: agent_id.clone(),
                                parent_id: started.parent_id,
                                project_path: started
                                    .project_path
                                    .or(project_path)
                                    .unwrap_or_else(|| UNKNOWN_PROJECT.to_string()),
                                status: Some(AgentStatus::Active),
                                context: started.context,
                                tags: started.tags,
                            })
                            .await?;
                    }
                }
                (LogLevel::Info, "Agent started".to_string())
            }
            HookEvent::AgentStopped(stopped) => {
                self.ensure_registered(&agent_id, project_path).await?;
                store.update_status(&agent_id, AgentStatus::Complete).await?;
                if let Some(reason) = &stopped.reason {
                    metadata.insert("reason".to_string(), json!(reason));
                }
                (LogLevel::Info, "Agent stopped".to_string())
            }
            HookEvent::AgentError(failed) => {
                self.ensure_registered(&agent_id, project_path).await?;
                store.update_status(&agent_id, AgentStatus::Error).await?;
                if let Some(details) = failed.details.clone() {
                    metadata.insert("details".to_string(), details);
                }
                (LogLevel::Error, failed.description().to_string())
            }
            HookEvent::ToolCalled(call) => {
                self.ensure_registered(&agent_id, project_path).await?;
                store.update_status(&agent_id, AgentStatus::Active).await?;
                let tool = call.tool.unwrap_or_else(|| "unknown".to_string());
                metadata.insert("tool".to_string(), json!(tool));
                if let Some(input) = call.input {
                    metadata.insert("input".to_string(), input);
                }
                (LogLevel::Info, format!("Tool called: {}", tool))
            }
            HookEvent::ToolCompleted(result) => {
                self.ensure_registered(&agent_id, project_path).await?;
                let tool = result.tool.clone().unwrap_or_else(|| "unknown".to_string());
                metadata.insert("tool".to_string(), json!(tool));
                metadata.insert("success".to_string(), json!(!result.failed()));
                if let Some(duration) = result.duration_ms {
                    metadata.insert("durationMs".to_string(), json!(duration));
                }
                if let Some(error) = &result.error {
                    metadata.insert("error".to_string(), json!(error));
                }
                if result.failed() {
                    (LogLevel::Warn, format!("Tool failed: {}", tool))
                } else {
                    (LogLevel::Info, format!("Tool completed: {}", tool))
                }
            }
            HookEvent::ContextUpdated(patch) => {
                self.ensure_registered(&agent_id, project_path).await?;
                let keys: Vec<String> = patch.keys().cloned().collect();
                store.update_context(&agent_id, patch).await?;
                metadata.insert("keys".to_string(), json!(keys));
                (LogLevel::Info, "Context updated".to_string())
            }
            HookEvent::TaskStarted(task) => {
                self.ensure_registered(&agent_id, project_path).await?;
                store.update_status(&agent_id, AgentStatus::Active).await?;
                let mut patch = ContextMap::new();
                patch.insert("currentTask".to_string(), task.task_value());
                store.update_context(&agent_id, patch).await?;
                (LogLevel::Info, format!("Task started: {}", task.label()))
            }
            HookEvent::TaskCompleted(task) => {
                self.ensure_registered(&agent_id, project_path).await?;
                store.update_status(&agent_id, AgentStatus::Idle).await?;
                let mut patch = ContextMap::new();
                patch.insert("lastCompletedTask".to_string(), task.task_value());
                patch.insert("currentTask".to_string(), Value::Null);
                store.update_context(&agent_id, patch).await?;
                if let Some(result) = task.result.clone() {
                    metadata.insert("result".to_string(), result);
                }
                (LogLevel::Info, format!("Task completed: {}", task.label()))
            }
            HookEvent::Unknown { .. } | HookEvent::Malformed { .. } => return Ok(false),
        };

        store
            .add_log(&agent_id, level, &message, Some(metadata))
            .await?;
        Ok(true)
    }

    async fn ensure_registered(&self, agent_id: &str, project_path: Option<String>) -> AgentResult<()> {
        match self.store.get(agent_id).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                log::info!("Auto-registering agent {} from hook event", agent_id);
                self.store
                    .register(AgentRegistration {
                        id: agent_id.to_string(),
                        project_path: project_path.unwrap_or_else(|| UNKNOWN_PROJECT.to_string()),
                        ..AgentRegistration::default()
                    })
                    .await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
