mod support;

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use switchboard::config::HubConfig;
use switchboard::hooks::{HookEnvelope, HookEventProcessor};
use switchboard::hub::{BroadcastHub, Channel, Outbound, ServerMessageKind};
use switchboard::retention::RetentionPolicy;
use switchboard::storage::{FailoverStorage, InMemoryStore};
use switchboard::types::{AgentFilter, AgentStatus, LogLevel};
use switchboard::{AgentStore, Config};

use support::{memory_store, registration};

fn hook(event_type: &str, agent_id: &str, data: serde_json::Value) -> HookEnvelope {
    HookEnvelope::from_value(json!({
        "type": event_type,
        "agentId": agent_id,
        "timestamp": "2024-05-01T12:00:00Z",
        "data": data,
    }))
    .unwrap()
}

#[tokio::test]
async fn test_hook_session_drives_agent_lifecycle() {
    let store = memory_store(&HubConfig::default());
    let hooks = Arc::new(HookEventProcessor::new(Arc::clone(&store)));

    let session = [
        hook("agent.started", "worker", json!({"projectPath": "/repo"})),
        hook("task.started", "worker", json!({"task": "fix build"})),
        hook("tool.called", "worker", json!({"tool": "cargo", "input": {"args": ["test"]}})),
        hook("tool.completed", "worker", json!({"tool": "cargo", "success": true, "durationMs": 900})),
        hook("task.completed", "worker", json!({"task": "fix build"})),
        hook("agent.stopped", "worker", json!({"reason": "done"})),
    ];
    for envelope in session {
        hooks.dispatch(envelope).await.unwrap();
    }

    let agent = store.get("worker").await.unwrap();
    assert_eq!(agent.status, AgentStatus::Complete);
    assert_eq!(agent.project_path, "/repo");
    assert_eq!(agent.context["lastCompletedTask"], "fix build");
    assert_eq!(agent.logs.len(), 6);
    assert!(agent.logs.iter().all(|log| log.level == LogLevel::Info));
    assert!(agent.logs.iter().all(|log| {
        log.metadata
            .as_ref()
            .map(|m| m.contains_key("hookEvent"))
            .unwrap_or(false)
    }));
}

#[tokio::test]
async fn test_unknown_hook_leaves_state_untouched() {
    let store = memory_store(&HubConfig::default());
    store.register(registration("worker", "/repo")).await.unwrap();
    let before = store.get("worker").await.unwrap();
    let hooks = HookEventProcessor::new(Arc::clone(&store));

    hooks.process(hook("foo.bar", "worker", json!({"x": 1}))).await;

    assert_eq!(store.get("worker").await.unwrap(), before);
}

#[tokio::test]
async fn test_observer_sees_hook_updates_for_its_project_only() {
    let store = memory_store(&HubConfig::default());
    let hooks = HookEventProcessor::new(Arc::clone(&store));
    let (conn, mut rx) = store.hub().connect().await;
    store
        .hub()
        .subscribe(conn, [Channel::project("/repo")])
        .await;

    hooks
        .process(hook("agent.started", "mine", json!({"projectPath": "/repo"})))
        .await;
    hooks
        .process(hook("agent.started", "theirs", json!({"projectPath": "/elsewhere"})))
        .await;

    let mut seen = Vec::new();
    while let Ok(Outbound::Message(msg)) = rx.try_recv() {
        seen.push(msg);
    }
    assert!(!seen.is_empty());
    assert!(seen.iter().all(|msg| {
        msg.data["id"] == "mine" || msg.data["agentId"] == "mine"
    }));
    assert!(seen.iter().any(|msg| msg.kind == ServerMessageKind::LogEntry));
}

#[tokio::test]
async fn test_retention_sweep_expires_complete_agents() {
    let store = memory_store(&HubConfig::default());
    store.register(registration("finished", "/p")).await.unwrap();
    store.register(registration("running", "/p")).await.unwrap();
    store
        .update_status("finished", AgentStatus::Complete)
        .await
        .unwrap();
    store
        .update_status("running", AgentStatus::Active)
        .await
        .unwrap();
    let (_, mut rx) = store.hub().connect().await;

    tokio::time::sleep(Duration::from_millis(30)).await;
    let policy = RetentionPolicy::new(Arc::clone(&store), Duration::from_millis(10));
    assert_eq!(policy.sweep().await.unwrap(), 1);

    let remaining: Vec<_> = store
        .query(&AgentFilter::all())
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.id)
        .collect();
    assert_eq!(remaining, vec!["running".to_string()]);

    match rx.try_recv() {
        Ok(Outbound::Message(msg)) => {
            assert_eq!(msg.kind, ServerMessageKind::AgentDeleted);
            assert_eq!(msg.data["id"], "finished");
        }
        other => panic!("expected deletion broadcast, got {:?}", other),
    }
}

#[tokio::test]
async fn test_expired_agents_reach_retention_before_memory_eviction() {
    let mut config = Config::default();
    config.storage.memory_ttl_secs = 1;
    config.retention.window_secs = 1;
    config.retention.sweep_interval_secs = 1;

    let memory = Arc::new(InMemoryStore::with_ttl(config.memory_ttl()));
    let storage = Arc::new(FailoverStorage::memory_only(memory));
    let hub = Arc::new(BroadcastHub::new(&config.hub));
    let store = Arc::new(AgentStore::new(
        Arc::clone(&storage),
        Arc::clone(&hub),
        config.agents.clone(),
    ));
    let policy = RetentionPolicy::from_config(Arc::clone(&store), &config.retention);

    let mut finished = registration("finished", "/p");
    finished.status = Some(AgentStatus::Complete);
    store.register(finished).await.unwrap();
    let (_, mut rx) = hub.connect().await;

    tokio::time::sleep(Duration::from_millis(1_200)).await;
    storage.probe().await;
    assert!(store.get("finished").await.is_ok());

    assert_eq!(policy.sweep().await.unwrap(), 1);
    assert!(store.get("finished").await.unwrap_err().is_not_found());
    match rx.try_recv() {
        Ok(Outbound::Message(msg)) => {
            assert_eq!(msg.kind, ServerMessageKind::AgentDeleted);
            assert_eq!(msg.data["id"], "finished");
        }
        other => panic!("expected deletion broadcast, got {:?}", other),
    }
}
