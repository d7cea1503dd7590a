use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::json;

use crate::config::AgentConfig;
use crate::error::{require_id, AgentError, AgentResult};
use crate::hub::{BroadcastHub, Channel, ServerMessage};
use crate::storage::{FailoverStorage, StorageMode};
use crate::types::{
    Agent, AgentFilter, AgentRegistration, AgentStats, AgentStatus, ContextMap, HandoffContext,
    HandoffRequest, HierarchyNode, LogEntry, LogLevel,
};

/// Owns the agent lifecycle: validates, loads, mutates, persists, then publishes.
///
/// Mutations on the same id are last-write-wins; nothing serializes the
/// load/persist window.
pub struct AgentStore {
    storage: Arc<FailoverStorage>,
    hub: Arc<BroadcastHub>,
    config: AgentConfig,
}

impl AgentStore {
    pub fn new(storage: Arc<FailoverStorage>, hub: Arc<BroadcastHub>, config: AgentConfig) -> Self {
        Self {
            storage,
            hub,
            config,
        }
    }

    pub fn storage(&self) -> &Arc<FailoverStorage> {
        &self.storage
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    pub fn storage_mode(&self) -> StorageMode {
        self.storage.mode()
    }

    pub fn is_degraded(&self) -> bool {
        self.storage.is_degraded()
    }

    /// Upsert. Returns the stored agent and whether it was newly created.
    pub async fn register(&self, registration: AgentRegistration) -> AgentResult<(Agent, bool)> {
        require_id("id", &registration.id)?;
        require_id("projectPath", &registration.project_path)?;
        if let Some(status) = &registration.status {
            validate_status(status)?;
        }
        if let Some(parent_id) = &registration.parent_id {
            require_id("parentId", parent_id)?;
            if parent_id == &registration.id {
                return Err(AgentError::validation("an agent cannot be its own parent"));
            }
        }

        let (mut agent, created) = match self.storage.get(&registration.id).await? {
            Some(_) if self.config.unique_registration => {
                return Err(AgentError::Conflict(format!(
                    "agent {} is already registered",
                    registration.id
                )));
            }
            Some(existing) => (existing, false),
            None => (Agent::new(registration.id.clone(), registration.project_path.clone()), true),
        };

        agent.project_path = registration.project_path;
        if registration.parent_id.is_some() {
            agent.parent_id = registration.parent_id;
        }
        if let Some(status) = registration.status {
            agent.status = status;
        }
        if let Some(context) = registration.context {
            agent.merge_context(context);
        }
        if let Some(tags) = registration.tags {
            agent.tags = tags.into_iter().filter(|t| !t.is_empty()).collect();
        }
        self.check_context(&agent)?;
        if !created {
            agent.touch();
        }

        self.storage.put(&agent).await?;
        if created {
            log::info!("Registered agent {} in {}", agent.id, agent.project_path);
        } else {
            log::debug!("Re-registered agent {}", agent.id);
        }
        self.publish_update(&agent).await;
        Ok((agent, created))
    }

    pub async fn get(&self, id: &str) -> AgentResult<Agent> {
        require_id("id", id)?;
        self.storage
            .get(id)
            .await?
            .ok_or_else(|| AgentError::not_found(id))
    }

    pub async fn update_status(&self, id: &str, status: AgentStatus) -> AgentResult<Agent> {
        validate_status(&status)?;
        let mut agent = self.get(id).await?;

        let previous = std::mem::replace(&mut agent.status, status);
        agent.touch();
        self.storage.put(&agent).await?;

        log::debug!("Agent {} status {} -> {}", agent.id, previous, agent.status);
        self.publish_update(&agent).await;
        Ok(agent)
    }

    pub async fn add_log(
        &self,
        id: &str,
        level: LogLevel,
        message: &str,
        metadata: Option<ContextMap>,
    ) -> AgentResult<LogEntry> {
        if message.trim().is_empty() {
            return Err(AgentError::validation("log message must not be empty"));
        }
        let mut agent = self.get(id).await?;

        let mut entry = LogEntry::new(level, message);
        if let Some(metadata) = metadata {
            entry = entry.with_metadata(metadata);
        }
        agent.push_log(entry.clone(), self.config.max_logs);
        agent.touch();
        self.storage.put(&agent).await?;

        let channels = Channel::for_agent(&agent.id, &agent.project_path);
        self.hub
            .publish_to(&channels, ServerMessage::log_entry(&agent.id, &entry))
            .await;
        Ok(entry)
    }

    /// Shallow merge of `patch` into the agent's context.
    pub async fn update_context(&self, id: &str, patch: ContextMap) -> AgentResult<Agent> {
        let mut agent = self.get(id).await?;

        agent.merge_context(patch);
        self.check_context(&agent)?;
        agent.touch();
        self.storage.put(&agent).await?;

        self.publish_update(&agent).await;
        Ok(agent)
    }

    /// Move work from one agent to another. The target is created on first
    /// handoff, inheriting the source's project and taking it as parent.
    pub async fn handoff(&self, request: HandoffRequest) -> AgentResult<HandoffContext> {
        require_id("fromAgentId", &request.from_agent_id)?;
        require_id("toAgentId", &request.to_agent_id)?;
        if request.from_agent_id == request.to_agent_id {
            return Err(AgentError::validation("cannot hand off to the same agent"));
        }

        let handoff = request.into_context();
        let mut source = self.get(&handoff.from_agent_id).await?;
        let mut target = match self.storage.get(&handoff.to_agent_id).await? {
            Some(existing) => existing,
            None => {
                let mut fresh =
                    Agent::new(handoff.to_agent_id.clone(), source.project_path.clone());
                fresh.parent_id = Some(source.id.clone());
                fresh
            }
        };

        source.status = AgentStatus::Handoff;
        source.push_log(
            LogEntry::new(
                LogLevel::Info,
                format!("Handed off to {}: {}", target.id, handoff.reason),
            )
            .with_metadata(provenance(&handoff)),
            self.config.max_logs,
        );
        source.touch();

        target.status = AgentStatus::Active;
        target.merge_context(handoff.context.clone());
        target.merge_context(provenance(&handoff));
        self.check_context(&target)?;
        target.push_log(
            LogEntry::new(
                LogLevel::Info,
                format!("Received handoff from {}: {}", source.id, handoff.reason),
            )
            .with_metadata(provenance(&handoff)),
            self.config.max_logs,
        );
        target.touch();

        self.storage.put(&source).await?;
        self.storage.put(&target).await?;

        log::info!("Agent {} handed off to {}", source.id, target.id);
        self.publish_update(&source).await;
        self.publish_update(&target).await;

        let mut channels: Vec<Channel> = Channel::for_agent(&source.id, &source.project_path).into();
        for channel in Channel::for_agent(&target.id, &target.project_path) {
            if !channels.contains(&channel) {
                channels.push(channel);
            }
        }
        self.hub
            .publish_to(&channels, ServerMessage::handoff(&handoff))
            .await;
        Ok(handoff)
    }

    pub async fn query(&self, filter: &AgentFilter) -> AgentResult<Vec<Agent>> {
        if let Some(status) = &filter.status {
            validate_status(status)?;
        }
        self.storage.list(filter).await
    }

    pub async fn delete(&self, id: &str) -> AgentResult<()> {
        let agent = self.get(id).await?;
        if !self.storage.delete(id).await? {
            return Err(AgentError::not_found(id));
        }

        log::info!("Deleted agent {}", id);
        let channels = Channel::for_agent(&agent.id, &agent.project_path);
        self.hub
            .publish_to(
                &channels,
                ServerMessage::agent_deleted(&agent.id, &agent.project_path),
            )
            .await;
        Ok(())
    }

    pub async fn stats(&self, project_path: Option<&str>) -> AgentResult<AgentStats> {
        let filter = match project_path {
            Some(path) => AgentFilter::for_project(path),
            None => AgentFilter::all(),
        };
        let agents = self.storage.list(&filter).await?;
        Ok(agents.iter().collect())
    }

    pub async fn search(&self, query: &str, limit: Option<usize>) -> AgentResult<Vec<Agent>> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Err(AgentError::validation("search query must not be empty"));
        }
        let agents = self.storage.list(&AgentFilter::all()).await?;
        let matches = agents.into_iter().filter(|a| a.matches_search(&needle));
        Ok(match limit {
            Some(limit) => matches.take(limit).collect(),
            None => matches.collect(),
        })
    }

    /// Parent/child forest. With a root, the tree under that agent; without,
    /// one tree per agent whose parent is unset or no longer registered.
    pub async fn hierarchy(&self, root_id: Option<&str>) -> AgentResult<Vec<HierarchyNode>> {
        let agents = self.storage.list(&AgentFilter::all()).await?;
        let known: HashSet<&str> = agents.iter().map(|a| a.id.as_str()).collect();

        let mut children: HashMap<String, Vec<Agent>> = HashMap::new();
        let mut roots = Vec::new();
        for agent in &agents {
            match &agent.parent_id {
                Some(parent) if known.contains(parent.as_str()) => children
                    .entry(parent.clone())
                    .or_default()
                    .push(agent.clone()),
                _ => roots.push(agent.clone()),
            }
        }
        for siblings in children.values_mut() {
            siblings.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));
        }

        let roots = match root_id {
            Some(id) => {
                let root = agents
                    .iter()
                    .find(|a| a.id == id)
                    .cloned()
                    .ok_or_else(|| AgentError::not_found(id))?;
                vec![root]
            }
            None => {
                roots.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));
                roots
            }
        };

        let mut visited = HashSet::new();
        let mut forest: Vec<HierarchyNode> = roots
            .into_iter()
            .map(|root| build_tree(root, &children, &mut visited))
            .collect();
        if root_id.is_some() {
            return Ok(forest);
        }

        // Agents left over sit on parent cycles with no root above them.
        let by_id: HashMap<&str, &Agent> = agents.iter().map(|a| (a.id.as_str(), a)).collect();
        let mut leftover: Vec<&Agent> = agents
            .iter()
            .filter(|a| !visited.contains(&a.id))
            .collect();
        leftover.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));
        for agent in leftover {
            if visited.contains(&agent.id) {
                continue;
            }
            let entry = cycle_entry(agent, &by_id);
            forest.push(build_tree(entry.clone(), &children, &mut visited));
        }
        Ok(forest)
    }

    async fn publish_update(&self, agent: &Agent) {
        let channels = Channel::for_agent(&agent.id, &agent.project_path);
        self.hub
            .publish_to(&channels, ServerMessage::agent_update(agent))
            .await;
    }

    fn check_context(&self, agent: &Agent) -> AgentResult<()> {
        let size = agent.context_size();
        if size > self.config.max_context_bytes {
            return Err(AgentError::validation(format!(
                "context is {} bytes, limit is {}",
                size, self.config.max_context_bytes
            )));
        }
        Ok(())
    }
}

fn validate_status(status: &AgentStatus) -> AgentResult<()> {
    if status.is_recognized() {
        Ok(())
    } else {
        Err(AgentError::validation(format!(
            "unrecognized status {:?}, expected one of idle, active, error, handoff, complete",
            status.as_str()
        )))
    }
}

fn provenance(handoff: &HandoffContext) -> ContextMap {
    let value = json!({
        "handoffFrom": handoff.from_agent_id,
        "handoffReason": handoff.reason,
        "handoffAt": handoff.timestamp,
    });
    match value {
        serde_json::Value::Object(map) => map,
        _ => ContextMap::new(),
    }
}

/// First agent repeated while walking up from `start`.
fn cycle_entry<'a>(start: &'a Agent, by_id: &HashMap<&str, &'a Agent>) -> &'a Agent {
    let mut seen = HashSet::new();
    let mut current = start;
    while seen.insert(current.id.as_str()) {
        match current
            .parent_id
            .as_deref()
            .and_then(|parent| by_id.get(parent))
        {
            Some(parent) => current = *parent,
            None => break,
        }
    }
    current
}

fn build_tree(
    agent: Agent,
    children: &HashMap<String, Vec<Agent>>,
    visited: &mut HashSet<String>,
) -> HierarchyNode {
    if !visited.insert(agent.id.clone()) {
        return HierarchyNode {
            agent,
            children: Vec::new(),
        };
    }
    let kids = children
        .get(&agent.id)
        .map(|kids| {
            kids.iter()
                .filter(|kid| !visited.contains(&kid.id))
                .cloned()
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let children = kids
        .into_iter()
        .map(|kid| build_tree(kid, children, visited))
        .collect();
    HierarchyNode { agent, children }
}
