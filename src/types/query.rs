use serde::{Deserialize, Serialize};

use super::{Agent, AgentId, AgentStatus};

/// Selection and pagination applied by `StorageBackend::list`.
///
/// Results are ordered by `last_activity` descending before `offset` and
/// `limit` are applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentFilter {
    pub project_path: Option<String>,
    pub status: Option<AgentStatus>,
    pub parent_id: Option<AgentId>,
    pub tags: Vec<String>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl AgentFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_project(project_path: impl Into<String>) -> Self {
        Self {
            project_path: Some(project_path.into()),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: AgentStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn matches(&self, agent: &Agent) -> bool {
        if let Some(path) = &self.project_path {
            if &agent.project_path != path {
                return false;
            }
        }
        if let Some(status) = &self.status {
            if &agent.status != status {
                return false;
            }
        }
        if let Some(parent) = &self.parent_id {
            if agent.parent_id.as_ref() != Some(parent) {
                return false;
            }
        }
        agent.has_tags(&self.tags)
    }

    /// Filter, order and paginate an unordered set of agents.
    pub fn apply<I>(&self, agents: I) -> Vec<Agent>
    where
        I: IntoIterator<Item = Agent>,
    {
        let mut selected: Vec<Agent> = agents.into_iter().filter(|a| self.matches(a)).collect();
        selected.sort_by(|a, b| {
            b.last_activity
                .cmp(&a.last_activity)
                .then_with(|| a.id.cmp(&b.id))
        });
        let page = selected.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => page.take(limit).collect(),
            None => page.collect(),
        }
    }
}

/// Per-status counts. Statuses outside the known set land in `unknown`, so
/// the buckets always sum to `total`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStats {
    pub total: u64,
    pub idle: u64,
    pub active: u64,
    pub error: u64,
    pub handoff: u64,
    pub complete: u64,
    pub unknown: u64,
}

impl AgentStats {
    pub fn record(&mut self, status: &AgentStatus) {
        self.total += 1;
        match status {
            AgentStatus::Idle => self.idle += 1,
            AgentStatus::Active => self.active += 1,
            AgentStatus::Error => self.error += 1,
            AgentStatus::Handoff => self.handoff += 1,
            AgentStatus::Complete => self.complete += 1,
            AgentStatus::Unknown(_) => self.unknown += 1,
        }
    }

    pub fn bucket_sum(&self) -> u64 {
        self.idle + self.active + self.error + self.handoff + self.complete + self.unknown
    }
}

impl<'a> FromIterator<&'a Agent> for AgentStats {
    fn from_iter<I: IntoIterator<Item = &'a Agent>>(iter: I) -> Self {
        let mut stats = AgentStats::default();
        for agent in iter {
            stats.record(&agent.status);
        }
        stats
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyNode {
    pub agent: Agent,
    pub children: Vec<HierarchyNode>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn agent_at(id: &str, project: &str, offset_secs: i64) -> Agent {
        let mut agent = Agent::new(id.to_string(), project.to_string());
        agent.last_activity = agent.created + Duration::seconds(offset_secs);
        agent
    }

    #[test]
    fn test_apply_orders_by_last_activity_desc() {
        let agents = vec![agent_at("a", "/p", 1), agent_at("b", "/p", 3), agent_at("c", "/p", 2)];
        let ids: Vec<_> = AgentFilter::all()
            .apply(agents)
            .into_iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_apply_paginates_after_ordering() {
        let agents = (0..5).map(|i| agent_at(&format!("a{}", i), "/p", i)).collect::<Vec<_>>();
        let filter = AgentFilter {
            limit: Some(2),
            offset: 1,
            ..AgentFilter::default()
        };
        let ids: Vec<_> = filter.apply(agents).into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec!["a3", "a2"]);
    }

    #[test]
    fn test_filter_by_project_status_and_tags() {
        let mut tagged = agent_at("t", "/p", 0);
        tagged.tags.insert("ui".to_string());
        tagged.status = AgentStatus::Active;
        let agents = vec![tagged, agent_at("u", "/p", 0), agent_at("v", "/q", 0)];

        let filter = AgentFilter {
            tags: vec!["ui".to_string()],
            ..AgentFilter::for_project("/p").with_status(AgentStatus::Active)
        };
        let result = filter.apply(agents);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, "t");
    }

    #[test]
    fn test_stats_count_unknown_statuses() {
        let mut odd = agent_at("x", "/p", 0);
        odd.status = AgentStatus::Unknown("paused".to_string());
        let mut done = agent_at("y", "/p", 0);
        done.status = AgentStatus::Complete;
        let agents = [odd, done, agent_at("z", "/p", 0)];

        let stats: AgentStats = agents.iter().collect();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.unknown, 1);
        assert_eq!(stats.complete, 1);
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.bucket_sum(), stats.total);
    }
}
