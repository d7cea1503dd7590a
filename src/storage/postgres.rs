use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use std::time::Duration;

use crate::storage::traits::StorageBackend;
use crate::types::{Agent, AgentFilter, AgentStatus, ContextMap, LogEntry};

const AGENT_COLUMNS: &str =
    "id, parent_id, project_path, status, created_at, last_activity, context, logs, tags";

/// Durable provider backed by a single PostgreSQL `agents` table.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Builds the pool without connecting, so startup succeeds while the
    /// database is down and the failover layer takes over.
    pub fn connect_lazy(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect_lazy(database_url)?;
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::raw_sql(include_str!("../../migrations/V001__agents.sql"))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for PostgresStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn get(&self, id: &str) -> Result<Option<Agent>> {
        let row = sqlx::query(&format!("SELECT {} FROM agents WHERE id = $1", AGENT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Ok(Some(row_to_agent(&r)?)),
            None => Ok(None),
        }
    }

    async fn list(&self, filter: &AgentFilter) -> Result<Vec<Agent>> {
        let mut query: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {} FROM agents WHERE TRUE", AGENT_COLUMNS));

        if let Some(path) = &filter.project_path {
            query.push(" AND project_path = ").push_bind(path.clone());
        }
        if let Some(status) = &filter.status {
            query.push(" AND status = ").push_bind(status.as_str().to_string());
        }
        if let Some(parent_id) = &filter.parent_id {
            query.push(" AND parent_id = ").push_bind(parent_id.clone());
        }
        if !filter.tags.is_empty() {
            query.push(" AND tags @> ").push_bind(filter.tags.clone());
        }

        query.push(" ORDER BY last_activity DESC, id ASC");
        if let Some(limit) = filter.limit {
            query.push(" LIMIT ").push_bind(limit as i64);
        }
        if filter.offset > 0 {
            query.push(" OFFSET ").push_bind(filter.offset as i64);
        }

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_agent).collect()
    }

    async fn put(&self, agent: &Agent) -> Result<()> {
        let tags: Vec<String> = agent.tags.iter().cloned().collect();

        sqlx::query(
            r#"
            INSERT INTO agents (
                id, parent_id, project_path, status, created_at, last_activity,
                context, logs, tags
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE
            SET parent_id = EXCLUDED.parent_id,
                project_path = EXCLUDED.project_path,
                status = EXCLUDED.status,
                last_activity = EXCLUDED.last_activity,
                context = EXCLUDED.context,
                logs = EXCLUDED.logs,
                tags = EXCLUDED.tags
            "#,
        )
        .bind(&agent.id)
        .bind(&agent.parent_id)
        .bind(&agent.project_path)
        .bind(agent.status.as_str())
        .bind(agent.created)
        .bind(agent.last_activity)
        .bind(Value::Object(agent.context.clone()))
        .bind(serde_json::to_value(&agent.logs)?)
        .bind(tags)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM agents WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn row_to_agent(r: &PgRow) -> Result<Agent> {
    let status: String = r.try_get("status")?;
    let context = match r.try_get::<Value, _>("context")? {
        Value::Object(map) => map,
        _ => ContextMap::new(),
    };
    let logs: Vec<LogEntry> = serde_json::from_value(r.try_get("logs")?)?;
    let tags: Vec<String> = r.try_get("tags")?;

    Ok(Agent {
        id: r.try_get("id")?,
        parent_id: r.try_get("parent_id")?,
        project_path: r.try_get("project_path")?,
        status: AgentStatus::from(status),
        created: r.try_get("created_at")?,
        last_activity: r.try_get("last_activity")?,
        context,
        logs,
        tags: tags.into_iter().collect(),
    })
}
