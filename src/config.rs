use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: Option<String>,
    pub storage: StorageConfig,
    pub agents: AgentConfig,
    pub hub: HubConfig,
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub ping_timeout_ms: u64,
    pub health_check_interval_secs: u64,
    pub health_cache_ms: u64,
    pub write_retries: u32,
    pub retry_backoff_ms: u64,
    pub memory_ttl_secs: u64,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub max_logs: usize,
    pub max_context_bytes: usize,
    pub unique_registration: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub heartbeat_interval_secs: u64,
    pub max_missed_pongs: u32,
    pub connection_buffer: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub window_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            database_url: None,
            storage: StorageConfig::default(),
            agents: AgentConfig::default(),
            hub: HubConfig::default(),
            retention: RetentionConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            ping_timeout_ms: 2_000,
            health_check_interval_secs: 10,
            health_cache_ms: 5_000,
            write_retries: 3,
            retry_backoff_ms: 100,
            memory_ttl_secs: 172_800,
            max_connections: 10,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_logs: 1_000,
            max_context_bytes: 64 * 1024,
            unique_registration: false,
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 30,
            max_missed_pongs: 2,
            connection_buffer: 256,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            window_secs: 86_400,
            sweep_interval_secs: 300,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Defaults, then the TOML file at `path`, then environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let mut config: Config = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.apply_env();
        Ok(config)
    }

    /// TTL for the in-memory provider. While retention is on it is kept past
    /// one full retention cycle, so expired agents are removed by the sweep
    /// (which broadcasts the deletion) before silent eviction can reach them.
    pub fn memory_ttl(&self) -> Duration {
        let configured = self.storage.memory_ttl();
        if self.retention.window_secs == 0 {
            return configured;
        }
        let floor = self.retention.window() + self.retention.sweep_interval() + Duration::from_secs(1);
        configured.max(floor)
    }

    fn apply_env(&mut self) {
        if let Ok(host) = std::env::var("SWITCHBOARD_HOST") {
            self.host = host;
        }
        if let Some(port) = env_parse("SWITCHBOARD_PORT") {
            self.port = port;
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.is_empty() {
                self.database_url = Some(url);
            }
        }
        if let Some(secs) = env_parse("SWITCHBOARD_RETENTION_SECS") {
            self.retention.window_secs = secs;
        }
        if let Some(secs) = env_parse("SWITCHBOARD_HEARTBEAT_SECS") {
            self.hub.heartbeat_interval_secs = secs;
        }
        if let Some(enabled) = env_parse("SWITCHBOARD_UNIQUE_REGISTRATION") {
            self.agents.unique_registration = enabled;
        }
    }
}

impl StorageConfig {
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs.max(1))
    }

    pub fn health_cache(&self) -> Duration {
        Duration::from_millis(self.health_cache_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn memory_ttl(&self) -> Duration {
        Duration::from_secs(self.memory_ttl_secs)
    }
}

impl HubConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }
}

impl RetentionConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 3001);
        assert!(config.database_url.is_none());
        assert_eq!(config.storage.write_retries, 3);
        assert_eq!(config.hub.max_missed_pongs, 2);
        assert!(!config.agents.unique_registration);
    }

    #[test]
    fn test_load_partial_toml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
port = 4100

[retention]
window_secs = 60

[agents]
max_logs = 10
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.retention.window_secs, 60);
        assert_eq!(config.retention.sweep_interval_secs, 300);
        assert_eq!(config.agents.max_logs, 10);
        assert_eq!(config.agents.max_context_bytes, 64 * 1024);
        assert_eq!(config.storage.ping_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_memory_ttl_outlives_retention_cycle() {
        let config = Config::default();
        let cycle = config.retention.window() + config.retention.sweep_interval();
        assert!(config.memory_ttl() > cycle);

        let mut short = Config::default();
        short.storage.memory_ttl_secs = 10;
        short.retention.window_secs = 60;
        short.retention.sweep_interval_secs = 30;
        assert_eq!(short.memory_ttl(), Duration::from_secs(91));

        short.retention.window_secs = 0;
        assert_eq!(short.memory_ttl(), Duration::from_secs(10));
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = Config::load(Path::new("/definitely/not/here.toml"));
        assert!(result.is_err());
    }
}
