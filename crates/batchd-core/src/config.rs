//! Configuration types for batchd

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use crate::{BatchdError, BatchdResult};

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Placement configuration
    pub scheduling: SchedulingConfig,
    /// Protected key redaction configuration
    pub redaction: RedactionConfig,
    /// Node agent client configuration
    pub agent: AgentConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Fleet members and their agent endpoints
    pub nodes: Vec<NodeConfig>,
}

impl DaemonConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> BatchdResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| BatchdError::Config(format!("Failed to read config file: {}", e)))?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the scheduler cannot run with
    pub fn validate(&self) -> BatchdResult<()> {
        if self.scheduling.cron_interval_secs == 0 {
            return Err(BatchdError::Config(
                "scheduling.cron_interval_secs must be positive".to_string(),
            ));
        }
        if self.redaction.iterations == 0 {
            return Err(BatchdError::Config(
                "redaction.iterations must be positive".to_string(),
            ));
        }
        if self.agent.timeout_secs == 0 {
            return Err(BatchdError::Config(
                "agent.timeout_secs must be positive".to_string(),
            ));
        }
        if self.redaction.salt.is_empty() {
            return Err(BatchdError::Config("redaction.salt must not be empty".to_string()));
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.name.as_str()) {
                return Err(BatchdError::Config(format!(
                    "duplicate node name: {}",
                    node.name
                )));
            }
            if node.ram == 0 {
                return Err(BatchdError::Config(format!(
                    "node {} must declare positive ram",
                    node.name
                )));
            }
        }
        Ok(())
    }
}

/// Node selection heuristic used during placement
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlacementStrategy {
    /// Pick the candidate with the most free RAM
    #[default]
    Spread,
    /// Pick the candidate with the least free RAM that still fits
    Binpack,
}

impl std::fmt::Display for PlacementStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlacementStrategy::Spread => write!(f, "spread"),
            PlacementStrategy::Binpack => write!(f, "binpack"),
        }
    }
}

/// Scheduling loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    /// Node selection strategy
    pub strategy: PlacementStrategy,
    /// Cron poller interval in seconds
    pub cron_interval_secs: u64,
}

impl SchedulingConfig {
    pub fn cron_interval(&self) -> Duration {
        Duration::from_secs(self.cron_interval_secs)
    }
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            strategy: PlacementStrategy::Spread,
            cron_interval_secs: 60,
        }
    }
}

/// Redaction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedactionConfig {
    /// Application salt fed to the key derivation
    pub salt: String,
    /// PBKDF2 rounds
    pub iterations: u32,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            salt: "batchd-protected-keys".to_string(),
            iterations: 100_000,
        }
    }
}

/// Node agent client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Request timeout for actions and health probes, in seconds
    pub timeout_secs: u64,
}

impl AgentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self { timeout_secs: 10 }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive
    pub level: String,
    /// Log format (json or text)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// A node and the address of its agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,
    /// Base URL of the node agent
    pub url: String,
    /// Total RAM in MiB
    pub ram: u64,
}
