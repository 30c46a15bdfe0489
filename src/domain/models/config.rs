//! Control-plane configuration model.
//!
//! Loaded by the figment-based loader in `infrastructure::config` with
//! hierarchical merging and validation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: ".cellplane/cellplane.db".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// trace | debug | info | warn | error
    pub level: String,
    /// json | pretty
    pub format: String,
    /// Optional log file; stderr when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Concurrent reconciles per kind.
    pub workers: usize,
    /// Per-attempt reconcile deadline.
    pub reconcile_timeout_secs: u64,
    /// Full list + replay interval after watch disconnects.
    pub resync_interval_secs: u64,
    /// Per-kind deadline overrides keyed by kind name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub timeout_overrides: BTreeMap<String, u64>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            reconcile_timeout_secs: 30,
            resync_interval_secs: 300,
            timeout_overrides: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Platform-wide cap on cells per root tree, consulted by the recursion
    /// validator.
    pub max_total_cells: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self { max_total_cells: 100 }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub controllers: ControllerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Root directory for formation workspaces.
    #[serde(default = "default_workspace_root")]
    pub workspace_root: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            controllers: ControllerConfig::default(),
            retry: RetryConfig::default(),
            limits: LimitsConfig::default(),
            workspace_root: default_workspace_root(),
        }
    }
}

fn default_workspace_root() -> String {
    ".cellplane/workspaces".to_string()
}

impl Config {
    /// Reconcile deadline for a kind, honouring overrides.
    pub fn reconcile_timeout(&self, kind: &str) -> std::time::Duration {
        let secs = self
            .controllers
            .timeout_overrides
            .get(kind)
            .copied()
            .unwrap_or(self.controllers.reconcile_timeout_secs);
        std::time::Duration::from_secs(secs)
    }
}
