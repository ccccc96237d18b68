//! Configuration for `tether`
//!
//! One TOML file per node, merged from:
//! 1. Environment variables (`TETHER_*`, sections split by `__`, highest precedence)
//! 2. The config file named on the command line
//! 3. Built-in defaults (lowest precedence)
//!
//! ```toml
//! [node]
//! role = "primary"            # primary | secondary | none
//! advertise = "10.0.0.1:4400"
//! status_dir = "/var/lib/tether"
//!
//! [cluster]
//! primary = "10.0.0.1:4400"
//! secondary = "10.0.0.2:4400"
//! monitor = "10.0.0.3:4400"
//!
//! [database]
//! start = "exec postgres -D /var/lib/postgresql/data"
//! promote = "pg_ctl promote -D /var/lib/postgresql/data"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_types::ConfiguredRole;

mod error;
mod loader;

pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;

/// Main tether configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    pub node: NodeConfig,
    pub cluster: ClusterConfig,
    pub timing: TimingConfig,
    pub database: DatabaseConfig,
}

/// This node's identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub role: Option<ConfiguredRole>,
    /// Address the other participants reach this node at.
    pub advertise: String,
    /// Address the RPC server binds; defaults to `advertise`.
    pub listen: Option<String>,
    /// Directory holding the durable node record.
    pub status_dir: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            role: None,
            advertise: String::new(),
            listen: None,
            status_dir: PathBuf::from("status"),
        }
    }
}

/// Addresses of the three participants.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub primary: Option<String>,
    pub secondary: Option<String>,
    pub monitor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub check_interval_ms: u64,
    pub rpc_timeout_ms: u64,
    pub ready_retry_ms: u64,
    pub start_grace_ms: u64,
    pub stop_timeout_ms: u64,
    pub sync_poll_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 2000,
            rpc_timeout_ms: 1000,
            ready_retry_ms: 1000,
            start_grace_ms: 200,
            stop_timeout_ms: 10_000,
            sync_poll_ms: 1000,
        }
    }
}

impl TimingConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn ready_retry(&self) -> Duration {
        Duration::from_millis(self.ready_retry_ms)
    }

    pub fn start_grace(&self) -> Duration {
        Duration::from_millis(self.start_grace_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn sync_poll(&self) -> Duration {
        Duration::from_millis(self.sync_poll_ms)
    }

    fn validate(&self) -> ConfigResult<()> {
        let fields = [
            ("timing.check_interval_ms", self.check_interval_ms),
            ("timing.rpc_timeout_ms", self.rpc_timeout_ms),
            ("timing.ready_retry_ms", self.ready_retry_ms),
            ("timing.stop_timeout_ms", self.stop_timeout_ms),
            ("timing.sync_poll_ms", self.sync_poll_ms),
        ];
        match fields.into_iter().find(|(_, ms)| *ms == 0) {
            Some((field, _)) => Err(ConfigError::ZeroDuration(field)),
            None => Ok(()),
        }
    }
}

/// Shell command hooks driving the database (each runs via `sh -c`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub init: Option<String>,
    pub start: Option<String>,
    pub stop: Option<String>,
    pub promote: Option<String>,
    pub demote: Option<String>,
    pub standalone: Option<String>,
    pub sync_check: Option<String>,
}

impl TetherConfig {
    /// Returns the configured role.
    pub fn role(&self) -> ConfigResult<ConfiguredRole> {
        self.node.role.ok_or(ConfigError::Missing("node.role"))
    }

    /// Address the RPC server should bind.
    pub fn listen_address(&self) -> &str {
        self.node.listen.as_deref().unwrap_or(&self.node.advertise)
    }

    /// Address of the other database node, or `None` on the monitor.
    pub fn peer_address(&self) -> Option<&str> {
        match self.node.role? {
            ConfiguredRole::Primary => self.cluster.secondary.as_deref(),
            ConfiguredRole::Secondary => self.cluster.primary.as_deref(),
            ConfiguredRole::Arbiter => None,
        }
    }

    /// Address of the monitor.
    pub fn monitor_address(&self) -> Option<&str> {
        self.cluster.monitor.as_deref()
    }

    /// Checks that everything this node's role needs is present and well formed.
    pub fn validate(&self) -> ConfigResult<()> {
        let role = self.role()?;

        if self.node.advertise.is_empty() {
            return Err(ConfigError::Missing("node.advertise"));
        }
        check_address("node.advertise", &self.node.advertise)?;
        if let Some(listen) = &self.node.listen {
            check_address("node.listen", listen)?;
        }
        self.timing.validate()?;

        if !role.runs_database() {
            return Ok(());
        }

        for (field, value) in [
            ("cluster.primary", &self.cluster.primary),
            ("cluster.secondary", &self.cluster.secondary),
            ("cluster.monitor", &self.cluster.monitor),
        ] {
            let address = value.as_deref().ok_or(ConfigError::Missing(field))?;
            check_address(field, address)?;
        }

        match self.database.start.as_deref() {
            Some(start) if !start.trim().is_empty() => Ok(()),
            _ => Err(ConfigError::Missing("database.start")),
        }
    }

    /// Resolve relative paths against `base_dir`
    pub fn resolve_paths(&mut self, base_dir: impl AsRef<Path>) {
        if self.node.status_dir.is_relative() {
            self.node.status_dir = base_dir.as_ref().join(&self.node.status_dir);
        }
    }

    /// Renders the effective configuration as TOML.
    pub fn to_toml(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn check_address(field: &'static str, value: &str) -> ConfigResult<()> {
    let invalid = || ConfigError::InvalidAddress {
        field,
        value: value.to_string(),
    };
    let (host, port) = value.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() {
        return Err(invalid());
    }
    match port.parse::<u16>() {
        Ok(port) if port != 0 => Ok(()),
        _ => Err(invalid()),
    }
}
