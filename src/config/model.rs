// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::errors::{Result, SnapdError};
use crate::store::RetryPolicy;

/// Configuration exactly as read from TOML, before validation.
///
/// ```toml
/// [agent]
/// monitor_schedule = "0 * * * * *"
/// tool = "bv"
///
/// [database]
/// path = "/var/lib/snapd/snapd.db"
///
/// [notifications]
/// failure = true
/// complete = true
/// [notifications.types.discord]
/// url = "https://discord.com/api/webhooks/..."
///
/// [nodes.ethereum-mainnet]
/// protocol = "ethereum"
/// type = "archive"
/// url = "http://localhost:8545"
/// schedule = "0 0 3 * * *"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub agent: AgentSection,

    #[serde(default)]
    pub database: DatabaseSection,

    /// Global notification settings, used by nodes without their own block.
    #[serde(default)]
    pub notifications: Option<NotificationConfig>,

    /// `[nodes.<name>]` sections keyed by node name.
    #[serde(default)]
    pub nodes: BTreeMap<String, RawNodeConfig>,
}

/// `[agent]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    /// Six-field cron expression for the monitor/discovery job.
    #[serde(default = "default_monitor_schedule")]
    pub monitor_schedule: String,

    /// External node-management program.
    #[serde(default = "default_tool")]
    pub tool: String,

    /// Program basenames whose invocations must never overlap.
    #[serde(default = "default_non_reentrant")]
    pub non_reentrant: Vec<String>,

    /// Per-command limit, e.g. `"5m"`. `"0s"` disables it.
    #[serde(default = "default_command_timeout")]
    pub command_timeout: String,

    /// How long shutdown waits for in-flight jobs.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: String,

    /// Record uploads whose status line reports a non-zero exit code as
    /// `failed` instead of `completed`.
    #[serde(default)]
    pub nonzero_exit_is_failure: bool,
}

fn default_monitor_schedule() -> String {
    "0 * * * * *".to_string()
}

fn default_tool() -> String {
    "bv".to_string()
}

fn default_non_reentrant() -> Vec<String> {
    vec![default_tool()]
}

fn default_command_timeout() -> String {
    "5m".to_string()
}

fn default_shutdown_timeout() -> String {
    "30s".to_string()
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            monitor_schedule: default_monitor_schedule(),
            tool: default_tool(),
            non_reentrant: default_non_reentrant(),
            command_timeout: default_command_timeout(),
            shutdown_timeout: default_shutdown_timeout(),
            nonzero_exit_is_failure: false,
        }
    }
}

/// `[database]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSection {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay: String,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("/var/lib/snapd/snapd.db")
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_delay() -> String {
    "100ms".to_string()
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            retry_attempts: default_retry_attempts(),
            retry_base_delay: default_retry_base_delay(),
        }
    }
}

/// Which events to send, and where.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub failure: bool,
    #[serde(default)]
    pub skip: bool,
    #[serde(default)]
    pub complete: bool,

    /// Transport name (e.g. `discord`) to its destination.
    #[serde(default)]
    pub types: BTreeMap<String, NotificationTarget>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NotificationTarget {
    #[serde(default)]
    pub url: String,
}

/// `[nodes.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RawNodeConfig {
    #[serde(default)]
    pub protocol: String,

    /// Informational node type, e.g. `archive` or `full`.
    #[serde(default, rename = "type")]
    pub node_type: String,

    /// Execution / JSON-RPC endpoint.
    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub beacon_url: Option<String>,

    /// Six-field cron expression; nodes without one are only uploaded on
    /// demand.
    #[serde(default)]
    pub schedule: Option<String>,

    /// Replaces the global `[notifications]` block for this node.
    #[serde(default)]
    pub notifications: Option<NotificationConfig>,
}

/// A configured node, immutable at runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSpec {
    pub name: String,
    pub protocol: String,
    pub node_type: String,
    pub url: String,
    pub beacon_url: Option<String>,
    pub schedule: Option<String>,
    /// Effective notification settings: the node's own block, else the
    /// global one.
    pub notifications: Option<NotificationConfig>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentSettings {
    pub monitor_schedule: String,
    pub tool: String,
    pub non_reentrant: Vec<String>,
    pub command_timeout: Option<Duration>,
    pub shutdown_timeout: Duration,
    pub nonzero_exit_is_failure: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseSettings {
    pub path: PathBuf,
    pub retry: RetryPolicy,
}

/// Validated configuration. Build it with `ConfigFile::try_from(raw)`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub agent: AgentSettings,
    pub database: DatabaseSettings,
    pub notifications: Option<NotificationConfig>,
    pub nodes: BTreeMap<String, NodeSpec>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        agent: AgentSettings,
        database: DatabaseSettings,
        notifications: Option<NotificationConfig>,
        nodes: BTreeMap<String, NodeSpec>,
    ) -> Self {
        Self {
            agent,
            database,
            notifications,
            nodes,
        }
    }

    pub fn node(&self, name: &str) -> Result<&NodeSpec> {
        self.nodes
            .get(name)
            .ok_or_else(|| SnapdError::NodeNotFound(name.to_string()))
    }

    /// Nodes with their own upload schedule.
    pub fn scheduled_nodes(&self) -> impl Iterator<Item = (&NodeSpec, &str)> {
        self.nodes
            .values()
            .filter_map(|n| n.schedule.as_deref().map(|s| (n, s)))
    }
}
