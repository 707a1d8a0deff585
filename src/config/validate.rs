// src/config/validate.rs

use std::collections::BTreeMap;

use crate::config::duration::parse_duration;
use crate::config::model::{
    AgentSettings, ConfigFile, DatabaseSettings, NodeSpec, NotificationConfig, RawConfigFile,
};
use crate::errors::{Result, SnapdError};
use crate::notification::NotificationRegistry;
use crate::protocol::ProtocolRegistry;
use crate::scheduler::parse_schedule;
use crate::store::RetryPolicy;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = SnapdError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;

        let agent = AgentSettings {
            monitor_schedule: raw.agent.monitor_schedule,
            tool: raw.agent.tool,
            non_reentrant: raw.agent.non_reentrant,
            command_timeout: Some(duration_field("agent.command_timeout", &raw.agent.command_timeout)?)
                .filter(|d| !d.is_zero()),
            shutdown_timeout: duration_field("agent.shutdown_timeout", &raw.agent.shutdown_timeout)?,
            nonzero_exit_is_failure: raw.agent.nonzero_exit_is_failure,
        };

        let database = DatabaseSettings {
            path: raw.database.path,
            retry: RetryPolicy::new(
                raw.database.retry_attempts,
                duration_field("database.retry_base_delay", &raw.database.retry_base_delay)?,
            ),
        };

        let nodes: BTreeMap<String, NodeSpec> = raw
            .nodes
            .into_iter()
            .map(|(name, node)| {
                let spec = NodeSpec {
                    name: name.clone(),
                    protocol: node.protocol,
                    node_type: node.node_type,
                    url: node.url,
                    beacon_url: node.beacon_url,
                    schedule: node.schedule,
                    notifications: node.notifications.or_else(|| raw.notifications.clone()),
                };
                (name, spec)
            })
            .collect();

        Ok(ConfigFile::new_unchecked(
            agent,
            database,
            raw.notifications,
            nodes,
        ))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_nodes(cfg)?;
    validate_agent(cfg)?;
    validate_database(cfg)?;
    if let Some(n) = &cfg.notifications {
        validate_notifications("[notifications]", n)?;
    }
    validate_nodes(cfg)?;
    Ok(())
}

fn ensure_has_nodes(cfg: &RawConfigFile) -> Result<()> {
    if cfg.nodes.is_empty() {
        return Err(SnapdError::ConfigError(
            "config must contain at least one [nodes.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn duration_field(field: &str, value: &str) -> Result<std::time::Duration> {
    parse_duration(value)
        .map_err(|e| SnapdError::ConfigError(format!("[{field}] is invalid: {e}")))
}

fn schedule_field(field: &str, expr: &str) -> Result<()> {
    parse_schedule(expr)
        .map(|_| ())
        .map_err(|e| SnapdError::ConfigError(format!("{field}: {e}")))
}

fn validate_agent(cfg: &RawConfigFile) -> Result<()> {
    let agent = &cfg.agent;
    if agent.tool.trim().is_empty() {
        return Err(SnapdError::ConfigError(
            "[agent].tool must not be empty".to_string(),
        ));
    }
    schedule_field("[agent].monitor_schedule", &agent.monitor_schedule)?;
    duration_field("agent.command_timeout", &agent.command_timeout)?;
    duration_field("agent.shutdown_timeout", &agent.shutdown_timeout)?;
    Ok(())
}

fn validate_database(cfg: &RawConfigFile) -> Result<()> {
    if cfg.database.path.as_os_str().is_empty() {
        return Err(SnapdError::ConfigError(
            "[database].path must not be empty".to_string(),
        ));
    }
    if cfg.database.retry_attempts == 0 {
        return Err(SnapdError::ConfigError(
            "[database].retry_attempts must be >= 1 (got 0)".to_string(),
        ));
    }
    duration_field("database.retry_base_delay", &cfg.database.retry_base_delay)?;
    Ok(())
}

fn validate_notifications(section: &str, n: &NotificationConfig) -> Result<()> {
    if n.types.is_empty() {
        return Err(SnapdError::ConfigError(format!(
            "{section} must configure at least one notification type"
        )));
    }
    for (name, target) in &n.types {
        if target.url.trim().is_empty() {
            return Err(SnapdError::ConfigError(format!(
                "{section} notification type '{name}' is missing a url"
            )));
        }
    }
    Ok(())
}

fn validate_nodes(cfg: &RawConfigFile) -> Result<()> {
    for (name, node) in &cfg.nodes {
        if name.trim().is_empty() {
            return Err(SnapdError::ConfigError(
                "node names must not be empty".to_string(),
            ));
        }
        if node.protocol.trim().is_empty() {
            return Err(SnapdError::ConfigError(format!(
                "node '{name}' is missing `protocol`"
            )));
        }
        if node.url.trim().is_empty() {
            return Err(SnapdError::ConfigError(format!(
                "node '{name}' is missing `url`"
            )));
        }
        if let Some(expr) = &node.schedule {
            schedule_field(&format!("node '{name}' schedule"), expr)?;
        }
        if let Some(n) = &node.notifications {
            validate_notifications(&format!("[nodes.{name}.notifications]"), n)?;
        }
    }
    Ok(())
}

/// Reject protocols and notification types the registries cannot serve.
pub fn check_registrations(
    cfg: &ConfigFile,
    protocols: &ProtocolRegistry,
    notifiers: &NotificationRegistry,
) -> Result<()> {
    for node in cfg.nodes.values() {
        if !protocols.is_registered(&node.protocol) {
            return Err(SnapdError::ConfigError(format!(
                "node '{}' uses unsupported protocol '{}' (registered: {})",
                node.name,
                node.protocol,
                protocols.names().join(", ")
            )));
        }
        if let Some(n) = &node.notifications {
            for kind in n.types.keys() {
                if !notifiers.is_registered(kind) {
                    return Err(SnapdError::ConfigError(format!(
                        "node '{}' uses unsupported notification type '{}' (registered: {})",
                        node.name,
                        kind,
                        notifiers.names().join(", ")
                    )));
                }
            }
        }
    }
    Ok(())
}
