#![allow(dead_code)]

use std::fmt::Write as _;

use snapd::config::{ConfigFile, NodeSpec, NotificationConfig, NotificationTarget, parse_str};

/// Builder for `ConfigFile`, going through the real TOML parser and
/// validation.
pub struct ConfigFileBuilder {
    agent: Vec<String>,
    database_path: String,
    notifications: Option<String>,
    nodes: Vec<String>,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            agent: Vec::new(),
            database_path: ":memory:".to_string(),
            notifications: None,
            nodes: Vec::new(),
        }
    }

    /// Raw `key = value` line for the `[agent]` section.
    pub fn agent(mut self, line: &str) -> Self {
        self.agent.push(line.to_string());
        self
    }

    /// Global `[notifications]` with every event enabled for `transport`.
    pub fn notify_all(mut self, transport: &str, url: &str) -> Self {
        self.notifications = Some(notifications_toml("notifications", transport, url));
        self
    }

    pub fn node(mut self, name: &str, protocol: &str, schedule: Option<&str>) -> Self {
        let mut s = format!(
            "[nodes.{name}]\nprotocol = \"{protocol}\"\ntype = \"archive\"\nurl = \"http://127.0.0.1:1\"\n"
        );
        if let Some(expr) = schedule {
            let _ = writeln!(s, "schedule = \"{expr}\"");
        }
        self.nodes.push(s);
        self
    }

    pub fn to_toml(&self) -> String {
        let mut s = String::from("[agent]\n");
        for line in &self.agent {
            let _ = writeln!(s, "{line}");
        }
        let _ = writeln!(s, "\n[database]\npath = \"{}\"\n", self.database_path);
        if let Some(n) = &self.notifications {
            let _ = writeln!(s, "{n}");
        }
        for node in &self.nodes {
            let _ = writeln!(s, "{node}");
        }
        s
    }

    pub fn build(self) -> ConfigFile {
        let raw = parse_str(&self.to_toml()).expect("builder TOML should parse");
        ConfigFile::try_from(raw).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn notifications_toml(table: &str, transport: &str, url: &str) -> String {
    format!(
        "[{table}]\nfailure = true\nskip = true\ncomplete = true\n[{table}.types.{transport}]\nurl = \"{url}\"\n"
    )
}

/// Builder for `NodeSpec`.
pub struct NodeSpecBuilder {
    node: NodeSpec,
}

impl NodeSpecBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            node: NodeSpec {
                name: name.to_string(),
                protocol: "ethereum".to_string(),
                node_type: "archive".to_string(),
                url: "http://127.0.0.1:1".to_string(),
                beacon_url: None,
                schedule: None,
                notifications: None,
            },
        }
    }

    pub fn protocol(mut self, protocol: &str) -> Self {
        self.node.protocol = protocol.to_string();
        self
    }

    pub fn schedule(mut self, expr: &str) -> Self {
        self.node.schedule = Some(expr.to_string());
        self
    }

    /// Enable every event for `transport` at `url`.
    pub fn notify_all(mut self, transport: &str, url: &str) -> Self {
        let mut config = NotificationConfig {
            failure: true,
            skip: true,
            complete: true,
            ..NotificationConfig::default()
        };
        config.types.insert(
            transport.to_string(),
            NotificationTarget {
                url: url.to_string(),
            },
        );
        self.node.notifications = Some(config);
        self
    }

    pub fn notifications(mut self, config: NotificationConfig) -> Self {
        self.node.notifications = Some(config);
        self
    }

    pub fn build(self) -> NodeSpec {
        self.node
    }
}

/// Text the external tool prints for `node job <node> info upload`.
pub struct InfoOutput;

impl InfoOutput {
    /// A running job with optional progress.
    pub fn running(progress: Option<(f64, i64, i64)>) -> String {
        let mut s = String::from("status:           2025-12-07 12:00:00 UTC| Running\n");
        if let Some((percent, done, total)) = progress {
            let _ = writeln!(s, "progress:         {percent:.2}% ({done}/{total} multi-client upload)");
        }
        s.push_str("restart_count:    0\nupgrade_blocking: true\nlogs:             <empty>\n");
        s
    }

    /// A finished job with the given exit code and final chunk count.
    pub fn finished(exit_code: i32, total: i64) -> String {
        format!(
            "status:           2025-12-07 13:41:43 UTC| Finished with exit code {exit_code} and message `done`\n\
             progress:         100.00% ({total}/{total} multi-client upload completed)\n\
             restart_count:    0\n\
             upgrade_blocking: true\n\
             logs:             <empty>\n"
        )
    }
}
