// src/agent.rs

//! Wiring of the long-lived agent: store, runner, registries, jobs and the
//! scheduler that fires them.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{ConfigFile, NodeSpec, check_registrations};
use crate::errors::Result;
use crate::exec::{CommandRunner, ProcessRunner};
use crate::jobs::{MonitorJob, NodeUploadJob, NotificationDispatcher};
use crate::notification::NotificationRegistry;
use crate::protocol::ProtocolRegistry;
use crate::scheduler::Scheduler;
use crate::store::{SqliteStore, Store};
use crate::types::TriggerType;
use crate::upload::UploadManager;

pub struct Agent {
    config: ConfigFile,
    nodes: Arc<BTreeMap<String, NodeSpec>>,
    manager: Arc<UploadManager>,
    protocols: Arc<ProtocolRegistry>,
    dispatcher: NotificationDispatcher,
}

impl Agent {
    /// Open the database and build the production runner and registries.
    pub async fn bootstrap(config: ConfigFile) -> Result<Self> {
        let protocols = ProtocolRegistry::with_defaults()?;
        let notifiers = NotificationRegistry::with_defaults()?;
        check_registrations(&config, &protocols, &notifiers)?;

        let store = SqliteStore::open(&config.database.path, config.database.retry).await?;
        info!(path = %config.database.path.display(), "database opened");

        let runner = ProcessRunner::new(
            config.agent.non_reentrant.iter().cloned(),
            config.agent.command_timeout,
        );

        Self::from_parts(config, Arc::new(store), Arc::new(runner), protocols, notifiers)
    }

    /// Assemble an agent from already-built collaborators.
    pub fn from_parts(
        config: ConfigFile,
        store: Arc<dyn Store>,
        runner: Arc<dyn CommandRunner>,
        protocols: ProtocolRegistry,
        notifiers: NotificationRegistry,
    ) -> Result<Self> {
        check_registrations(&config, &protocols, &notifiers)?;

        let manager = UploadManager::new(runner, store, config.agent.tool.clone())
            .with_failure_policy(config.agent.nonzero_exit_is_failure);

        Ok(Self {
            nodes: Arc::new(config.nodes.clone()),
            config,
            manager: Arc::new(manager),
            protocols: Arc::new(protocols),
            dispatcher: NotificationDispatcher::new(Arc::new(notifiers)),
        })
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        self.manager.store()
    }

    pub fn manager(&self) -> &Arc<UploadManager> {
        &self.manager
    }

    pub fn node_upload_job(&self, node: &str, trigger: TriggerType) -> Result<NodeUploadJob> {
        let spec = self.config.node(node)?.clone();
        Ok(NodeUploadJob::new(
            spec,
            self.manager.clone(),
            self.protocols.clone(),
            self.dispatcher.clone(),
        )
        .with_trigger(trigger))
    }

    pub fn monitor_job(&self) -> MonitorJob {
        MonitorJob::new(
            self.nodes.clone(),
            self.manager.clone(),
            self.protocols.clone(),
            self.dispatcher.clone(),
        )
    }

    /// Scheduler with the monitor job and one upload job per scheduled node.
    pub fn build_scheduler(&self) -> Result<Scheduler> {
        let mut scheduler = Scheduler::new();
        scheduler.add_job(&self.config.agent.monitor_schedule, Arc::new(self.monitor_job()))?;

        for (node, schedule) in self.config.scheduled_nodes() {
            let job = self.node_upload_job(&node.name, TriggerType::Scheduled)?;
            scheduler.add_job(schedule, Arc::new(job))?;
        }
        Ok(scheduler)
    }

    /// Run until `shutdown` fires, then stop the scheduler within the
    /// configured shutdown timeout.
    pub async fn run_until(&self, shutdown: CancellationToken) -> Result<()> {
        let mut scheduler = self.build_scheduler()?;
        info!(
            nodes = self.nodes.len(),
            jobs = scheduler.job_count(),
            monitor_schedule = %self.config.agent.monitor_schedule,
            "agent starting"
        );
        scheduler.start();

        shutdown.cancelled().await;

        info!("shutdown requested");
        let res = scheduler.stop(self.config.agent.shutdown_timeout).await;
        if let Err(err) = &res {
            warn!(error = %err, "in-flight jobs did not finish before shutdown timeout");
        }
        res
    }

    /// Run until SIGINT or SIGTERM.
    pub async fn run_daemon(&self) -> Result<()> {
        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            match shutdown_signal().await {
                Ok(signal) => info!(signal, "signal received"),
                Err(err) => warn!(error = %err, "failed to listen for shutdown signals"),
            }
            trigger.cancel();
        });
        self.run_until(shutdown).await
    }
}

async fn shutdown_signal() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.map(|_| "SIGINT"),
            _ = terminate.recv() => Ok("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.map(|_| "ctrl-c")
    }
}
