// src/jobs/notify.rs

use std::sync::Arc;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::NotificationConfig;
use crate::notification::{NotificationPayload, NotificationRegistry};
use crate::types::NotificationEvent;

/// Fans a payload out to every transport a node is configured for.
#[derive(Clone)]
pub struct NotificationDispatcher {
    registry: Arc<NotificationRegistry>,
}

impl NotificationDispatcher {
    pub fn new(registry: Arc<NotificationRegistry>) -> Self {
        Self { registry }
    }

    /// Send `payload` if `config` enables its event. Returns how many
    /// transports accepted it; failures are logged, never returned.
    pub async fn dispatch(
        &self,
        cancel: &CancellationToken,
        config: Option<&NotificationConfig>,
        payload: &NotificationPayload,
    ) -> usize {
        let Some(config) = config else {
            return 0;
        };
        if !is_enabled(config, payload.event) {
            debug!(node = %payload.node_name, event = %payload.event, "notification disabled for event");
            return 0;
        }

        let sends = config.types.iter().map(|(kind, target)| async move {
            let notifier = match self.registry.get(kind) {
                Ok(n) => n,
                Err(err) => {
                    warn!(node = %payload.node_name, transport = %kind, error = %err, "notification skipped");
                    return false;
                }
            };
            match notifier.send(cancel, &target.url, payload).await {
                Ok(()) => true,
                Err(err) => {
                    warn!(
                        node = %payload.node_name,
                        event = %payload.event,
                        transport = %kind,
                        error = %err,
                        "notification delivery failed"
                    );
                    false
                }
            }
        });

        join_all(sends).await.into_iter().filter(|ok| *ok).count()
    }
}

pub fn is_enabled(config: &NotificationConfig, event: NotificationEvent) -> bool {
    match event {
        NotificationEvent::Failure => config.failure,
        NotificationEvent::Skip => config.skip,
        NotificationEvent::Complete => config.complete,
    }
}
