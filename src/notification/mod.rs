// src/notification/mod.rs

//! Notification transports.
//!
//! A [`Notifier`] delivers a [`NotificationPayload`] to one destination URL.
//! Transports are looked up by name in a [`NotificationRegistry`] that is
//! filled once at startup and only read afterwards.

pub mod discord;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::types::NotificationEvent;

pub use discord::DiscordNotifier;

#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("notification type '{0}' is not registered")]
    NotRegistered(String),

    #[error("notification type '{0}' is already registered")]
    Duplicate(String),

    #[error("notification type name cannot be empty")]
    EmptyName,

    #[error("{transport} request failed: {source}")]
    Http {
        transport: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{transport} returned non-success status {status}")]
    Status { transport: String, status: u16 },

    #[error("notification delivery cancelled")]
    Cancelled,
}

/// Event handed to every configured transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationPayload {
    pub event: NotificationEvent,
    pub node_name: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl NotificationPayload {
    pub fn new(event: NotificationEvent, node_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            event,
            node_name: node_name.into(),
            timestamp: Utc::now(),
            message: message.into(),
            details: serde_json::Map::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Type name used in configuration (`[notifications.types.<name>]`).
    fn name(&self) -> &str;

    async fn send(
        &self,
        cancel: &CancellationToken,
        url: &str,
        payload: &NotificationPayload,
    ) -> Result<(), NotificationError>;
}

#[derive(Default, Clone)]
pub struct NotificationRegistry {
    notifiers: BTreeMap<String, Arc<dyn Notifier>>,
}

impl NotificationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in transport.
    pub fn with_defaults() -> Result<Self, NotificationError> {
        let mut registry = Self::new();
        registry.register(Arc::new(DiscordNotifier::new()?))?;
        Ok(registry)
    }

    pub fn register(&mut self, notifier: Arc<dyn Notifier>) -> Result<(), NotificationError> {
        let name = notifier.name().to_string();
        if name.is_empty() {
            return Err(NotificationError::EmptyName);
        }
        if self.notifiers.contains_key(&name) {
            return Err(NotificationError::Duplicate(name));
        }
        self.notifiers.insert(name, notifier);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Notifier>, NotificationError> {
        self.notifiers
            .get(name)
            .cloned()
            .ok_or_else(|| NotificationError::NotRegistered(name.to_string()))
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.notifiers.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.notifiers.keys().cloned().collect()
    }
}
