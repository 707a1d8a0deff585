// src/protocol/mod.rs

//! Blockchain metric collection.
//!
//! Each [`ProtocolModule`] turns a node's endpoints into a small JSON map
//! that is stored as the upload's `protocol_data`. Modules are looked up by
//! protocol name (or alias) in a [`ProtocolRegistry`].

pub mod arbitrum;
pub mod ethereum;
pub mod rpc;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::NodeSpec;
use crate::upload::record::ProtocolData;

pub use arbitrum::ArbitrumModule;
pub use ethereum::EthereumModule;

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("protocol '{0}' is not registered")]
    NotRegistered(String),

    #[error("protocol '{0}' is already registered")]
    Duplicate(String),

    #[error("protocol module name or alias cannot be empty")]
    EmptyName,

    #[error("request to {endpoint} failed: {source}")]
    Http {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} returned status {status}")]
    Status { endpoint: String, status: u16 },

    #[error("RPC error from {endpoint}: {message}")]
    Rpc { endpoint: String, message: String },

    #[error("unexpected response from {endpoint}: {reason}")]
    Decode { endpoint: String, reason: String },

    #[error("metric collection cancelled")]
    Cancelled,
}

#[async_trait]
pub trait ProtocolModule: Send + Sync {
    fn name(&self) -> &str;

    /// Extra protocol names that resolve to this module.
    fn aliases(&self) -> &[&'static str] {
        &[]
    }

    async fn collect_metrics(
        &self,
        cancel: &CancellationToken,
        node: &NodeSpec,
    ) -> Result<ProtocolData, MetricsError>;
}

#[derive(Default, Clone)]
pub struct ProtocolRegistry {
    modules: BTreeMap<String, Arc<dyn ProtocolModule>>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in Ethereum and Arbitrum collectors.
    pub fn with_defaults() -> Result<Self, MetricsError> {
        let mut registry = Self::new();
        registry.register(Arc::new(EthereumModule::new()?))?;
        registry.register(Arc::new(ArbitrumModule::new()?))?;
        Ok(registry)
    }

    /// Register `module` under its name and every alias.
    ///
    /// Nothing is inserted unless all names are free.
    pub fn register(&mut self, module: Arc<dyn ProtocolModule>) -> Result<(), MetricsError> {
        let mut names = vec![module.name().to_string()];
        names.extend(module.aliases().iter().map(|a| a.to_string()));

        for (i, name) in names.iter().enumerate() {
            if name.is_empty() {
                return Err(MetricsError::EmptyName);
            }
            if names[..i].contains(name) || self.modules.contains_key(name) {
                return Err(MetricsError::Duplicate(name.clone()));
            }
        }

        for name in names {
            self.modules.insert(name, module.clone());
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ProtocolModule>, MetricsError> {
        self.modules
            .get(name)
            .cloned()
            .ok_or_else(|| MetricsError::NotRegistered(name.to_string()))
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Every registered name, aliases included, sorted.
    pub fn names(&self) -> Vec<String> {
        self.modules.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        name: &'static str,
        aliases: &'static [&'static str],
    }

    #[async_trait]
    impl ProtocolModule for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn aliases(&self) -> &[&'static str] {
            self.aliases
        }

        async fn collect_metrics(
            &self,
            _cancel: &CancellationToken,
            _node: &NodeSpec,
        ) -> Result<ProtocolData, MetricsError> {
            Ok(ProtocolData::new())
        }
    }

    #[test]
    fn aliases_resolve_to_same_module() {
        let registry = ProtocolRegistry::with_defaults().expect("defaults");
        assert!(registry.is_registered("ethereum"));
        assert!(registry.is_registered("arbitrum"));
        assert!(registry.is_registered("arbitrum-one"));
        let a = registry.get("arbitrum").expect("arbitrum");
        let b = registry.get("arbitrum-one").expect("alias");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn conflicting_registration_is_atomic() {
        let mut registry = ProtocolRegistry::new();
        registry
            .register(Arc::new(Fixed { name: "solana", aliases: &[] }))
            .expect("first");

        let err = registry
            .register(Arc::new(Fixed { name: "near", aliases: &["solana"] }))
            .unwrap_err();
        assert!(matches!(err, MetricsError::Duplicate(ref n) if n == "solana"));
        assert!(!registry.is_registered("near"));

        assert!(matches!(
            registry.register(Arc::new(Fixed { name: "x", aliases: &[""] })),
            Err(MetricsError::EmptyName)
        ));
        assert!(matches!(
            registry.register(Arc::new(Fixed { name: "y", aliases: &["y"] })),
            Err(MetricsError::Duplicate(_))
        ));
    }
}
