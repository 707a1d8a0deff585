// src/protocol/ethereum.rs

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::NodeSpec;
use crate::protocol::rpc::{RpcClient, parse_decimal_field};
use crate::protocol::{MetricsError, ProtocolModule};
use crate::upload::record::ProtocolData;

/// Execution block height plus beacon head slot and earliest retained blob.
///
/// A failing query yields `null` for its key; the collection as a whole only
/// fails when cancelled.
pub struct EthereumModule {
    rpc: RpcClient,
}

impl EthereumModule {
    pub fn new() -> Result<Self, MetricsError> {
        Ok(Self {
            rpc: RpcClient::new()?,
        })
    }

    async fn latest_slot(&self, cancel: &CancellationToken, beacon: &str) -> Result<i64, MetricsError> {
        let url = format!("{beacon}/eth/v1/beacon/headers/head");
        let body = self.rpc.get_json(cancel, &url).await?;
        parse_decimal_field(&body, "/data/header/message/slot")
            .map_err(|reason| MetricsError::Decode { endpoint: url, reason })
    }

    async fn earliest_blob(&self, cancel: &CancellationToken, beacon: &str) -> Result<i64, MetricsError> {
        let url = format!("{beacon}/eth/v1/beacon/blob_sidecars/finalized");
        let body = self.rpc.get_json(cancel, &url).await?;
        parse_decimal_field(&body, "/blob_info/oldest_blob_slot")
            .map_err(|reason| MetricsError::Decode { endpoint: url, reason })
    }
}

/// Beacon API base: explicit `beacon_url`, else `{url}/beacon`.
pub fn beacon_base(node: &NodeSpec) -> String {
    match &node.beacon_url {
        Some(url) => url.trim_end_matches('/').to_string(),
        None => format!("{}/beacon", node.url.trim_end_matches('/')),
    }
}

pub(crate) fn value_or_null(
    node: &str,
    key: &str,
    res: Result<i64, MetricsError>,
) -> Result<Value, MetricsError> {
    match res {
        Ok(v) => Ok(Value::from(v)),
        Err(MetricsError::Cancelled) => Err(MetricsError::Cancelled),
        Err(err) => {
            debug!(node, metric = key, error = %err, "metric query failed");
            Ok(Value::Null)
        }
    }
}

#[async_trait]
impl ProtocolModule for EthereumModule {
    fn name(&self) -> &str {
        "ethereum"
    }

    async fn collect_metrics(
        &self,
        cancel: &CancellationToken,
        node: &NodeSpec,
    ) -> Result<ProtocolData, MetricsError> {
        let beacon = beacon_base(node);

        let (block, slot, blob) = tokio::join!(
            self.rpc.block_number(cancel, &node.url),
            self.latest_slot(cancel, &beacon),
            self.earliest_blob(cancel, &beacon),
        );

        let mut data = ProtocolData::new();
        data.insert("latest_block".into(), value_or_null(&node.name, "latest_block", block)?);
        data.insert("latest_slot".into(), value_or_null(&node.name, "latest_slot", slot)?);
        data.insert("earliest_blob".into(), value_or_null(&node.name, "earliest_blob", blob)?);
        Ok(data)
    }
}
