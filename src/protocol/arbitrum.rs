// src/protocol/arbitrum.rs

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::NodeSpec;
use crate::protocol::ethereum::value_or_null;
use crate::protocol::rpc::RpcClient;
use crate::protocol::{MetricsError, ProtocolModule};
use crate::upload::record::ProtocolData;

/// Arbitrum nodes only report the L2 block height.
pub struct ArbitrumModule {
    rpc: RpcClient,
}

impl ArbitrumModule {
    pub fn new() -> Result<Self, MetricsError> {
        Ok(Self {
            rpc: RpcClient::new()?,
        })
    }
}

#[async_trait]
impl ProtocolModule for ArbitrumModule {
    fn name(&self) -> &str {
        "arbitrum"
    }

    fn aliases(&self) -> &[&'static str] {
        &["arbitrum-one"]
    }

    async fn collect_metrics(
        &self,
        cancel: &CancellationToken,
        node: &NodeSpec,
    ) -> Result<ProtocolData, MetricsError> {
        let block = self.rpc.block_number(cancel, &node.url).await;

        let mut data = ProtocolData::new();
        data.insert("latest_block".into(), value_or_null(&node.name, "latest_block", block)?);
        Ok(data)
    }
}
