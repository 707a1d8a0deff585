// src/protocol/rpc.rs

//! Minimal HTTP helpers shared by the protocol collectors.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::protocol::MetricsError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<String>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Clone)]
pub struct RpcClient {
    client: reqwest::Client,
}

impl RpcClient {
    pub fn new() -> Result<Self, MetricsError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|source| MetricsError::Http {
                endpoint: "<client>".to_string(),
                source,
            })?;
        Ok(Self { client })
    }

    /// `eth_blockNumber` against a JSON-RPC endpoint.
    pub async fn block_number(&self, cancel: &CancellationToken, url: &str) -> Result<i64, MetricsError> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": "eth_blockNumber",
            "params": [],
            "id": 1,
        });
        let request = self.client.post(url).json(&body);
        let response: RpcResponse = self.fetch_json(cancel, url, request).await?;

        if let Some(err) = response.error {
            return Err(MetricsError::Rpc {
                endpoint: url.to_string(),
                message: format!("{} (code {})", err.message, err.code),
            });
        }
        let result = response.result.ok_or_else(|| MetricsError::Decode {
            endpoint: url.to_string(),
            reason: "response has neither result nor error".to_string(),
        })?;
        parse_hex_quantity(&result).map_err(|reason| MetricsError::Decode {
            endpoint: url.to_string(),
            reason,
        })
    }

    /// GET `url` and decode the JSON body.
    pub async fn get_json(&self, cancel: &CancellationToken, url: &str) -> Result<Value, MetricsError> {
        let request = self.client.get(url);
        self.fetch_json(cancel, url, request).await
    }

    async fn fetch_json<T: serde::de::DeserializeOwned>(
        &self,
        cancel: &CancellationToken,
        url: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, MetricsError> {
        let http_err = |source: reqwest::Error| MetricsError::Http {
            endpoint: url.to_string(),
            source,
        };

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(MetricsError::Cancelled),
            res = request.send() => res.map_err(http_err)?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(MetricsError::Status {
                endpoint: url.to_string(),
                status: status.as_u16(),
            });
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(MetricsError::Cancelled),
            res = response.json::<T>() => res.map_err(http_err),
        }
    }
}

/// Parse a hex quantity such as `"0x1406f40"`; the `0x` prefix is optional.
pub fn parse_hex_quantity(s: &str) -> Result<i64, String> {
    let trimmed = s.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    i64::from_str_radix(digits, 16).map_err(|e| format!("invalid hex quantity '{s}': {e}"))
}

/// Decimal integer that beacon APIs encode as a JSON string.
pub fn parse_decimal_field(value: &Value, pointer: &str) -> Result<i64, String> {
    match value.pointer(pointer) {
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|e| format!("invalid integer at {pointer}: {e}")),
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| format!("integer at {pointer} out of range")),
        Some(other) => Err(format!("unexpected value at {pointer}: {other}")),
        None => Err(format!("missing field {pointer}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_with_and_without_prefix() {
        assert_eq!(parse_hex_quantity("0x1406f40"), Ok(21_000_000));
        assert_eq!(parse_hex_quantity("1406f40"), Ok(21_000_000));
        assert_eq!(parse_hex_quantity("0x0"), Ok(0));
        assert!(parse_hex_quantity("0xzz").is_err());
        assert!(parse_hex_quantity("").is_err());
    }

    #[test]
    fn decimal_fields_from_strings_or_numbers() {
        let body = json!({
            "data": { "header": { "message": { "slot": "9300000" } } },
            "blob_info": { "oldest_blob_slot": 12 }
        });
        assert_eq!(parse_decimal_field(&body, "/data/header/message/slot"), Ok(9_300_000));
        assert_eq!(parse_decimal_field(&body, "/blob_info/oldest_blob_slot"), Ok(12));
        assert!(parse_decimal_field(&body, "/missing").is_err());
    }
}
