// src/notification/discord.rs

use std::time::Duration;

use async_trait::async_trait;
use chrono::SecondsFormat;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::notification::{NotificationError, NotificationPayload, Notifier};
use crate::types::NotificationEvent;

const NAME: &str = "discord";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Posts a single embed to a Discord webhook.
pub struct DiscordNotifier {
    client: reqwest::Client,
}

impl DiscordNotifier {
    pub fn new() -> Result<Self, NotificationError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|source| NotificationError::Http {
                transport: NAME.to_string(),
                source,
            })?;
        Ok(Self { client })
    }
}

fn color_for(event: NotificationEvent) -> u32 {
    match event {
        NotificationEvent::Failure => 0xFF0000,
        NotificationEvent::Skip => 0xFFA500,
        NotificationEvent::Complete => 0x00FF00,
    }
}

fn title_for(event: NotificationEvent) -> &'static str {
    match event {
        NotificationEvent::Failure => "❌ Upload Failed",
        NotificationEvent::Skip => "⏭️ Upload Skipped",
        NotificationEvent::Complete => "✅ Upload Complete",
    }
}

fn field_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "n/a".to_string(),
        other => other.to_string(),
    }
}

/// Webhook body for `payload`.
pub fn webhook_body(payload: &NotificationPayload) -> Value {
    let timestamp = payload.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true);

    let mut fields = vec![
        json!({ "name": "Node", "value": payload.node_name, "inline": true }),
        json!({ "name": "Event", "value": payload.event.as_str(), "inline": true }),
        json!({ "name": "Timestamp", "value": timestamp, "inline": false }),
    ];
    fields.extend(
        payload
            .details
            .iter()
            .map(|(key, value)| json!({ "name": key, "value": field_value(value), "inline": true })),
    );

    json!({
        "embeds": [{
            "title": title_for(payload.event),
            "description": payload.message,
            "color": color_for(payload.event),
            "fields": fields,
            "timestamp": timestamp,
        }]
    })
}

#[async_trait]
impl Notifier for DiscordNotifier {
    fn name(&self) -> &str {
        NAME
    }

    async fn send(
        &self,
        cancel: &CancellationToken,
        url: &str,
        payload: &NotificationPayload,
    ) -> Result<(), NotificationError> {
        let request = self.client.post(url).json(&webhook_body(payload)).send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(NotificationError::Cancelled),
            res = request => res.map_err(|source| NotificationError::Http {
                transport: NAME.to_string(),
                source,
            })?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(NotificationError::Status {
                transport: NAME.to_string(),
                status: status.as_u16(),
            });
        }

        debug!(node = %payload.node_name, event = %payload.event, "discord notification delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embed_layout() {
        let payload = NotificationPayload::new(NotificationEvent::Complete, "eth-1", "done")
            .with_detail("upload_id", 12)
            .with_detail("total_chunks", Value::Null);
        let body = webhook_body(&payload);
        let embed = &body["embeds"][0];

        assert_eq!(embed["title"], "✅ Upload Complete");
        assert_eq!(embed["color"], 0x00FF00);
        assert_eq!(embed["description"], "done");

        let fields = embed["fields"].as_array().expect("fields");
        assert_eq!(fields.len(), 5);
        assert_eq!(fields[0]["name"], "Node");
        assert_eq!(fields[0]["value"], "eth-1");
        assert_eq!(fields[1]["value"], "complete");
        assert_eq!(fields[2]["inline"], false);
        assert!(fields.iter().any(|f| f["name"] == "upload_id" && f["value"] == "12"));
        assert!(fields.iter().any(|f| f["name"] == "total_chunks" && f["value"] == "n/a"));
    }

    #[test]
    fn colours_and_titles_per_event() {
        assert_eq!(color_for(NotificationEvent::Failure), 0xFF0000);
        assert_eq!(color_for(NotificationEvent::Skip), 0xFFA500);
        assert_eq!(title_for(NotificationEvent::Skip), "⏭️ Upload Skipped");
        assert_eq!(title_for(NotificationEvent::Failure), "❌ Upload Failed");
    }
}
