//! HTTP forwarder for processed messages.

use crate::config::ForwardConfig;
use gateway_types::RawMessage;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

/// Result of one forward attempt. Success is judged purely by the HTTP
/// status class; the response body is never inspected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardOutcome {
    Delivered,
    Failed(String),
}

impl ForwardOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, ForwardOutcome::Delivered)
    }
}

/// Thin POST client delivering one payload per processed message.
pub struct Forwarder {
    client: reqwest::Client,
    config: ForwardConfig,
}

impl Forwarder {
    pub fn new(config: ForwardConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_default();
        Self { client, config }
    }

    /// Wire payload for one message.
    pub fn payload(message: &RawMessage) -> serde_json::Value {
        json!({
            "messageId": message.id,
            "deviceId": message.device_id,
            "deviceModel": message.device_model,
            "content": message.raw_content,
            "processResult": message.process_result,
            "type": message.message_type,
        })
    }

    pub async fn forward(&self, message: &RawMessage) -> ForwardOutcome {
        let payload = Self::payload(message);
        match self
            .client
            .post(&self.config.server_address)
            .json(&payload)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                debug!(message = %message.id, "message forwarded");
                ForwardOutcome::Delivered
            }
            Ok(response) => {
                let reason = format!("server returned {}", response.status());
                warn!(message = %message.id, %reason, "forward rejected");
                ForwardOutcome::Failed(reason)
            }
            Err(err) => {
                let reason = format!("request failed: {err}");
                warn!(message = %message.id, %reason, "forward failed");
                ForwardOutcome::Failed(reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_types::{DeviceId, MessageId};

    #[test]
    fn payload_carries_the_contract_keys() {
        let mut msg = RawMessage::new(
            MessageId::from("m1"),
            DeviceId::from("d1"),
            "BG800",
            "OBX|1|\r",
        );
        msg.process_result = Some(serde_json::json!({"OBX": "1"}));
        msg.message_type = Some("HL7".to_string());

        let payload = Forwarder::payload(&msg);
        assert_eq!(payload["messageId"], "m1");
        assert_eq!(payload["deviceId"], "d1");
        assert_eq!(payload["deviceModel"], "BG800");
        assert_eq!(payload["content"], "OBX|1|\r");
        assert_eq!(payload["processResult"]["OBX"], "1");
        assert_eq!(payload["type"], "HL7");
    }
}
