//! Raw inbound messages and framing verdicts.

use crate::device::DeviceId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Generated message identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Processing status of a raw message.
///
/// `Processed` is terminal; `Error` is terminal once the retry registry
/// exhausts or expires the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageStatus {
    /// Freshly framed, not yet picked up by the batch processor
    New,
    /// Parser reported the payload needs more data
    Incomplete,
    /// Being parsed/forwarded
    Processing,
    /// Parsed and delivered downstream
    Processed,
    /// Parse or delivery failure, error_message carries the reason
    Error,
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageStatus::New => "NEW",
            MessageStatus::Incomplete => "INCOMPLETE",
            MessageStatus::Processing => "PROCESSING",
            MessageStatus::Processed => "PROCESSED",
            MessageStatus::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// One framed protocol message received from a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMessage {
    pub id: MessageId,
    pub device_id: DeviceId,
    pub device_model: String,
    /// Full framed content, control bytes included
    pub raw_content: String,
    pub received_at: DateTime<Utc>,
    pub status: MessageStatus,
    /// Parser output once processed
    #[serde(default)]
    pub process_result: Option<serde_json::Value>,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Type tag inherited from the device config (e.g. "HL7")
    #[serde(default)]
    pub message_type: Option<String>,
}

impl RawMessage {
    pub fn new(
        id: MessageId,
        device_id: DeviceId,
        device_model: impl Into<String>,
        raw_content: impl Into<String>,
    ) -> Self {
        Self {
            id,
            device_id,
            device_model: device_model.into(),
            raw_content: raw_content.into(),
            received_at: Utc::now(),
            status: MessageStatus::New,
            process_result: None,
            error_message: None,
            message_type: None,
        }
    }

    /// Mark the message failed with a reason.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.status = MessageStatus::Error;
        self.error_message = Some(reason.into());
    }
}

/// Result of a completeness check over an adapter's accumulated buffer.
///
/// Never persisted; purely a call result handed from a strategy back to the
/// frame buffer engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionVerdict {
    /// Buffer holds exactly one finished message: emit and clear
    Complete,
    /// Need more bytes, keep accumulating
    Incomplete,
    /// Need more bytes, but write these bytes back to the transport first
    /// (mid-stream ACK for ASTM-style low-level handshakes)
    IncompleteWithResponse(Vec<u8>),
}
