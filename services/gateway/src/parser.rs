//! Parser capability boundary.
//!
//! Message parsing (full HL7 grammar and friends) lives outside this service.
//! The gateway treats the parser as an opaque function and only inspects the
//! `error`, `errorMessage`, and `INCOMPLETE` marker keys in its output.

use async_trait::async_trait;
use gateway_types::RawMessage;
use serde_json::Value;

pub const KEY_ERROR: &str = "error";
pub const KEY_ERROR_MESSAGE: &str = "errorMessage";
pub const MARKER_INCOMPLETE: &str = "INCOMPLETE";

/// Opaque parsing capability supplied by the embedding application.
#[async_trait]
pub trait MessageParser: Send + Sync {
    /// Parse raw content into a field map, or `{error, errorMessage}` /
    /// `{INCOMPLETE: true}` marker objects.
    async fn parse(&self, message: &RawMessage) -> Value;
}

/// How the gateway interprets a parser result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseDisposition {
    /// Usable field map, forward it
    Parsed,
    /// Payload needs more data; not an error, not forwarded
    Incomplete,
    /// Parse failed; shares the forward-failure retry path
    Failed,
}

/// Classify a parser result by its marker keys.
pub fn classify(result: &Value) -> ParseDisposition {
    if result
        .get(MARKER_INCOMPLETE)
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        return ParseDisposition::Incomplete;
    }
    if result.get(KEY_ERROR).is_some() || result.get(KEY_ERROR_MESSAGE).is_some() {
        return ParseDisposition::Failed;
    }
    ParseDisposition::Parsed
}

/// Error text from a failed parse result.
pub fn error_text(result: &Value) -> String {
    result
        .get(KEY_ERROR_MESSAGE)
        .or_else(|| result.get(KEY_ERROR))
        .and_then(Value::as_str)
        .unwrap_or("parse error")
        .to_string()
}

/// Pass-through parser: wraps the raw content unparsed. Used when the
/// embedding application supplies no parser of its own.
#[derive(Debug, Default)]
pub struct PassthroughParser;

#[async_trait]
impl MessageParser for PassthroughParser {
    async fn parse(&self, message: &RawMessage) -> Value {
        serde_json::json!({ "raw": message.raw_content })
    }
}
