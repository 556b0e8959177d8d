//! ASTM-style control-character framing (BG800 family).
//!
//! These analyzers drive a low-level handshake: ENQ opens a session, each
//! record frame ends with ETX, a two-character checksum and CR and expects an
//! ACK back, and EOT closes the transmission. Some firmware revisions skip
//! the session envelope and send a single checksummed frame, which then
//! stands alone as a complete message.

use super::{ends_with_record_terminator, CompletionStrategy};
use gateway_types::{CompletionVerdict, RawMessage};

pub const ENQ: u8 = 0x05;
pub const ACK: u8 = 0x06;
pub const ETX: u8 = 0x03;
pub const EOT: u8 = 0x04;

/// Completeness strategy for ASTM-style analyzers.
#[derive(Debug)]
pub struct AstmStrategy {
    models: Vec<String>,
}

impl AstmStrategy {
    pub fn new() -> Self {
        Self {
            models: vec!["BG800".to_string()],
        }
    }

    /// Register an additional model handled by this strategy.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.models.push(model.into());
        self
    }
}

impl Default for AstmStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionStrategy for AstmStrategy {
    fn supports(&self, model: &str) -> bool {
        self.models.iter().any(|m| m.eq_ignore_ascii_case(model))
    }

    fn priority(&self) -> i32 {
        1
    }

    fn check(&self, message: &RawMessage) -> CompletionVerdict {
        let content = message.raw_content.as_bytes();

        // Bare ENQ: session opening, answer ACK and wait for frames.
        if content == [ENQ] {
            return CompletionVerdict::IncompleteWithResponse(vec![ACK]);
        }

        // Leading ENQ marks a full session transmission: ACK each completed
        // frame, the message is whole only once EOT arrives.
        if content.first() == Some(&ENQ) {
            if content.last() == Some(&EOT) {
                return CompletionVerdict::Complete;
            }
            if ends_with_checksum_frame(content) {
                return CompletionVerdict::IncompleteWithResponse(vec![ACK]);
            }
            return CompletionVerdict::Incomplete;
        }

        // Sessionless transmission: one checksummed frame is the message.
        if ends_with_checksum_frame(content) {
            return CompletionVerdict::Complete;
        }

        if ends_with_record_terminator(content) {
            return CompletionVerdict::Complete;
        }

        CompletionVerdict::Incomplete
    }

    fn description(&self) -> &str {
        "ASTM control-character framing (ENQ/ACK/EOT, checksummed frames)"
    }
}

/// Whether the buffer ends with `ETX <hex> <hex> CR`.
fn ends_with_checksum_frame(content: &[u8]) -> bool {
    if content.len() < 4 {
        return false;
    }
    let tail = &content[content.len() - 4..];
    tail[0] == ETX
        && tail[1].is_ascii_hexdigit()
        && tail[2].is_ascii_hexdigit()
        && tail[3] == b'\r'
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_types::{DeviceId, MessageId};

    fn msg(content: &str) -> RawMessage {
        RawMessage::new(MessageId::from("m"), DeviceId::from("d"), "BG800", content)
    }

    #[test]
    fn bare_enq_is_acked() {
        let s = AstmStrategy::new();
        assert_eq!(
            s.check(&msg("\u{5}")),
            CompletionVerdict::IncompleteWithResponse(vec![ACK])
        );
    }

    #[test]
    fn session_frames_are_acked_and_eot_completes() {
        let s = AstmStrategy::new();
        // ENQ + one full frame: ACK, keep buffering.
        assert_eq!(
            s.check(&msg("\u{5}1H|\\^&|\u{3}4A\r")),
            CompletionVerdict::IncompleteWithResponse(vec![ACK])
        );
        // Frame cut mid-checksum: just wait.
        assert_eq!(s.check(&msg("\u{5}1H|\\^&|\u{3}4")), CompletionVerdict::Incomplete);
        // EOT closes the session.
        assert_eq!(
            s.check(&msg("\u{5}1H|\\^&|\u{3}4A\r\u{4}")),
            CompletionVerdict::Complete
        );
    }

    #[test]
    fn sessionless_checksum_frame_completes() {
        let s = AstmStrategy::new();
        assert_eq!(s.check(&msg("MSH|field\u{3}FF\n")), CompletionVerdict::Incomplete);
        assert_eq!(s.check(&msg("MSH|field\u{3}3A\r")), CompletionVerdict::Complete);
    }

    #[test]
    fn falls_through_to_generic_end_of_record() {
        let s = AstmStrategy::new();
        assert_eq!(s.check(&msg("MSH|plain|\r")), CompletionVerdict::Complete);
        assert_eq!(s.check(&msg("MSH|plain|")), CompletionVerdict::Incomplete);
    }

    #[test]
    fn supports_only_registered_models() {
        let s = AstmStrategy::new().with_model("BG900");
        assert!(s.supports("BG800"));
        assert!(s.supports("bg800"));
        assert!(s.supports("BG900"));
        assert!(!s.supports("GENERIC"));
    }
}
