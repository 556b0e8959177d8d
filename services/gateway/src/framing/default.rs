//! Fallback completeness strategy.

use super::{ends_with_record_terminator, CompletionStrategy};
use gateway_types::{CompletionVerdict, RawMessage};

/// Generic end-of-record detection for instruments without a dedicated
/// strategy: the message is complete once the buffer ends with CR, CRLF, or
/// the MLLP-style FS+CR trailer.
///
/// Registered as the guaranteed fallback: `supports` is always true and the
/// priority is the lowest possible precedence.
#[derive(Debug, Default)]
pub struct DefaultStrategy;

impl CompletionStrategy for DefaultStrategy {
    fn supports(&self, _model: &str) -> bool {
        true
    }

    fn priority(&self) -> i32 {
        i32::MAX
    }

    fn check(&self, message: &RawMessage) -> CompletionVerdict {
        if ends_with_record_terminator(message.raw_content.as_bytes()) {
            CompletionVerdict::Complete
        } else {
            CompletionVerdict::Incomplete
        }
    }

    fn description(&self) -> &str {
        "generic end-of-record (CR / CRLF / FS+CR)"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_types::{DeviceId, MessageId};

    fn msg(content: &str) -> RawMessage {
        RawMessage::new(MessageId::from("m"), DeviceId::from("d"), "GENERIC", content)
    }

    #[test]
    fn cr_terminated_segment_is_complete() {
        let s = DefaultStrategy;
        assert_eq!(s.check(&msg("MSH|^~\\&|LAB|\r")), CompletionVerdict::Complete);
    }

    #[test]
    fn crlf_and_mllp_trailers_are_complete() {
        let s = DefaultStrategy;
        assert_eq!(s.check(&msg("MSH|A|\r\n")), CompletionVerdict::Complete);
        assert_eq!(s.check(&msg("MSH|A|\x1c\r")), CompletionVerdict::Complete);
    }

    #[test]
    fn unterminated_content_is_incomplete() {
        let s = DefaultStrategy;
        assert_eq!(s.check(&msg("MSH|A|")), CompletionVerdict::Incomplete);
    }

    #[test]
    fn supports_everything_at_lowest_precedence() {
        let s = DefaultStrategy;
        assert!(s.supports("ANY-MODEL"));
        assert_eq!(s.priority(), i32::MAX);
    }
}
