//! Message framing: completeness strategies and the frame buffer engine.
//!
//! Instruments stream bytes without any transport-level message boundary, so
//! each adapter accumulates bytes in a buffer and asks a per-model strategy
//! whether the buffer now holds a complete message. Strategies also drive
//! low-level handshakes (ENQ/ACK) by returning response bytes to write back.

pub mod astm;
pub mod default;
pub mod engine;
pub mod registry;

pub use astm::AstmStrategy;
pub use default::DefaultStrategy;
pub use engine::{FrameEngine, FrameStats};
pub use registry::StrategyRegistry;

use gateway_types::{CompletionVerdict, RawMessage};

/// Decides whether an accumulated buffer holds a complete message.
///
/// Implementations are stateless; all accumulation state lives in the
/// [`engine::FrameEngine`]. `check` sees the full buffered content wrapped in
/// a provisional [`RawMessage`].
pub trait CompletionStrategy: Send + Sync {
    /// Whether this strategy handles the given device model.
    fn supports(&self, model: &str) -> bool;

    /// Precedence, lower wins. The fallback sits at `i32::MAX`.
    fn priority(&self) -> i32;

    /// Judge the buffered content.
    fn check(&self, message: &RawMessage) -> CompletionVerdict;

    /// Short human-readable label, logged when the registry is built.
    fn description(&self) -> &str;
}

/// End-of-record detection shared by the default and ASTM strategies:
/// CR, CRLF, or the MLLP-style FS+CR trailer.
pub(crate) fn ends_with_record_terminator(content: &[u8]) -> bool {
    content.ends_with(b"\r") || content.ends_with(b"\r\n") || content.ends_with(b"\x1c\r")
}
