//! Outbound delivery to the downstream system.

pub mod forwarder;

pub use forwarder::{ForwardOutcome, Forwarder};
