//! Instrument gateway service.
//!
//! Connects heterogeneous medical-instrument endpoints (TCP client/listener,
//! serial lines, watched file drops), reassembles byte streams into discrete
//! messages via pluggable per-model framing strategies, verifies connection
//! state despite flaky transports, and pushes completed messages through a
//! bounded, retrying delivery pipeline.
//!
//! Data flow: adapter bytes → [`framing::FrameEngine`] → [`framing::StrategyRegistry`]
//! verdict → [`queue::MessageQueue`] → [`processor::BatchProcessor`] → parse →
//! forward; forward failures land in the [`retry::RetryRegistry`] and are
//! periodically re-enqueued. The [`verifier::ConnectionStateVerifier`] polls
//! adapters and emits confirmed state changes consumed by the
//! [`adapter::AdapterCache`].

pub mod adapter;
pub mod config;
pub mod error;
pub mod framing;
pub mod intake;
pub mod manifest;
pub mod output;
pub mod parser;
pub mod processor;
pub mod queue;
pub mod retry;
pub mod verifier;

pub use adapter::{AdapterCache, DeviceAdapter};
pub use config::GatewayConfig;
pub use error::{AdapterError, Result};
pub use framing::{CompletionStrategy, FrameEngine, StrategyRegistry};
pub use output::Forwarder;
pub use parser::MessageParser;
pub use processor::BatchProcessor;
pub use queue::MessageQueue;
pub use retry::RetryRegistry;
pub use verifier::{ConnectionStateVerifier, StateChangeEvent};
