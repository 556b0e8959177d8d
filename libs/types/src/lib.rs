//! Shared domain types for the instrument gateway.
//!
//! Everything the adapter service, verifier, queue, and retry registry agree
//! on lives here: device identity and connection state, raw inbound messages
//! and their processing status, framing verdicts, and connection-parameter
//! grammars for the supported transports.

pub mod device;
pub mod ident;
pub mod message;
pub mod params;

pub use device::{ConnectionKind, ConnectionState, Device, DeviceId};
pub use ident::MessageIdGenerator;
pub use message::{CompletionVerdict, MessageId, MessageStatus, RawMessage};
pub use params::{
    ConnectionParams, FileParams, NetworkClientParams, NetworkListenerParams, Parity,
    ParamsError, SerialParams,
};
