//! Error types for the gateway service
//!
//! Expected transport failures (connect refused, read timeout, peer gone) are
//! not errors here — adapters report those as `false`/`None` and log them.
//! `AdapterError` covers contract violations: malformed parameter strings and
//! an unusable device manifest.

use gateway_types::{DeviceId, ParamsError};
use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, AdapterError>;

/// Main error type for gateway operations
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Connection-parameter string failed to parse
    #[error("Invalid connection params for device {device}: {source}")]
    InvalidParams {
        /// The device whose params were malformed
        device: DeviceId,
        #[source]
        source: ParamsError,
    },

    /// Device manifest could not be read or parsed
    #[error("Device manifest error: {0}")]
    Manifest(String),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
