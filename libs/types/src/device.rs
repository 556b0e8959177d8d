//! Device identity and connection state.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque device identifier.
///
/// Issued by the configuration source; the gateway treats it as an opaque
/// cache/registry key and never interprets its contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transport family a device speaks over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionKind {
    /// TCP, client or listener mode (mode is part of the parameter string)
    Network,
    /// Serial line (RS-232 style instrument port)
    Serial,
    /// Watched directory of dropped files
    File,
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionKind::Network => write!(f, "NETWORK"),
            ConnectionKind::Serial => write!(f, "SERIAL"),
            ConnectionKind::File => write!(f, "FILE"),
        }
    }
}

/// Committed connection state of a device.
///
/// Only the connection state verifier and explicit adapter lifecycle calls
/// mutate this; raw single-sample readings never reach it directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionState {
    Connected,
    Disconnected,
    Error,
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Disconnected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connected => write!(f, "CONNECTED"),
            ConnectionState::Disconnected => write!(f, "DISCONNECTED"),
            ConnectionState::Error => write!(f, "ERROR"),
        }
    }
}

/// A configured instrument endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// Unique identity, stable across reconnects
    pub id: DeviceId,
    /// Human-readable display name
    pub name: String,
    /// Model string, keys the completion-strategy registry
    pub model: String,
    /// Instrument manufacturer, informational only
    #[serde(default)]
    pub manufacturer: Option<String>,
    /// Transport family
    pub connection_type: ConnectionKind,
    /// Colon-delimited transport parameters, see [`crate::params`]
    pub connection_params: String,
    /// Committed live state
    #[serde(default)]
    pub status: ConnectionState,
    /// Free-form description
    #[serde(default)]
    pub description: Option<String>,
    /// Message type tag stamped onto messages from this device (e.g. "HL7")
    #[serde(default)]
    pub message_type: Option<String>,
}

impl Device {
    /// Whether the device runs in network listener (server) mode.
    ///
    /// Listener-mode devices get asymmetric state-verification rules and
    /// special disconnect handling in the adapter cache.
    pub fn is_network_server(&self) -> bool {
        if self.connection_type != ConnectionKind::Network {
            return false;
        }
        let parts: Vec<&str> = self.connection_params.split(':').collect();
        // host:port:protocol:SERVER or port:protocol:SERVER
        parts.get(3).is_some_and(|m| m.eq_ignore_ascii_case("SERVER"))
            || parts.get(2).is_some_and(|m| m.eq_ignore_ascii_case("SERVER"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(kind: ConnectionKind, params: &str) -> Device {
        Device {
            id: DeviceId::from("dev-1"),
            name: "Analyzer".to_string(),
            model: "BG800".to_string(),
            manufacturer: None,
            connection_type: kind,
            connection_params: params.to_string(),
            status: ConnectionState::default(),
            description: None,
            message_type: None,
        }
    }

    #[test]
    fn server_mode_detected_from_short_and_long_forms() {
        assert!(device(ConnectionKind::Network, "5100:TCP:SERVER").is_network_server());
        assert!(device(ConnectionKind::Network, "0.0.0.0:5100:TCP:SERVER").is_network_server());
        assert!(!device(ConnectionKind::Network, "10.0.0.5:5100:TCP:CLIENT").is_network_server());
        assert!(!device(ConnectionKind::Serial, "COM1:9600:8:1:0").is_network_server());
    }

    #[test]
    fn default_state_is_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }
}
