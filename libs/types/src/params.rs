//! Connection-parameter string grammars.
//!
//! Device configuration carries transport parameters as a colon-delimited
//! string whose shape depends on the connection kind:
//!
//! - network client:   `host:port:protocol:CLIENT[:longConnection]`
//! - network listener: `port:protocol:SERVER`
//! - serial:           `portName:baudRate:dataBits:stopBits:parityCode`
//! - file:             `directory:globPattern:charset:deleteAfterProcess`
//!
//! Parsing happens once, when an adapter is built for a device; a malformed
//! string is a configuration error, not a runtime transport failure.

use crate::device::ConnectionKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParamsError {
    #[error("empty connection parameter string")]
    Empty,

    #[error("expected {expected} colon-delimited fields, got {actual} in {raw:?}")]
    FieldCount {
        expected: &'static str,
        actual: usize,
        raw: String,
    },

    #[error("invalid {field} value {value:?}: {reason}")]
    InvalidField {
        field: &'static str,
        value: String,
        reason: String,
    },
}

/// Parameters for an outbound TCP connection to an instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkClientParams {
    pub host: String,
    pub port: u16,
    /// Wire protocol tag, e.g. "TCP". Informational, the adapter only
    /// implements TCP.
    pub protocol: String,
    /// Keep the socket open across messages instead of reconnecting per send.
    pub long_connection: bool,
}

/// Parameters for a listening socket instruments dial into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkListenerParams {
    pub port: u16,
    pub protocol: String,
}

/// Serial parity, numeric codes as carried in device config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    None,
    Odd,
    Even,
    Mark,
    Space,
}

impl Parity {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Parity::None),
            1 => Some(Parity::Odd),
            2 => Some(Parity::Even),
            3 => Some(Parity::Mark),
            4 => Some(Parity::Space),
            _ => None,
        }
    }
}

/// Parameters for a serial-port instrument line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialParams {
    pub port_name: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
}

/// Parameters for a watched drop directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileParams {
    pub directory: String,
    /// Glob matched against file names within the directory.
    pub pattern: String,
    /// Text encoding of dropped files, e.g. "UTF-8".
    pub charset: String,
    pub delete_after_process: bool,
}

/// Parsed transport parameters for one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionParams {
    NetworkClient(NetworkClientParams),
    NetworkListener(NetworkListenerParams),
    Serial(SerialParams),
    File(FileParams),
}

impl ConnectionParams {
    /// Parse a raw parameter string according to the device's connection kind.
    pub fn parse(kind: ConnectionKind, raw: &str) -> Result<Self, ParamsError> {
        if raw.trim().is_empty() {
            return Err(ParamsError::Empty);
        }
        match kind {
            ConnectionKind::Network => parse_network(raw),
            ConnectionKind::Serial => parse_serial(raw),
            ConnectionKind::File => parse_file(raw),
        }
    }
}

fn parse_network(raw: &str) -> Result<ConnectionParams, ParamsError> {
    let parts: Vec<&str> = raw.split(':').collect();
    // Listener form: port:protocol:SERVER
    if parts.len() == 3 && parts[2].eq_ignore_ascii_case("SERVER") {
        return Ok(ConnectionParams::NetworkListener(NetworkListenerParams {
            port: parse_port(parts[0])?,
            protocol: parts[1].to_string(),
        }));
    }
    // Client form: host:port:protocol:CLIENT[:longConnection]
    if parts.len() == 4 || parts.len() == 5 {
        let mode = parts[3];
        if mode.eq_ignore_ascii_case("SERVER") {
            // host:port:protocol:SERVER — host is accepted but unused when
            // binding; treat as listener.
            return Ok(ConnectionParams::NetworkListener(NetworkListenerParams {
                port: parse_port(parts[1])?,
                protocol: parts[2].to_string(),
            }));
        }
        if !mode.eq_ignore_ascii_case("CLIENT") {
            return Err(ParamsError::InvalidField {
                field: "mode",
                value: mode.to_string(),
                reason: "expected CLIENT or SERVER".to_string(),
            });
        }
        let long_connection = match parts.get(4) {
            None => false,
            Some(v) => parse_bool("longConnection", v)?,
        };
        return Ok(ConnectionParams::NetworkClient(NetworkClientParams {
            host: parts[0].to_string(),
            port: parse_port(parts[1])?,
            protocol: parts[2].to_string(),
            long_connection,
        }));
    }
    Err(ParamsError::FieldCount {
        expected: "3 (listener) or 4-5 (client)",
        actual: parts.len(),
        raw: raw.to_string(),
    })
}

fn parse_serial(raw: &str) -> Result<ConnectionParams, ParamsError> {
    let parts: Vec<&str> = raw.split(':').collect();
    if parts.len() != 5 {
        return Err(ParamsError::FieldCount {
            expected: "5",
            actual: parts.len(),
            raw: raw.to_string(),
        });
    }
    let baud_rate = parts[1].parse::<u32>().map_err(|e| ParamsError::InvalidField {
        field: "baudRate",
        value: parts[1].to_string(),
        reason: e.to_string(),
    })?;
    let data_bits = parts[2].parse::<u8>().map_err(|e| ParamsError::InvalidField {
        field: "dataBits",
        value: parts[2].to_string(),
        reason: e.to_string(),
    })?;
    let stop_bits = parts[3].parse::<u8>().map_err(|e| ParamsError::InvalidField {
        field: "stopBits",
        value: parts[3].to_string(),
        reason: e.to_string(),
    })?;
    let parity_code = parts[4].parse::<u8>().map_err(|e| ParamsError::InvalidField {
        field: "parityCode",
        value: parts[4].to_string(),
        reason: e.to_string(),
    })?;
    let parity = Parity::from_code(parity_code).ok_or_else(|| ParamsError::InvalidField {
        field: "parityCode",
        value: parts[4].to_string(),
        reason: "expected 0..=4".to_string(),
    })?;
    Ok(ConnectionParams::Serial(SerialParams {
        port_name: parts[0].to_string(),
        baud_rate,
        data_bits,
        stop_bits,
        parity,
    }))
}

fn parse_file(raw: &str) -> Result<ConnectionParams, ParamsError> {
    let parts: Vec<&str> = raw.split(':').collect();
    if parts.len() != 4 {
        return Err(ParamsError::FieldCount {
            expected: "4",
            actual: parts.len(),
            raw: raw.to_string(),
        });
    }
    Ok(ConnectionParams::File(FileParams {
        directory: parts[0].to_string(),
        pattern: parts[1].to_string(),
        charset: parts[2].to_string(),
        delete_after_process: parse_bool("deleteAfterProcess", parts[3])?,
    }))
}

fn parse_port(s: &str) -> Result<u16, ParamsError> {
    s.parse::<u16>().map_err(|e| ParamsError::InvalidField {
        field: "port",
        value: s.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(field: &'static str, s: &str) -> Result<bool, ParamsError> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ParamsError::InvalidField {
            field,
            value: s.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_client_with_and_without_long_connection() {
        let p = ConnectionParams::parse(ConnectionKind::Network, "10.0.0.5:5100:TCP:CLIENT")
            .expect("parse");
        match p {
            ConnectionParams::NetworkClient(c) => {
                assert_eq!(c.host, "10.0.0.5");
                assert_eq!(c.port, 5100);
                assert!(!c.long_connection);
            }
            other => panic!("unexpected variant: {other:?}"),
        }

        let p = ConnectionParams::parse(ConnectionKind::Network, "analyzer.lab:5100:TCP:CLIENT:true")
            .expect("parse");
        match p {
            ConnectionParams::NetworkClient(c) => assert!(c.long_connection),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn network_listener_short_form() {
        let p = ConnectionParams::parse(ConnectionKind::Network, "5100:TCP:SERVER").expect("parse");
        assert_eq!(
            p,
            ConnectionParams::NetworkListener(NetworkListenerParams {
                port: 5100,
                protocol: "TCP".to_string(),
            })
        );
    }

    #[test]
    fn network_listener_long_form_with_host() {
        let p = ConnectionParams::parse(ConnectionKind::Network, "0.0.0.0:5100:TCP:SERVER")
            .expect("parse");
        assert!(matches!(p, ConnectionParams::NetworkListener(l) if l.port == 5100));
    }

    #[test]
    fn serial_full_grammar() {
        let p = ConnectionParams::parse(ConnectionKind::Serial, "COM3:9600:8:1:2").expect("parse");
        assert_eq!(
            p,
            ConnectionParams::Serial(SerialParams {
                port_name: "COM3".to_string(),
                baud_rate: 9600,
                data_bits: 8,
                stop_bits: 1,
                parity: Parity::Even,
            })
        );
    }

    #[test]
    fn serial_rejects_unknown_parity_code() {
        let err = ConnectionParams::parse(ConnectionKind::Serial, "COM3:9600:8:1:9").unwrap_err();
        assert!(matches!(err, ParamsError::InvalidField { field: "parityCode", .. }));
    }

    #[test]
    fn file_grammar() {
        let p = ConnectionParams::parse(ConnectionKind::File, "/data/inbox:*.hl7:UTF-8:true")
            .expect("parse");
        assert_eq!(
            p,
            ConnectionParams::File(FileParams {
                directory: "/data/inbox".to_string(),
                pattern: "*.hl7".to_string(),
                charset: "UTF-8".to_string(),
                delete_after_process: true,
            })
        );
    }

    #[test]
    fn empty_string_is_rejected() {
        assert!(matches!(
            ConnectionParams::parse(ConnectionKind::Network, "  "),
            Err(ParamsError::Empty)
        ));
    }

    #[test]
    fn wrong_field_count_is_reported() {
        let err = ConnectionParams::parse(ConnectionKind::File, "/data/inbox:*.hl7").unwrap_err();
        assert!(matches!(err, ParamsError::FieldCount { actual: 2, .. }));
    }
}
