//! TOML device manifest.
//!
//! ```toml
//! [[devices]]
//! id = "bg800-lab2"
//! name = "Blood gas analyzer, lab 2"
//! model = "BG800"
//! connection_type = "NETWORK"
//! connection_params = "10.0.12.40:5100:TCP:CLIENT:true"
//! message_type = "HL7"
//! ```

use crate::error::{AdapterError, Result};
use gateway_types::{ConnectionParams, Device};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    devices: Vec<Device>,
}

/// Load and validate the device manifest.
///
/// Ids must be unique and every parameter string must parse for its
/// connection kind; a bad manifest is refused whole.
pub fn load_devices(path: impl AsRef<Path>) -> Result<Vec<Device>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .map_err(|err| AdapterError::Manifest(format!("cannot read {}: {err}", path.display())))?;
    let manifest: Manifest = toml::from_str(&raw)
        .map_err(|err| AdapterError::Manifest(format!("cannot parse {}: {err}", path.display())))?;

    let mut seen = HashSet::new();
    for device in &manifest.devices {
        if !seen.insert(device.id.clone()) {
            return Err(AdapterError::Manifest(format!(
                "duplicate device id {}",
                device.id
            )));
        }
        ConnectionParams::parse(device.connection_type, &device.connection_params).map_err(
            |source| AdapterError::InvalidParams {
                device: device.id.clone(),
                source,
            },
        )?;
    }
    info!(path = %path.display(), devices = manifest.devices.len(), "device manifest loaded");
    Ok(manifest.devices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_types::ConnectionKind;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_manifest(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_valid_manifest() {
        let file = write_manifest(
            r#"
            [[devices]]
            id = "bg800-lab2"
            name = "Blood gas analyzer"
            model = "BG800"
            connection_type = "NETWORK"
            connection_params = "10.0.12.40:5100:TCP:CLIENT:true"
            message_type = "HL7"

            [[devices]]
            id = "exporter-1"
            name = "Result exporter"
            model = "GENERIC"
            connection_type = "FILE"
            connection_params = "/data/inbox:*.hl7:UTF-8:true"
            "#,
        );
        let devices = load_devices(file.path()).unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].model, "BG800");
        assert_eq!(devices[1].connection_type, ConnectionKind::File);
    }

    #[test]
    fn rejects_duplicate_ids() {
        let file = write_manifest(
            r#"
            [[devices]]
            id = "d1"
            name = "A"
            model = "GENERIC"
            connection_type = "NETWORK"
            connection_params = "10.0.0.1:5100:TCP:CLIENT"

            [[devices]]
            id = "d1"
            name = "B"
            model = "GENERIC"
            connection_type = "NETWORK"
            connection_params = "10.0.0.2:5100:TCP:CLIENT"
            "#,
        );
        assert!(matches!(
            load_devices(file.path()),
            Err(AdapterError::Manifest(_))
        ));
    }

    #[test]
    fn rejects_malformed_params() {
        let file = write_manifest(
            r#"
            [[devices]]
            id = "d1"
            name = "A"
            model = "GENERIC"
            connection_type = "SERIAL"
            connection_params = "COM1:not-a-baud:8:1:0"
            "#,
        );
        assert!(matches!(
            load_devices(file.path()),
            Err(AdapterError::InvalidParams { .. })
        ));
    }

    #[test]
    fn missing_file_is_a_manifest_error() {
        assert!(matches!(
            load_devices("/nonexistent/devices.toml"),
            Err(AdapterError::Manifest(_))
        ));
    }
}
