// Serial port discovery and opening.
//
// Resolution order: the configured preferred port, then any adapter matching
// the lamp controller's USB signature, then the conventional candidate paths
// (tried whether or not enumeration reported them), then every remaining
// enumerated port. The first candidate that opens wins.

use serde::Serialize;
use serialport::SerialPortType;

use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::link::{OpenPort, PortProvider, SerialStream};

/// USB vendor id of the lamp controller's CH340 serial adapter.
pub const KNOWN_VID: u16 = 0x1A86;
/// USB product id of the lamp controller's CH340 serial adapter.
pub const KNOWN_PID: u16 = 0x7523;

/// One enumerated serial adapter, for UI / diagnostic listings.
#[derive(Debug, Clone, Serialize)]
pub struct PortInfo {
    pub path: String,
    pub port_type: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

/// Enumerate serial adapters present on the system.
pub fn list_ports() -> Result<Vec<PortInfo>, LinkError> {
    let ports = serialport::available_ports().map_err(LinkError::Enumerate)?;

    let mut out = Vec::new();
    for p in ports {
        // On macOS prefer the callout devices; the tty.* entries block on DCD
        #[cfg(target_os = "macos")]
        if !p.port_name.starts_with("/dev/cu.") {
            continue;
        }

        let info = match &p.port_type {
            SerialPortType::UsbPort(usb) => PortInfo {
                path: p.port_name.clone(),
                port_type: "usb".to_string(),
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                manufacturer: usb.manufacturer.clone(),
                product: usb.product.clone(),
            },
            other => PortInfo {
                path: p.port_name.clone(),
                port_type: format!("{:?}", other),
                vid: None,
                pid: None,
                manufacturer: None,
                product: None,
            },
        };
        out.push(info);
    }
    Ok(out)
}

/// Build the ordered, deduplicated list of port paths to try.
///
/// Pure over the enumeration snapshot so the ordering is testable without
/// hardware.
pub(crate) fn candidate_paths(config: &LinkConfig, ports: &[PortInfo]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut push = |path: &str| {
        if !out.iter().any(|p| p == path) {
            out.push(path.to_string());
        }
    };

    if let Some(ref preferred) = config.preferred_port {
        push(preferred);
    }
    for p in ports {
        if p.vid == Some(KNOWN_VID) && p.pid == Some(KNOWN_PID) {
            push(&p.path);
        }
    }
    for path in &config.candidate_ports {
        push(path);
    }
    for p in ports {
        push(&p.path);
    }
    out
}

/// Loosen the device node's permissions when the current mode would refuse
/// us. Best effort: failures are logged and the open is attempted anyway, so
/// a system where the user already belongs to `dialout` is unaffected.
#[cfg(unix)]
fn repair_permissions(path: &str) {
    use std::os::unix::fs::PermissionsExt;

    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(_) => return, // nothing at this path; open() will report it
    };
    let mode = metadata.permissions().mode();
    if mode & 0o666 == 0o666 {
        return;
    }
    tlog!(
        "[ports] {} mode {:o} may refuse access, widening to rw-rw-rw-",
        path,
        mode & 0o777
    );
    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o666)) {
        tlog!("[ports] Could not change permissions on {}: {}", path, e);
    }
}

#[cfg(not(unix))]
fn repair_permissions(_path: &str) {}

/// Open a single port at the configured baud rate. The read timeout doubles
/// as the ingestion loop's poll interval.
fn open_port(path: &str, config: &LinkConfig) -> Result<OpenPort, LinkError> {
    repair_permissions(path);

    let port = serialport::new(path, config.baud_rate)
        .timeout(config.poll_interval())
        .open()
        .map_err(|e| LinkError::Connect {
            port: path.to_string(),
            source: e,
        })?;

    let stream: Box<dyn SerialStream> = Box::new(port);
    Ok(OpenPort {
        path: path.to_string(),
        stream,
    })
}

/// Resolve a port and open it, walking the candidate order until one opens.
pub(crate) fn resolve_and_open(config: &LinkConfig) -> Result<OpenPort, LinkError> {
    let ports = match list_ports() {
        Ok(ports) => ports,
        Err(e) => {
            // Enumeration failure still leaves explicit paths worth trying
            tlog!("[ports] Enumeration failed: {}", e);
            Vec::new()
        }
    };

    for path in candidate_paths(config, &ports) {
        match open_port(&path, config) {
            Ok(open) => return Ok(open),
            Err(e) => tlog!("[ports] {}", e),
        }
    }
    Err(LinkError::NotFound)
}

/// The production `PortProvider`: system enumeration plus real opens.
pub struct SystemPorts;

impl PortProvider for SystemPorts {
    fn connect(&self, config: &LinkConfig) -> Result<OpenPort, LinkError> {
        resolve_and_open(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usb(path: &str, vid: u16, pid: u16) -> PortInfo {
        PortInfo {
            path: path.to_string(),
            port_type: "usb".to_string(),
            vid: Some(vid),
            pid: Some(pid),
            manufacturer: None,
            product: None,
        }
    }

    fn plain(path: &str) -> PortInfo {
        PortInfo {
            path: path.to_string(),
            port_type: "unknown".to_string(),
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
        }
    }

    #[test]
    fn test_candidates_prefer_configured_port() {
        let mut config = LinkConfig::default();
        config.preferred_port = Some("/dev/ttyACM7".to_string());
        let ports = vec![usb("/dev/ttyUSB1", KNOWN_VID, KNOWN_PID)];

        let paths = candidate_paths(&config, &ports);
        assert_eq!(
            paths,
            vec![
                "/dev/ttyACM7",
                "/dev/ttyUSB1",
                "/dev/ttyUSB0",
                "/dev/ttyACM0",
                "/dev/ttyACM1"
            ]
        );
    }

    #[test]
    fn test_candidates_signature_match_before_conventional_paths() {
        let config = LinkConfig::default();
        let ports = vec![
            plain("/dev/ttyS0"),
            usb("/dev/ttyUSB3", KNOWN_VID, KNOWN_PID),
            usb("/dev/ttyUSB4", 0x0403, 0x6001), // some other adapter
        ];

        let paths = candidate_paths(&config, &ports);
        assert_eq!(
            paths,
            vec![
                "/dev/ttyUSB3",
                "/dev/ttyUSB0",
                "/dev/ttyUSB1",
                "/dev/ttyACM0",
                "/dev/ttyACM1",
                "/dev/ttyS0",
                "/dev/ttyUSB4"
            ]
        );
    }

    #[test]
    fn test_candidates_deduplicate() {
        let mut config = LinkConfig::default();
        config.preferred_port = Some("/dev/ttyUSB0".to_string());
        let ports = vec![usb("/dev/ttyUSB0", KNOWN_VID, KNOWN_PID)];

        let paths = candidate_paths(&config, &ports);
        assert_eq!(
            paths,
            vec!["/dev/ttyUSB0", "/dev/ttyUSB1", "/dev/ttyACM0", "/dev/ttyACM1"]
        );
    }

    #[test]
    fn test_candidates_include_unenumerated_conventional_paths() {
        // A device node can exist without enumeration reporting it; every
        // configured conventional path must still be tried.
        let config = LinkConfig::default();
        let paths = candidate_paths(&config, &[]);
        assert_eq!(
            paths,
            vec!["/dev/ttyUSB0", "/dev/ttyUSB1", "/dev/ttyACM0", "/dev/ttyACM1"]
        );
    }

    #[test]
    fn test_candidates_honor_configured_list() {
        let config = LinkConfig {
            candidate_ports: vec!["/dev/ttyAMA0".to_string()],
            ..Default::default()
        };
        let paths = candidate_paths(&config, &[plain("/dev/ttyS1")]);
        assert_eq!(paths, vec!["/dev/ttyAMA0", "/dev/ttyS1"]);
    }

    #[test]
    fn test_repair_permissions_tolerates_missing_path() {
        // Must never panic or error for a path that does not exist
        repair_permissions("/dev/definitely-not-a-port-xyz");
    }
}
