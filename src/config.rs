// Link configuration.
//
// Everything the subsystem tunes is supplied here; collaborators construct a
// `LinkConfig` (or load one from JSON) and hand it to `LampLink::open`.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LinkConfig {
    /// Port to try first. When `None`, discovery starts with the USB
    /// signature match.
    #[serde(default)]
    pub preferred_port: Option<String>,
    /// Conventional device paths tried when no adapter matches the known
    /// USB signature. Covers nodes that exist without showing up in
    /// enumeration.
    #[serde(default = "default_candidate_ports")]
    pub candidate_ports: Vec<String>,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Health monitor tick period, seconds.
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,
    /// Automatic reconnect attempts before the monitor gives up.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Fan-out queue capacity per consumer.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Ingestion loop read timeout, milliseconds. Bounds how long a closed
    /// link can go unnoticed by blocked callers.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Default deadline for command acknowledgments, milliseconds.
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

fn default_candidate_ports() -> Vec<String> {
    ["/dev/ttyUSB0", "/dev/ttyUSB1", "/dev/ttyACM0", "/dev/ttyACM1"]
        .iter()
        .map(|p| p.to_string())
        .collect()
}
fn default_baud_rate() -> u32 {
    115200
}
fn default_monitor_interval_secs() -> u64 {
    5
}
fn default_max_reconnect_attempts() -> u32 {
    5
}
fn default_queue_capacity() -> usize {
    100
}
fn default_poll_interval_ms() -> u64 {
    20
}
fn default_command_timeout_ms() -> u64 {
    1000
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            preferred_port: None,
            candidate_ports: default_candidate_ports(),
            baud_rate: default_baud_rate(),
            monitor_interval_secs: default_monitor_interval_secs(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            queue_capacity: default_queue_capacity(),
            poll_interval_ms: default_poll_interval_ms(),
            command_timeout_ms: default_command_timeout_ms(),
        }
    }
}

impl LinkConfig {
    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn from_file(path: &Path) -> Result<LinkConfig, String> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
        serde_json::from_str(&raw).map_err(|e| format!("Failed to parse {}: {}", path.display(), e))
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}
