// lamplink — serial link subsystem for the smart desk lamp.
//
// Talks the lamp microcontroller's 32-byte sentinel-framed binary protocol
// over USB serial: frame codec, port discovery with permission repair, a
// health-monitored link with bounded automatic reconnection, a single-reader
// ingestion loop, command/acknowledgment correlation and bounded fan-out
// queues for frame consumers.

#[macro_use]
mod logging;

pub mod config;
mod correlator;
pub mod error;
pub mod fanout;
pub mod frame;
mod ingest;
pub mod lamp;
pub mod link;
mod monitor;
pub mod ports;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::LinkConfig;
pub use error::{DecodeError, LinkError};
pub use fanout::{now_us, FrameEvent, Subscription};
pub use frame::{ControlFlags, Detection, Frame, Telemetry, Tracking};
pub use lamp::LampLink;
pub use link::LinkState;
pub use logging::{init_file_logging, stop_file_logging};
pub use ports::{list_ports, PortInfo};
