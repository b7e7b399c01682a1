// Error taxonomy for the serial link subsystem.
//
// Nothing in this crate is fatal to the host process: every failure is
// surfaced as a value and the link keeps reporting its state until recovery.

use thiserror::Error;

/// Frame decode failures. Always recoverable — the ingestion loop drops the
/// offending bytes and continues.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    /// Buffer length is not 32 bytes or a sentinel byte mismatches.
    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),
    /// The type byte has no registered payload layout.
    #[error("unknown frame type 0x{0:02X}")]
    UnknownType(u8),
}

/// Errors surfaced by the link, the port resolver and the command path.
#[derive(Debug, Error)]
pub enum LinkError {
    /// No serial adapter could be resolved and opened.
    #[error("no usable serial port found")]
    NotFound,

    /// Serial adapter enumeration itself failed.
    #[error("failed to enumerate serial ports: {0}")]
    Enumerate(serialport::Error),

    /// A specific port failed to open.
    #[error("failed to open {port}: {source}")]
    Connect {
        port: String,
        #[source]
        source: serialport::Error,
    },

    /// A write to the link failed. The link is forced into `Lost` state.
    #[error("serial write failed: {0}")]
    Send(std::io::Error),

    /// The link is not open.
    #[error("serial link is not open")]
    NotOpen,

    /// No acknowledgment arrived before the deadline.
    #[error("no response within {0:?}")]
    Timeout(std::time::Duration),

    /// Another command is already awaiting its acknowledgment.
    /// The correlator enforces strict mutual exclusion rather than queueing.
    #[error("another command is already in flight")]
    Busy,

    /// The link was closed while a command was awaiting its acknowledgment.
    #[error("link closed while awaiting response")]
    LinkClosed,

    /// The reconnect budget is exhausted; sends are refused and automatic
    /// reconnection has stopped until `force_reconnect` resets it.
    #[error("reconnect budget exhausted; manual reconnect required")]
    GaveUp,
}
