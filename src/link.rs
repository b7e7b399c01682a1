// Link ownership and lifecycle.
//
// `LinkShared` owns the open byte-stream handle and the `LinkState` machine.
// All mutations of the handle and state (open, close, loss, reconnect) are
// serialized behind one mutex; the health monitor, the ingestion loop and
// caller threads all go through it. The ingestion loop is the only component
// that reads bytes from the stream.

use serde::Serialize;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::config::LinkConfig;
use crate::correlator::Correlator;
use crate::error::LinkError;
use crate::fanout::Fanout;
use crate::frame::FRAME_LEN;

// ============================================================================
// Stream and provider seams
// ============================================================================

/// Byte stream to the device. `serialport` handles qualify via the blanket
/// impl; tests substitute in-memory streams.
pub trait SerialStream: std::io::Read + std::io::Write + Send {}

impl<T: std::io::Read + std::io::Write + Send> SerialStream for T {}

/// A successfully opened port.
pub struct OpenPort {
    pub path: String,
    pub stream: Box<dyn SerialStream>,
}

/// Resolves and opens a device port. `ports::SystemPorts` is the real
/// implementation; the health monitor and `force_reconnect` go through this
/// seam so reconnection is testable without hardware.
pub trait PortProvider: Send + Sync {
    fn connect(&self, config: &LinkConfig) -> Result<OpenPort, LinkError>;
}

// ============================================================================
// Link state
// ============================================================================

/// Link lifecycle. `GaveUp` is terminal until a manual reconnect resets the
/// budget; everything else is driven by the health monitor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Unresolved,
    Connecting,
    Connected,
    Lost,
    Reconnecting,
    GaveUp,
}

pub(crate) struct LinkInner {
    pub(crate) stream: Option<Box<dyn SerialStream>>,
    pub(crate) port: Option<String>,
    pub(crate) state: LinkState,
    /// Reconnect budget: automatic attempts since the last successful
    /// connect. Reset on success and by `force_reconnect`.
    pub(crate) attempts: u32,
    /// Whether the give-up diagnostic has been emitted for the current
    /// exhaustion; prevents a log line per tick.
    pub(crate) gave_up_announced: bool,
}

// ============================================================================
// Shared link
// ============================================================================

pub(crate) struct LinkShared {
    pub(crate) config: LinkConfig,
    pub(crate) provider: Box<dyn PortProvider>,
    inner: Mutex<LinkInner>,
    pub(crate) correlator: Correlator,
    pub(crate) fanout: Fanout,
    pub(crate) shutdown: AtomicBool,
}

impl LinkShared {
    pub(crate) fn new(config: LinkConfig, provider: Box<dyn PortProvider>) -> Self {
        let fanout = Fanout::new(config.queue_capacity);
        LinkShared {
            config,
            provider,
            inner: Mutex::new(LinkInner {
                stream: None,
                port: None,
                state: LinkState::Unresolved,
                attempts: 0,
                gave_up_announced: false,
            }),
            correlator: Correlator::new(),
            fanout,
            shutdown: AtomicBool::new(false),
        }
    }

    pub(crate) fn locked(&self) -> MutexGuard<'_, LinkInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Local handle state only; remote liveness is inferred by the health
    /// monitor and command timeouts.
    pub(crate) fn is_open(&self) -> bool {
        self.locked().stream.is_some()
    }

    pub(crate) fn state(&self) -> LinkState {
        self.locked().state
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Install an opened port, marking the link connected and resetting the
    /// reconnect budget.
    pub(crate) fn install(inner: &mut LinkInner, open: OpenPort) {
        tlog!("[link] Connected to {}", open.path);
        inner.port = Some(open.path);
        inner.stream = Some(open.stream);
        inner.state = LinkState::Connected;
        inner.attempts = 0;
        inner.gave_up_announced = false;
    }

    /// Drop the handle and mark the link lost. Any outstanding command
    /// resolves as `LinkClosed` instead of hanging; the health monitor picks
    /// the loss up on its next tick.
    pub(crate) fn mark_lost(&self, reason: &str) {
        {
            let mut inner = self.locked();
            if inner.stream.take().is_some() || inner.state == LinkState::Connected {
                tlog!("[link] Lost {} ({})", inner.port.as_deref().unwrap_or("?"), reason);
                inner.state = LinkState::Lost;
            }
        }
        self.correlator.abort();
    }

    /// Write one wire frame. A failed write forces the link into `Lost`
    /// immediately so the monitor acts without waiting for its next tick.
    /// With the reconnect budget exhausted the refusal says so, pointing the
    /// caller at `force_reconnect` rather than a wait that cannot end.
    pub(crate) fn write_frame(&self, bytes: &[u8; FRAME_LEN]) -> Result<(), LinkError> {
        let result = {
            let mut inner = self.locked();
            let gave_up = inner.state == LinkState::GaveUp;
            let stream = match inner.stream.as_mut() {
                Some(stream) => stream,
                None if gave_up => return Err(LinkError::GaveUp),
                None => return Err(LinkError::NotOpen),
            };
            stream.write_all(bytes).and_then(|_| stream.flush())
        };
        if let Err(e) = result {
            let kind = e.kind();
            self.mark_lost(&format!("write failed: {}", kind));
            return Err(LinkError::Send(e));
        }
        Ok(())
    }

    /// Close the handle, reset the budget, and perform exactly one
    /// synchronous resolve+open attempt. Resets a `GaveUp` link back into the
    /// monitor's care whether or not the attempt succeeds.
    pub(crate) fn force_reconnect(&self) -> Result<(), LinkError> {
        self.correlator.abort();
        let mut inner = self.locked();
        inner.stream = None;
        inner.attempts = 0;
        inner.gave_up_announced = false;
        inner.state = LinkState::Connecting;
        tlog!("[link] Manual reconnect requested");
        match self.provider.connect(&self.config) {
            Ok(open) => {
                Self::install(&mut inner, open);
                Ok(())
            }
            Err(e) => {
                tlog!("[link] Manual reconnect failed: {}", e);
                inner.state = LinkState::Unresolved;
                Err(e)
            }
        }
    }

    /// Idempotent close. Pending reads observe the missing handle within one
    /// poll interval; an outstanding command resolves as `LinkClosed`.
    pub(crate) fn close(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        {
            let mut inner = self.locked();
            if inner.stream.take().is_some() {
                tlog!("[link] Closed {}", inner.port.as_deref().unwrap_or("?"));
            }
            inner.state = LinkState::Unresolved;
        }
        self.correlator.abort();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{encode_control, ControlFlags, TYPE_CONTROL_ACK};
    use crate::testutil::{MockProvider, MockWire};
    use std::sync::mpsc::{sync_channel, RecvTimeoutError};
    use std::time::Duration;

    fn shared_with(provider: MockProvider) -> LinkShared {
        LinkShared::new(LinkConfig::default(), Box::new(provider))
    }

    #[test]
    fn test_write_frame_on_closed_link_is_not_open() {
        let shared = shared_with(MockProvider::failing());
        let bytes = encode_control(&ControlFlags::default());
        assert!(matches!(shared.write_frame(&bytes), Err(LinkError::NotOpen)));
        // State untouched by a refused write
        assert_eq!(shared.state(), LinkState::Unresolved);
    }

    #[test]
    fn test_write_after_give_up_reports_exhaustion() {
        let shared = shared_with(MockProvider::failing());
        {
            let mut inner = shared.locked();
            inner.state = LinkState::GaveUp;
            inner.gave_up_announced = true;
        }

        let bytes = encode_control(&ControlFlags::default());
        assert!(matches!(shared.write_frame(&bytes), Err(LinkError::GaveUp)));
    }

    #[test]
    fn test_write_failure_forces_lost_and_aborts_pending() {
        let wire = MockWire::new();
        wire.fail_writes(true);
        let shared = shared_with(MockProvider::with_wires(vec![wire]));
        shared.force_reconnect().unwrap();
        assert!(shared.is_open());

        let (tx, rx) = sync_channel(1);
        shared.correlator.begin(&[TYPE_CONTROL_ACK], tx).unwrap();

        let bytes = encode_control(&ControlFlags::default());
        assert!(matches!(shared.write_frame(&bytes), Err(LinkError::Send(_))));
        assert_eq!(shared.state(), LinkState::Lost);
        assert!(!shared.is_open());
        assert!(matches!(
            rx.recv_timeout(Duration::from_millis(100)),
            Err(RecvTimeoutError::Disconnected)
        ));
    }

    #[test]
    fn test_force_reconnect_success_resets_budget() {
        let wire = MockWire::new();
        let provider = MockProvider::with_wires(vec![wire]);
        let shared = shared_with(provider);
        {
            let mut inner = shared.locked();
            inner.attempts = 4;
            inner.state = LinkState::GaveUp;
            inner.gave_up_announced = true;
        }

        shared.force_reconnect().unwrap();
        let inner = shared.locked();
        assert_eq!(inner.state, LinkState::Connected);
        assert_eq!(inner.attempts, 0);
        assert!(!inner.gave_up_announced);
    }

    #[test]
    fn test_force_reconnect_failure_returns_link_to_monitor() {
        let shared = shared_with(MockProvider::failing());
        {
            let mut inner = shared.locked();
            inner.state = LinkState::GaveUp;
            inner.attempts = 9;
        }

        assert!(shared.force_reconnect().is_err());
        let inner = shared.locked();
        // Budget reset; the monitor resumes automatic attempts
        assert_eq!(inner.attempts, 0);
        assert_eq!(inner.state, LinkState::Unresolved);
    }

    #[test]
    fn test_close_is_idempotent() {
        let wire = MockWire::new();
        let shared = shared_with(MockProvider::with_wires(vec![wire]));
        shared.force_reconnect().unwrap();

        shared.close();
        assert!(!shared.is_open());
        shared.close();
        assert!(!shared.is_open());
        assert!(shared.is_shutdown());
    }
}
