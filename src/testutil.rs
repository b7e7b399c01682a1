// In-memory serial device doubles for tests.
//
// `MockWire` is the scriptable device side: tests push bytes it will "send",
// inspect what the host wrote, and can make writes fail or auto-acknowledge
// control frames. `MockStream` is the host-side handle implementing
// Read + Write with the same timeout semantics a real serial handle has.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::frame::{decode, encode_control_ack, Frame, FRAME_LEN};
use crate::link::{OpenPort, PortProvider};

pub(crate) struct MockWire {
    rx: Mutex<VecDeque<u8>>,
    rx_available: Condvar,
    writes: Mutex<Vec<u8>>,
    fail_writes: AtomicBool,
    auto_ack: AtomicBool,
    closed: AtomicBool,
}

impl MockWire {
    pub(crate) fn new() -> Arc<MockWire> {
        Arc::new(MockWire {
            rx: Mutex::new(VecDeque::new()),
            rx_available: Condvar::new(),
            writes: Mutex::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
            auto_ack: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// Queue bytes for the host to read.
    pub(crate) fn push_bytes(&self, bytes: &[u8]) {
        self.rx.lock().unwrap().extend(bytes.iter().copied());
        self.rx_available.notify_all();
    }

    /// Queue one encoded frame for the host to read.
    pub(crate) fn push_frame(&self, frame: &Frame) {
        self.push_bytes(&frame.encode());
    }

    /// Everything the host has written so far.
    pub(crate) fn take_writes(&self) -> Vec<u8> {
        std::mem::take(&mut *self.writes.lock().unwrap())
    }

    pub(crate) fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Reply to every well-formed control frame with a mirroring ack.
    pub(crate) fn auto_ack(&self, enabled: bool) {
        self.auto_ack.store(enabled, Ordering::SeqCst);
    }

    /// Simulate the device side going away: reads return end-of-file.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.rx_available.notify_all();
    }
}

pub(crate) struct MockStream {
    wire: Arc<MockWire>,
    read_timeout: Duration,
}

impl MockStream {
    pub(crate) fn new(wire: Arc<MockWire>) -> MockStream {
        MockStream {
            wire,
            read_timeout: Duration::from_millis(20),
        }
    }
}

impl Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut rx = self.wire.rx.lock().unwrap();
        if rx.is_empty() && !self.wire.closed.load(Ordering::SeqCst) {
            let (guard, _) = self
                .wire
                .rx_available
                .wait_timeout(rx, self.read_timeout)
                .unwrap();
            rx = guard;
        }
        if rx.is_empty() {
            if self.wire.closed.load(Ordering::SeqCst) {
                return Ok(0);
            }
            return Err(std::io::Error::new(ErrorKind::TimedOut, "read timed out"));
        }
        let n = buf.len().min(rx.len());
        for b in buf.iter_mut().take(n) {
            *b = rx.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl Write for MockStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.wire.fail_writes.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(ErrorKind::BrokenPipe, "wire broken"));
        }
        self.wire.writes.lock().unwrap().extend_from_slice(buf);

        if self.wire.auto_ack.load(Ordering::SeqCst) && buf.len() == FRAME_LEN {
            if let Ok(Frame::Control(flags)) = decode(buf) {
                self.wire.push_bytes(&encode_control_ack(&flags));
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Scripted `PortProvider`: each `connect` pops the next outcome. `Some(wire)`
/// opens a `MockStream` on that wire, `None` (or an empty script) fails with
/// `NotFound`.
pub(crate) struct MockProvider {
    connects: Arc<AtomicUsize>,
    outcomes: Mutex<VecDeque<Option<Arc<MockWire>>>>,
}

impl MockProvider {
    pub(crate) fn failing() -> MockProvider {
        MockProvider {
            connects: Arc::new(AtomicUsize::new(0)),
            outcomes: Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) fn with_wires(wires: Vec<Arc<MockWire>>) -> MockProvider {
        MockProvider::with_outcomes(wires.into_iter().map(Some).collect())
    }

    pub(crate) fn with_outcomes(outcomes: Vec<Option<Arc<MockWire>>>) -> MockProvider {
        MockProvider {
            connects: Arc::new(AtomicUsize::new(0)),
            outcomes: Mutex::new(outcomes.into()),
        }
    }

    /// Shared connect-attempt counter for assertions.
    pub(crate) fn connect_counter(&self) -> Arc<AtomicUsize> {
        self.connects.clone()
    }
}

impl PortProvider for MockProvider {
    fn connect(&self, _config: &LinkConfig) -> Result<OpenPort, LinkError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match self.outcomes.lock().unwrap().pop_front() {
            Some(Some(wire)) => Ok(OpenPort {
                path: "mock0".to_string(),
                stream: Box::new(MockStream::new(wire)),
            }),
            _ => Err(LinkError::NotFound),
        }
    }
}
