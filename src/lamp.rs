// Public handle to the lamp's serial link.
//
// `LampLink::open` wires everything together: an immediate connect attempt,
// the health monitor thread and the ingestion thread. The handle is the only
// public surface; collaborators send frames and drain the fan-out through it.

use std::sync::mpsc::{sync_channel, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::fanout::{FrameEvent, Subscription};
use crate::frame::{
    encode_control, encode_detection, encode_tracking, ControlFlags, Detection, TYPE_CONTROL_ACK,
};
use crate::link::{LinkShared, LinkState, PortProvider};
use crate::ports::SystemPorts;
use crate::{ingest, monitor};

pub struct LampLink {
    shared: Arc<LinkShared>,
    monitor: Option<JoinHandle<()>>,
    ingest: Option<JoinHandle<()>>,
}

impl LampLink {
    /// Open the link against real system serial ports.
    pub fn open(config: LinkConfig) -> LampLink {
        LampLink::with_provider(config, Box::new(SystemPorts))
    }

    /// Open the link against a custom port provider. The initial connect is
    /// attempted synchronously; on failure the link still comes up and the
    /// health monitor keeps trying in the background.
    pub fn with_provider(config: LinkConfig, provider: Box<dyn PortProvider>) -> LampLink {
        let shared = Arc::new(LinkShared::new(config, provider));

        monitor::tick(&shared);
        if shared.state() != LinkState::Connected {
            tlog!("[lamp] Device not reachable yet; reconnecting in background");
        }

        let monitor = monitor::spawn_monitor(shared.clone());
        let ingest = ingest::spawn_ingest(shared.clone());
        LampLink {
            shared,
            monitor: Some(monitor),
            ingest: Some(ingest),
        }
    }

    /// Whether a port handle is currently open. Local state only; the device
    /// may already be gone without this reporting it yet.
    pub fn is_connected(&self) -> bool {
        self.shared.is_open()
    }

    pub fn state(&self) -> LinkState {
        self.shared.state()
    }

    /// Send a control command and wait for the device's mirroring
    /// acknowledgment, with the configured default deadline.
    pub fn send_command(&self, flags: ControlFlags) -> Result<FrameEvent, LinkError> {
        self.send_command_timeout(flags, self.shared.config.command_timeout())
    }

    /// Send a control command and wait up to `timeout` for the acknowledgment.
    ///
    /// At most one command may be in flight; a concurrent call fails fast
    /// with `Busy`. The pending request is registered before the write so an
    /// acknowledgment arriving immediately cannot be missed.
    pub fn send_command_timeout(
        &self,
        flags: ControlFlags,
        timeout: Duration,
    ) -> Result<FrameEvent, LinkError> {
        let bytes = encode_control(&flags);
        let (tx, rx) = sync_channel(1);
        self.shared.correlator.begin(&[TYPE_CONTROL_ACK], tx)?;

        if let Err(e) = self.shared.write_frame(&bytes) {
            self.shared.correlator.abort();
            return Err(e);
        }

        match rx.recv_timeout(timeout) {
            Ok(event) => Ok(event),
            Err(RecvTimeoutError::Timeout) => {
                // Free the slot; a late acknowledgment is consumed and dropped
                self.shared.correlator.abort();
                Err(LinkError::Timeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(LinkError::LinkClosed),
        }
    }

    /// Send a tracking frame. Angles are taken in degrees, as the vision
    /// pipeline produces them, and converted to radians for the wire.
    pub fn send_tracking(
        &self,
        found: bool,
        yaw_degrees: f32,
        pitch_degrees: f32,
    ) -> Result<(), LinkError> {
        self.shared.write_frame(&encode_tracking(
            found,
            yaw_degrees.to_radians(),
            pitch_degrees.to_radians(),
        ))
    }

    /// Send raw detection coordinates (fire and forget).
    pub fn send_detection(&self, detection: &Detection) -> Result<(), LinkError> {
        self.shared.write_frame(&encode_detection(detection))
    }

    /// Next frame from the primary fan-out queue, oldest first, or `None`
    /// after `timeout`.
    pub fn read_next_frame(&self, timeout: Duration) -> Option<FrameEvent> {
        self.shared.fanout.pop_primary(timeout)
    }

    /// Register an independent consumer queue. Each subscriber sees every
    /// unclaimed frame; dropping the subscription unregisters it.
    pub fn subscribe(&self) -> Subscription {
        self.shared.fanout.subscribe()
    }

    /// Register the per-frame ingestion callback (for persistence). Runs on
    /// the ingestion thread; replaces any previous callback.
    pub fn on_frame<F>(&self, callback: F)
    where
        F: Fn(&FrameEvent) + Send + Sync + 'static,
    {
        self.shared.fanout.set_callback(Some(Box::new(callback)));
    }

    /// Drop the current handle (if any), reset the reconnect budget and make
    /// one immediate resolve+open attempt. Restarts a link that gave up.
    pub fn force_reconnect(&self) -> Result<(), LinkError> {
        self.shared.force_reconnect()
    }

    /// Shut the link down and join the worker threads. Called by `Drop`;
    /// explicit calls are idempotent.
    pub fn close(&mut self) {
        self.shared.close();
        if let Some(handle) = self.monitor.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.ingest.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for LampLink {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// Tests
// ============================================================================
