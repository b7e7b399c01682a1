// Command correlator: matches an incoming acknowledgment frame to the one
// outstanding command awaiting it.
//
// At most one request may be in flight; a second concurrent command fails
// fast with `Busy` (strict mutual exclusion, not an internal queue). The
// ingestion loop is the only fulfiller, so a matched frame is consumed here
// and never also reaches the fan-out.

use std::sync::mpsc::SyncSender;
use std::sync::{Mutex, MutexGuard};

use crate::error::LinkError;
use crate::fanout::FrameEvent;

struct PendingRequest {
    expected_types: Vec<u8>,
    reply_tx: SyncSender<FrameEvent>,
}

pub(crate) struct Correlator {
    slot: Mutex<Option<PendingRequest>>,
}

impl Correlator {
    pub(crate) fn new() -> Self {
        Correlator {
            slot: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<PendingRequest>> {
        match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register an outstanding request. Fails with `Busy` while another
    /// command is still awaiting its acknowledgment.
    pub(crate) fn begin(
        &self,
        expected_types: &[u8],
        reply_tx: SyncSender<FrameEvent>,
    ) -> Result<(), LinkError> {
        let mut slot = self.lock();
        if slot.is_some() {
            return Err(LinkError::Busy);
        }
        *slot = Some(PendingRequest {
            expected_types: expected_types.to_vec(),
            reply_tx,
        });
        Ok(())
    }

    /// Offer an ingested frame. When its type matches the outstanding
    /// request the request is taken and fulfilled; returns whether the frame
    /// was consumed. A reply whose caller already timed out is dropped.
    pub(crate) fn try_fulfill(&self, event: &FrameEvent) -> bool {
        let mut slot = self.lock();
        let frame_type = event.frame.frame_type();
        let matched = slot
            .as_ref()
            .map_or(false, |pending| pending.expected_types.contains(&frame_type));
        if !matched {
            return false;
        }
        if let Some(pending) = slot.take() {
            let _ = pending.reply_tx.try_send(*event);
        }
        true
    }

    /// Drop any outstanding request. Its caller observes a closed channel
    /// and resolves with `LinkClosed` instead of hanging.
    pub(crate) fn abort(&self) {
        self.lock().take();
    }
}
