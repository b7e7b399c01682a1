// Link health monitor.
//
// A dedicated thread ticks every `monitor_interval`: while the handle is
// open it does nothing; when the handle is gone it spends one reconnect
// attempt per tick until the budget is exhausted, then parks in `GaveUp`
// until `force_reconnect` resets it.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::link::{LinkShared, LinkState};

/// One monitor tick. Separated from the thread loop so tests can drive the
/// state machine deterministically.
pub(crate) fn tick(shared: &LinkShared) {
    let mut inner = shared.locked();

    if inner.stream.is_some() {
        if inner.attempts > 0 {
            inner.attempts = 0;
        }
        return;
    }

    if inner.state == LinkState::GaveUp {
        return;
    }

    if inner.attempts >= shared.config.max_reconnect_attempts {
        inner.state = LinkState::GaveUp;
        if !inner.gave_up_announced {
            inner.gave_up_announced = true;
            tlog!(
                "[monitor] Gave up after {} reconnect attempts; call force_reconnect to retry",
                inner.attempts
            );
        }
        return;
    }

    inner.attempts += 1;
    inner.state = match inner.state {
        LinkState::Unresolved | LinkState::Connecting => LinkState::Connecting,
        _ => LinkState::Reconnecting,
    };
    let attempt = inner.attempts;

    // Connect under the lock: writers briefly block during an open attempt,
    // which keeps handle installation atomic with the state change.
    match shared.provider.connect(&shared.config) {
        Ok(open) => LinkShared::install(&mut inner, open),
        Err(e) => {
            tlog!(
                "[monitor] Connect attempt {}/{} failed: {}",
                attempt,
                shared.config.max_reconnect_attempts,
                e
            );
        }
    }
}

/// Spawn the monitor thread. Runs until the link shuts down.
pub(crate) fn spawn_monitor(shared: Arc<LinkShared>) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("lamplink-monitor".to_string())
        .spawn(move || {
            tlog!("[monitor] Health monitor started");
            while !shared.is_shutdown() {
                tick(&shared);

                // Sleep in short slices so close() is honored promptly
                let interval = shared.config.monitor_interval();
                let mut slept = Duration::ZERO;
                while slept < interval && !shared.is_shutdown() {
                    let slice = Duration::from_millis(100).min(interval - slept);
                    std::thread::sleep(slice);
                    slept += slice;
                }
            }
            tlog!("[monitor] Health monitor stopped");
        })
        .expect("failed to spawn monitor thread")
}
