// Fan-out delivery of ingested frames.
//
// Every decoded frame not claimed by the command correlator is published
// here: once to the primary queue (`read_next_frame`), once to each live
// subscriber queue, and once to the registered ingestion callback (the
// persistence hook). Queues are bounded and evict their oldest entry when
// full, so a slow consumer can never block the ingestion loop.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::frame::Frame;

/// Get current time in microseconds since UNIX epoch.
pub fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// A decoded frame plus its host arrival time.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct FrameEvent {
    pub frame: Frame,
    pub timestamp_us: u64,
}

/// Callback invoked once per published frame, on the ingestion thread.
/// Used by the persistence module; must not block for long.
pub(crate) type FrameCallback = Box<dyn Fn(&FrameEvent) + Send + Sync>;

// ============================================================================
// Bounded queue
// ============================================================================

/// Bounded FIFO with evict-oldest-on-full push and timed pop.
pub(crate) struct FrameQueue {
    capacity: usize,
    inner: Mutex<VecDeque<FrameEvent>>,
    available: Condvar,
}

fn recover<'a, T>(result: Result<MutexGuard<'a, T>, std::sync::PoisonError<MutexGuard<'a, T>>>) -> MutexGuard<'a, T> {
    match result {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl FrameQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        FrameQueue {
            capacity: capacity.max(1),
            inner: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    /// Push without blocking; when full the oldest entry is evicted.
    pub(crate) fn push(&self, event: FrameEvent) {
        let mut queue = recover(self.inner.lock());
        if queue.len() == self.capacity {
            queue.pop_front();
        }
        queue.push_back(event);
        drop(queue);
        self.available.notify_one();
    }

    /// Pop the oldest entry, waiting up to `timeout` for one to arrive.
    pub(crate) fn pop(&self, timeout: Duration) -> Option<FrameEvent> {
        let deadline = Instant::now() + timeout;
        let mut queue = recover(self.inner.lock());
        loop {
            if let Some(event) = queue.pop_front() {
                return Some(event);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = match self.available.wait_timeout(queue, deadline - now) {
                Ok(pair) => pair,
                Err(poisoned) => poisoned.into_inner(),
            };
            queue = guard;
        }
    }

    pub(crate) fn len(&self) -> usize {
        recover(self.inner.lock()).len()
    }
}

// ============================================================================
// Subscriptions
// ============================================================================

/// An independent consumer queue fed by the fan-out. Dropping the
/// subscription unregisters it; the fan-out prunes dead entries on publish.
pub struct Subscription {
    queue: Arc<FrameQueue>,
}

impl Subscription {
    /// Next frame event in arrival order, or `None` after `timeout`.
    pub fn pop(&self, timeout: Duration) -> Option<FrameEvent> {
        self.queue.pop(timeout)
    }

    /// Number of events currently buffered.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Fan-out hub
// ============================================================================

pub(crate) struct Fanout {
    capacity: usize,
    primary: Arc<FrameQueue>,
    subscribers: Mutex<Vec<Weak<FrameQueue>>>,
    callback: Mutex<Option<FrameCallback>>,
}

impl Fanout {
    pub(crate) fn new(capacity: usize) -> Self {
        Fanout {
            capacity,
            primary: Arc::new(FrameQueue::new(capacity)),
            subscribers: Mutex::new(Vec::new()),
            callback: Mutex::new(None),
        }
    }

    /// Deliver a frame stamped with the current time. Never blocks.
    /// Production flow stamps events in the ingestion loop and uses
    /// `publish_event` directly.
    #[cfg(test)]
    pub(crate) fn publish(&self, frame: Frame) {
        self.publish_event(FrameEvent {
            frame,
            timestamp_us: now_us(),
        });
    }

    /// Deliver an already-stamped event to the primary queue, every live
    /// subscriber, and the ingestion callback. Never blocks.
    pub(crate) fn publish_event(&self, event: FrameEvent) {
        self.primary.push(event);

        let mut subscribers = recover(self.subscribers.lock());
        subscribers.retain(|weak| match weak.upgrade() {
            Some(queue) => {
                queue.push(event);
                true
            }
            None => false,
        });
        drop(subscribers);

        if let Some(ref callback) = *recover(self.callback.lock()) {
            callback(&event);
        }
    }

    pub(crate) fn pop_primary(&self, timeout: Duration) -> Option<FrameEvent> {
        self.primary.pop(timeout)
    }

    pub(crate) fn subscribe(&self) -> Subscription {
        let queue = Arc::new(FrameQueue::new(self.capacity));
        recover(self.subscribers.lock()).push(Arc::downgrade(&queue));
        Subscription { queue }
    }

    pub(crate) fn set_callback(&self, callback: Option<FrameCallback>) {
        *recover(self.callback.lock()) = callback;
    }
}

// ============================================================================
// Tests
// ============================================================================
