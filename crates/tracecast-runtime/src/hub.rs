use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use tracecast_types::{BufferedEvent, SessionEvent};

/// How many recent events are kept for late subscribers.
pub const BUFFER_CAPACITY: usize = 20;

/// Outbound queue per SSE subscriber; overflow disconnects the subscriber.
pub const SUBSCRIBER_QUEUE: usize = 64;

/// Bounded ring of the most recent events, ids monotone from 0.
#[derive(Debug)]
pub struct EventBuffer {
    capacity: usize,
    next_event_id: u64,
    events: VecDeque<BufferedEvent>,
}

impl EventBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            next_event_id: 0,
            events: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, event: SessionEvent) -> BufferedEvent {
        let stamped = BufferedEvent {
            event_id: self.next_event_id,
            event,
        };
        self.next_event_id += 1;

        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(stamped.clone());
        stamped
    }

    pub fn snapshot(&self) -> Vec<BufferedEvent> {
        self.events.iter().cloned().collect()
    }
}

impl Default for EventBuffer {
    fn default() -> Self {
        Self::new(BUFFER_CAPACITY)
    }
}

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<BufferedEvent>,
}

struct HubInner {
    buffer: EventBuffer,
    subscribers: Vec<Subscriber>,
    next_subscriber_id: u64,
}

/// Per-session event fan-out.
///
/// Buffer and subscriber list live under one lock so a late subscriber's
/// replay snapshot and its first live event cannot race. `publish` only
/// ever `try_send`s; a subscriber whose queue is full is dropped, the
/// producer never blocks.
pub struct SessionHub {
    inner: Mutex<HubInner>,
}

impl SessionHub {
    pub fn new() -> Self {
        Self::with_capacity(BUFFER_CAPACITY)
    }

    pub fn with_capacity(buffer_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(HubInner {
                buffer: EventBuffer::new(buffer_capacity),
                subscribers: Vec::new(),
                next_subscriber_id: 0,
            }),
        }
    }

    /// Stamp, buffer, and fan out one event. Called only by the session's
    /// processing task, which preserves per-session ordering.
    pub fn publish(&self, event: SessionEvent) -> BufferedEvent {
        let mut inner = self.inner.lock().unwrap();
        let stamped = inner.buffer.push(event);

        inner.subscribers.retain(|subscriber| {
            match subscriber.tx.try_send(stamped.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!(subscriber = subscriber.id, "dropping slow subscriber");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });

        stamped
    }

    /// Register a subscriber; the buffered prefix is already queued on the
    /// returned receiver, followed by live events in order.
    pub fn subscribe(&self) -> mpsc::Receiver<BufferedEvent> {
        let mut inner = self.inner.lock().unwrap();
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);

        // The replay prefix (at most the ring capacity) fits the queue.
        for event in inner.buffer.snapshot() {
            let _ = tx.try_send(event);
        }

        let id = inner.next_subscriber_id;
        inner.next_subscriber_id += 1;
        inner.subscribers.push(Subscriber { id, tx });
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        inner.subscribers.retain(|s| !s.tx.is_closed());
        inner.subscribers.len()
    }
}

impl Default for SessionHub {
    fn default() -> Self {
        Self::new()
    }
}
