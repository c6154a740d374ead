//! Typed publish/subscribe event bus.
//!
//! Producers publish [`Event`]s; subscribers register a handler for a single
//! [`EventKind`]. Delivery is synchronous on the publisher's thread. The bus
//! holds its lock only long enough to snapshot the subscriber list, so
//! handlers may subscribe and unsubscribe concurrently with publishes. A
//! panicking handler is isolated: it is logged with its subscription id and
//! later handlers still run.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::net::IpAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use tracing::error;
use uuid::Uuid;

/// Something that happened in the enforcement pipeline.
///
/// All timestamps are UTC.
#[derive(Debug, Clone)]
pub enum Event {
    /// A classified connection record was accepted for a source address.
    ConnectionAttempt {
        addr: IpAddr,
        src_port: u16,
        dst_port: u16,
        time: DateTime<Utc>,
    },
    /// A DROP rule was installed and the block persisted.
    Block {
        addr: IpAddr,
        duration_secs: u64,
        time: DateTime<Utc>,
    },
    /// A block was removed on operator request.
    Unblock { addr: IpAddr, time: DateTime<Utc> },
    /// A block reached its scheduled unblock time.
    BlockExpired { addr: IpAddr, time: DateTime<Utc> },
    /// A source address matched a blocked country.
    GeoBlock {
        addr: IpAddr,
        country: String,
        time: DateTime<Utc>,
    },
    /// One source probed too many distinct destination ports.
    PortScanDetected {
        addr: IpAddr,
        distinct_ports: usize,
        time: DateTime<Utc>,
    },
    /// Inbound traffic volume crossed the configured limit.
    BandwidthExceeded {
        bytes_per_sec: u64,
        time: DateTime<Utc>,
    },
    /// An address exceeded the attempt threshold inside its window.
    RateLimitExceeded {
        addr: IpAddr,
        attempts: usize,
        time: DateTime<Utc>,
    },
    WhitelistAdded { addr: IpAddr, time: DateTime<Utc> },
    WhitelistRemoved { addr: IpAddr, time: DateTime<Utc> },
}

/// Discriminant used to key subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ConnectionAttempt,
    Block,
    Unblock,
    BlockExpired,
    GeoBlock,
    PortScanDetected,
    BandwidthExceeded,
    RateLimitExceeded,
    WhitelistAdded,
    WhitelistRemoved,
}

impl Event {
    /// The subscription key for this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::ConnectionAttempt { .. } => EventKind::ConnectionAttempt,
            Event::Block { .. } => EventKind::Block,
            Event::Unblock { .. } => EventKind::Unblock,
            Event::BlockExpired { .. } => EventKind::BlockExpired,
            Event::GeoBlock { .. } => EventKind::GeoBlock,
            Event::PortScanDetected { .. } => EventKind::PortScanDetected,
            Event::BandwidthExceeded { .. } => EventKind::BandwidthExceeded,
            Event::RateLimitExceeded { .. } => EventKind::RateLimitExceeded,
            Event::WhitelistAdded { .. } => EventKind::WhitelistAdded,
            Event::WhitelistRemoved { .. } => EventKind::WhitelistRemoved,
        }
    }

    /// When the event happened.
    pub fn time(&self) -> DateTime<Utc> {
        match self {
            Event::ConnectionAttempt { time, .. }
            | Event::Block { time, .. }
            | Event::Unblock { time, .. }
            | Event::BlockExpired { time, .. }
            | Event::GeoBlock { time, .. }
            | Event::PortScanDetected { time, .. }
            | Event::BandwidthExceeded { time, .. }
            | Event::RateLimitExceeded { time, .. }
            | Event::WhitelistAdded { time, .. }
            | Event::WhitelistRemoved { time, .. } => *time,
        }
    }
}

/// Subscriber callback. Runs on the publisher's thread; keep it short.
pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Typed publish/subscribe bus.
pub struct EventBus {
    subscribers: Mutex<HashMap<EventKind, Vec<(Uuid, Handler)>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    /// Register a handler for one event kind. Returns the subscription id.
    pub fn subscribe(&self, kind: EventKind, handler: Handler) -> Uuid {
        let id = Uuid::new_v4();
        let mut subs = self.subscribers.lock().expect("event bus lock poisoned");
        subs.entry(kind).or_default().push((id, handler));
        id
    }

    /// Remove a subscription. Returns whether it existed.
    pub fn unsubscribe(&self, kind: EventKind, id: Uuid) -> bool {
        let mut subs = self.subscribers.lock().expect("event bus lock poisoned");
        if let Some(handlers) = subs.get_mut(&kind) {
            let before = handlers.len();
            handlers.retain(|(sub_id, _)| *sub_id != id);
            return handlers.len() != before;
        }
        false
    }

    /// Deliver an event to every subscriber of its kind, in subscription
    /// order. Handler panics are caught and reported; delivery continues.
    pub fn publish(&self, event: &Event) {
        let snapshot: Vec<(Uuid, Handler)> = {
            let subs = self.subscribers.lock().expect("event bus lock poisoned");
            subs.get(&event.kind()).cloned().unwrap_or_default()
        };

        for (id, handler) in snapshot {
            let result = catch_unwind(AssertUnwindSafe(|| handler(event)));
            if result.is_err() {
                error!(
                    subscription = %id,
                    kind = ?event.kind(),
                    "event handler panicked; continuing delivery"
                );
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn attempt(addr: &str) -> Event {
        Event::ConnectionAttempt {
            addr: addr.parse().unwrap(),
            src_port: 40000,
            dst_port: 22,
            time: Utc::now(),
        }
    }

    #[test]
    fn delivers_to_matching_kind_only() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        bus.subscribe(
            EventKind::ConnectionAttempt,
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let counter = Arc::clone(&hits);
        bus.subscribe(
            EventKind::Block,
            Arc::new(move |_| {
                counter.fetch_add(100, Ordering::SeqCst);
            }),
        );

        bus.publish(&attempt("1.2.3.4"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_handler_does_not_stop_later_handlers() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        bus.subscribe(
            EventKind::ConnectionAttempt,
            Arc::new(|_| panic!("boom")),
        );
        let counter = Arc::clone(&hits);
        bus.subscribe(
            EventKind::ConnectionAttempt,
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        bus.publish(&attempt("1.2.3.4"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_is_effective_and_idempotent() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        let id = bus.subscribe(
            EventKind::Unblock,
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert!(bus.unsubscribe(EventKind::Unblock, id));
        assert!(!bus.unsubscribe(EventKind::Unblock, id));

        bus.publish(&Event::Unblock {
            addr: "1.2.3.4".parse().unwrap(),
            time: Utc::now(),
        });
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
