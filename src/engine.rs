//! Enforcement engine: per-address windows and the block decision.
//!
//! For every classified connection record the engine short-circuits
//! whitelisted sources, publishes `ConnectionAttempt`, applies the
//! geo-country policy, then appends to the address's attempt window,
//! prunes entries older than the configured threshold, and blocks at
//! exactly `threshold_attempts` entries.
//!
//! Windows live in a [`DashMap`] keyed by address; each entry carries its
//! own mutex, so contention between different addresses never serializes.
//! Within one address, window mutations are totally ordered by that lock.

use crate::blocker::BlockManager;
use crate::config::ThresholdConfig;
use crate::dns::ReverseDns;
use crate::events::{Event, EventBus};
use crate::geo::GeoResolver;
use crate::lists::BlockListManager;
use crate::logs::ConnectionLog;
use crate::tail::ConnectionRecord;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

/// Mints and memoizes the stable identifier of each observed address.
/// Identifiers live for the process lifetime and key the audit trail.
pub struct AddressDirectory {
    map: DashMap<IpAddr, Uuid>,
}

impl AddressDirectory {
    pub fn new() -> Self {
        Self {
            map: DashMap::new(),
        }
    }

    /// The identifier for `addr`, minted on first call.
    pub fn id_of(&self, addr: IpAddr) -> Uuid {
        *self.map.entry(addr).or_insert_with(Uuid::new_v4)
    }

    /// Reverse lookup for commands that take a raw identifier.
    pub fn address_of(&self, id: Uuid) -> Option<IpAddr> {
        self.map
            .iter()
            .find(|entry| *entry.value() == id)
            .map(|entry| *entry.key())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl Default for AddressDirectory {
    fn default() -> Self {
        Self::new()
    }
}

struct AddressEntry {
    window: Mutex<VecDeque<DateTime<Utc>>>,
}

/// The rate/geo decision pipeline.
pub struct EnforcementEngine {
    thresholds: ThresholdConfig,
    plaintext_logs: bool,
    windows: DashMap<IpAddr, Arc<AddressEntry>>,
    directory: Arc<AddressDirectory>,
    lists: Arc<BlockListManager>,
    geo: Arc<GeoResolver>,
    blocker: Arc<BlockManager>,
    bus: Arc<EventBus>,
    rdns: ReverseDns,
    conn_log: Arc<ConnectionLog>,
}

impl EnforcementEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        thresholds: ThresholdConfig,
        plaintext_logs: bool,
        directory: Arc<AddressDirectory>,
        lists: Arc<BlockListManager>,
        geo: Arc<GeoResolver>,
        blocker: Arc<BlockManager>,
        bus: Arc<EventBus>,
        rdns: ReverseDns,
        conn_log: Arc<ConnectionLog>,
    ) -> Self {
        Self {
            thresholds,
            plaintext_logs,
            windows: DashMap::new(),
            directory,
            lists,
            geo,
            blocker,
            bus,
            rdns,
            conn_log,
        }
    }

    /// Run one classified record through the decision pipeline.
    pub async fn process(&self, record: &ConnectionRecord) {
        let id = self.directory.id_of(record.src);

        if self.lists.is_whitelisted(record.src) {
            debug!(addr = %record.src, "whitelisted source; not counted");
            return;
        }

        let now = Utc::now();
        self.bus.publish(&Event::ConnectionAttempt {
            addr: record.src,
            src_port: record.src_port,
            dst_port: record.dst_port,
            time: now,
        });

        let country = self.geo.country_of(record.src).to_string();
        if self.geo.is_blocked_country(record.src) {
            warn!(addr = %record.src, country = %country, "source in blocked country");
            self.bus.publish(&Event::GeoBlock {
                addr: record.src,
                country: country.clone(),
                time: now,
            });
            self.blocker
                .block(
                    record.src,
                    None,
                    &format!("traffic from blocked country {}", country),
                )
                .await;
            return;
        }

        let (attempts, span_secs) = self.observe(record.src, now);

        if self.plaintext_logs {
            self.write_record(record, id, &country, attempts, span_secs)
                .await;
        }

        if attempts >= self.thresholds.attempts {
            warn!(
                addr = %record.src,
                attempts,
                window_secs = self.thresholds.window_secs,
                "attempt threshold reached"
            );
            self.blocker
                .block(
                    record.src,
                    None,
                    &format!("rate limit exceeded ({} attempts)", attempts),
                )
                .await;
            self.bus.publish(&Event::RateLimitExceeded {
                addr: record.src,
                attempts,
                time: now,
            });
        }
    }

    /// Append `now` to the address window and prune stale entries under
    /// the address's own lock. Returns the window size and span.
    fn observe(&self, addr: IpAddr, now: DateTime<Utc>) -> (usize, f64) {
        let entry = self
            .windows
            .entry(addr)
            .or_insert_with(|| {
                Arc::new(AddressEntry {
                    window: Mutex::new(VecDeque::new()),
                })
            })
            .clone();

        let mut window = entry.window.lock().expect("window lock poisoned");
        window.push_back(now);

        let cutoff = now - chrono::Duration::seconds(self.thresholds.window_secs as i64);
        while let Some(front) = window.front() {
            if *front < cutoff {
                window.pop_front();
            } else {
                break;
            }
        }

        let span_secs = match (window.front(), window.back()) {
            (Some(first), Some(last)) => (*last - *first).num_milliseconds() as f64 / 1000.0,
            _ => 0.0,
        };
        (window.len(), span_secs)
    }

    /// Current window size for an address (diagnostics and tests).
    pub fn window_len(&self, addr: IpAddr) -> usize {
        self.windows
            .get(&addr)
            .map(|entry| entry.window.lock().expect("window lock poisoned").len())
            .unwrap_or(0)
    }

    async fn write_record(
        &self,
        record: &ConnectionRecord,
        id: Uuid,
        country: &str,
        attempts: usize,
        span_secs: f64,
    ) {
        let host = match self.rdns.lookup(record.src).await {
            Some(host) => host,
            None => "n/a".to_string(),
        };
        let task = tokio::task::try_id()
            .map(|task_id| task_id.to_string())
            .unwrap_or_else(|| format!("{:?}", std::thread::current().id()));

        let line = format!(
            "{}|{}|{}|{}|{}|{}|{}|{}|{}|attempts={}|window={:.1}",
            Utc::now().to_rfc3339(),
            id,
            std::process::id(),
            task,
            record.src,
            host,
            country,
            record.src_port,
            record.dst_port,
            attempts,
            span_secs,
        );

        if let Err(e) = self.conn_log.append(&line) {
            debug!(error = %e, "failed to append connection record");
        }
    }
}
