//! Block lifecycle: apply decisions, persist, expire, reconcile.
//!
//! The manager is the only writer of block state. A block mutates three
//! places in order: the packet filter (which gates everything else), the
//! store, and the in-memory blocked set; an `Event::Block` goes out last.
//! Startup reconciliation aligns all three before the syslog tail starts,
//! scheduling a one-shot unblock for every still-active record. The
//! periodic expiry sweep deletes due records and issues the matching
//! unblocks.

use crate::db::{BlockRecord, Database};
use crate::engine::AddressDirectory;
use crate::events::{Event, EventBus};
use crate::firewall::FirewallDriver;
use crate::lists::BlockListManager;
use crate::scheduler::Scheduler;
use chrono::Utc;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Result of a block request, shaped for user-visible reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockOutcome {
    /// DROP rule installed, record persisted.
    Installed,
    /// The address was already blocked; success, no side effect.
    AlreadyBlocked,
    /// Whitelisted addresses are never blocked.
    Whitelisted,
    /// The packet filter refused; no state was recorded.
    DriverFailed(String),
}

/// Result of an unblock request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnblockOutcome {
    Removed,
    /// The address was not blocked; success, no side effect.
    NotBlocked,
    /// The packet filter refused; state kept so a later retry can succeed.
    DriverFailed(String),
}

/// Figures from the startup reconciliation.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReconcileSummary {
    /// Records already past their unblock time, cleaned up immediately.
    pub expired: usize,
    /// Records restored to the in-memory set with a pending unblock.
    pub restored: usize,
}

/// Owner of block state across the packet filter, store, and memory.
pub struct BlockManager {
    driver: Arc<FirewallDriver>,
    db: Database,
    lists: Arc<BlockListManager>,
    bus: Arc<EventBus>,
    scheduler: Arc<Scheduler>,
    directory: Arc<AddressDirectory>,
    default_duration: Duration,
    /// Serializes all block-state mutations.
    state_lock: Mutex<()>,
}

impl BlockManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        driver: Arc<FirewallDriver>,
        db: Database,
        lists: Arc<BlockListManager>,
        bus: Arc<EventBus>,
        scheduler: Arc<Scheduler>,
        directory: Arc<AddressDirectory>,
        default_duration: Duration,
    ) -> Self {
        Self {
            driver,
            db,
            lists,
            bus,
            scheduler,
            directory,
            default_duration,
            state_lock: Mutex::new(()),
        }
    }

    pub fn default_duration(&self) -> Duration {
        self.default_duration
    }

    /// Block an address. `duration` falls back to the configured default;
    /// `reason` lands in the address history.
    pub async fn block(
        &self,
        addr: IpAddr,
        duration: Option<Duration>,
        reason: &str,
    ) -> BlockOutcome {
        let _guard = self.state_lock.lock().await;

        if self.lists.is_whitelisted(addr) {
            debug!(%addr, "block request refused: address is whitelisted");
            return BlockOutcome::Whitelisted;
        }
        if self.lists.is_blocked(addr) {
            debug!(%addr, "block request is a no-op: already blocked");
            return BlockOutcome::AlreadyBlocked;
        }

        let duration = duration.unwrap_or(self.default_duration);
        let outcome = self.driver.block(addr, duration).await;
        if !outcome.ok {
            return BlockOutcome::DriverFailed(outcome.detail);
        }

        let record = BlockRecord::starting_now(addr.to_string(), duration.as_secs() as i64);
        if let Err(e) = self.db.blocks().upsert(&record).await {
            warn!(%addr, error = %e, "failed to persist block record");
        }
        self.lists.mark_blocked(addr);
        self.append_history(
            addr,
            &format!("Blocked for {}s: {}", duration.as_secs(), reason),
        )
        .await;

        info!(%addr, duration_secs = duration.as_secs(), reason, "address blocked");
        self.bus.publish(&Event::Block {
            addr,
            duration_secs: duration.as_secs(),
            time: Utc::now(),
        });
        BlockOutcome::Installed
    }

    /// Remove a block on operator request.
    pub async fn unblock(&self, addr: IpAddr) -> UnblockOutcome {
        let _guard = self.state_lock.lock().await;

        if !self.lists.is_blocked(addr) {
            debug!(%addr, "already unblocked");
            return UnblockOutcome::NotBlocked;
        }

        let outcome = self.driver.unblock(addr).await;
        if !outcome.ok {
            return UnblockOutcome::DriverFailed(outcome.detail);
        }

        if let Err(e) = self.db.blocks().remove(&addr.to_string()).await {
            warn!(%addr, error = %e, "failed to delete block record");
        }
        self.lists.clear_blocked(addr);
        self.append_history(addr, "Unblocked").await;

        info!(%addr, "address unblocked");
        self.bus.publish(&Event::Unblock {
            addr,
            time: Utc::now(),
        });
        UnblockOutcome::Removed
    }

    /// Unblock every currently blocked address. Returns
    /// `(removed, failed)`.
    pub async fn unblock_all(&self) -> (usize, usize) {
        let mut removed = 0;
        let mut failed = 0;
        for addr in self.lists.blocked_snapshot() {
            match self.unblock(addr).await {
                UnblockOutcome::Removed | UnblockOutcome::NotBlocked => removed += 1,
                UnblockOutcome::DriverFailed(_) => failed += 1,
            }
        }
        (removed, failed)
    }

    /// Align store, memory, packet filter, and pending unblocks with the
    /// persisted records. Must complete before the syslog tail starts.
    pub async fn reconcile(self: &Arc<Self>) -> Result<ReconcileSummary, crate::db::DbError> {
        let records = self.db.blocks().list().await?;
        let now = Utc::now();
        let mut summary = ReconcileSummary::default();

        for record in records {
            let addr: IpAddr = match record.address.parse() {
                Ok(addr) => addr,
                Err(_) => {
                    warn!(address = %record.address, "dropping unparseable block record");
                    let _ = self.db.blocks().remove(&record.address).await;
                    continue;
                }
            };

            if record.scheduled_unblock <= now {
                let _ = self.driver.unblock(addr).await;
                let _ = self.db.blocks().remove(&record.address).await;
                summary.expired += 1;
            } else {
                self.lists.mark_blocked(addr);
                let manager = Arc::clone(self);
                self.scheduler
                    .schedule_once_at_async(record.scheduled_unblock, move || {
                        let manager = Arc::clone(&manager);
                        async move {
                            manager.expire(addr).await;
                        }
                    });
                summary.restored += 1;
            }
        }

        info!(
            expired = summary.expired,
            restored = summary.restored,
            "block state reconciled"
        );
        Ok(summary)
    }

    /// Delete every due record and issue the matching unblocks. Returns
    /// the number of expired blocks.
    pub async fn sweep_expired(&self) -> usize {
        let records = match self.db.blocks().remove_expired(Utc::now()).await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "expiry sweep query failed");
                return 0;
            }
        };

        let _guard = self.state_lock.lock().await;
        let mut expired = 0;
        for record in &records {
            let addr: IpAddr = match record.address.parse() {
                Ok(addr) => addr,
                Err(_) => continue,
            };
            let _ = self.driver.unblock(addr).await;
            self.lists.clear_blocked(addr);
            self.append_history(addr, "Block expired").await;
            self.bus.publish(&Event::BlockExpired {
                addr,
                time: Utc::now(),
            });
            expired += 1;
        }

        if expired > 0 {
            info!(expired, "expiry sweep unblocked addresses");
        }
        expired
    }

    /// One-shot expiry for a reconciled record.
    async fn expire(&self, addr: IpAddr) {
        let _guard = self.state_lock.lock().await;

        if !self.lists.is_blocked(addr) {
            // Unblocked manually before the timer fired.
            return;
        }

        let _ = self.driver.unblock(addr).await;
        let _ = self.db.blocks().remove(&addr.to_string()).await;
        self.lists.clear_blocked(addr);
        self.append_history(addr, "Block expired").await;

        info!(%addr, "scheduled unblock completed");
        self.bus.publish(&Event::BlockExpired {
            addr,
            time: Utc::now(),
        });
    }

    async fn append_history(&self, addr: IpAddr, message: &str) {
        let id = self.directory.id_of(addr);
        if let Err(e) = self.db.audit().add_history(id, Utc::now(), message).await {
            warn!(%addr, error = %e, "failed to append history");
        }
    }
}
