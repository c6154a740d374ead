//! In-memory block and whitelist sets with file-backed seeds.
//!
//! Seeded from `BlockList/blocklist.txt` and `Whitelist/whitelist.txt`;
//! `#` comments and blank lines are ignored and bad literals logged. The
//! whitelist persists mutations back to its file (append on add, rewrite
//! omitting the address on remove) and publishes
//! WhitelistAdded/WhitelistRemoved.
//!
//! Reads vastly outnumber writes, so both sets sit behind a
//! readers-writer lock. The block manager is the only writer of the
//! blocked set.

use crate::events::{Event, EventBus};
use chrono::Utc;
use std::collections::HashSet;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

/// Owner of the in-memory blocked/whitelisted sets.
pub struct BlockListManager {
    blocked: RwLock<HashSet<IpAddr>>,
    whitelisted: RwLock<HashSet<IpAddr>>,
    whitelist_path: PathBuf,
    bus: Arc<EventBus>,
}

impl BlockListManager {
    /// Seed both sets from their files. Missing files start empty.
    pub fn load(
        blocklist_path: &Path,
        whitelist_path: impl Into<PathBuf>,
        bus: Arc<EventBus>,
    ) -> Self {
        let whitelist_path = whitelist_path.into();
        let blocked = read_address_file(blocklist_path);
        let whitelisted = read_address_file(&whitelist_path);

        info!(
            blocked = blocked.len(),
            whitelisted = whitelisted.len(),
            "address lists seeded"
        );

        Self {
            blocked: RwLock::new(blocked),
            whitelisted: RwLock::new(whitelisted),
            whitelist_path,
            bus,
        }
    }

    pub fn is_blocked(&self, addr: IpAddr) -> bool {
        self.blocked.read().expect("block set poisoned").contains(&addr)
    }

    pub fn is_whitelisted(&self, addr: IpAddr) -> bool {
        self.whitelisted
            .read()
            .expect("whitelist set poisoned")
            .contains(&addr)
    }

    /// Record an address as blocked in memory. Returns whether it was new.
    pub fn mark_blocked(&self, addr: IpAddr) -> bool {
        self.blocked.write().expect("block set poisoned").insert(addr)
    }

    /// Drop an address from the in-memory blocked set.
    pub fn clear_blocked(&self, addr: IpAddr) -> bool {
        self.blocked.write().expect("block set poisoned").remove(&addr)
    }

    /// Snapshot of currently blocked addresses, sorted for stable output.
    pub fn blocked_snapshot(&self) -> Vec<IpAddr> {
        let mut addrs: Vec<IpAddr> = self
            .blocked
            .read()
            .expect("block set poisoned")
            .iter()
            .copied()
            .collect();
        addrs.sort();
        addrs
    }

    pub fn whitelist_snapshot(&self) -> Vec<IpAddr> {
        let mut addrs: Vec<IpAddr> = self
            .whitelisted
            .read()
            .expect("whitelist set poisoned")
            .iter()
            .copied()
            .collect();
        addrs.sort();
        addrs
    }

    /// Add to the whitelist, appending to the seed file. Returns whether
    /// the address was new.
    pub fn whitelist_add(&self, addr: IpAddr) -> std::io::Result<bool> {
        let inserted = self
            .whitelisted
            .write()
            .expect("whitelist set poisoned")
            .insert(addr);
        if !inserted {
            return Ok(false);
        }

        if let Some(parent) = self.whitelist_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut content = std::fs::read_to_string(&self.whitelist_path).unwrap_or_default();
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        content.push_str(&addr.to_string());
        content.push('\n');
        std::fs::write(&self.whitelist_path, content)?;

        self.bus.publish(&Event::WhitelistAdded {
            addr,
            time: Utc::now(),
        });
        info!(%addr, "address whitelisted");
        Ok(true)
    }

    /// Remove from the whitelist, rewriting the seed file without the
    /// address. Comment lines are preserved. Returns whether it existed.
    pub fn whitelist_remove(&self, addr: IpAddr) -> std::io::Result<bool> {
        let removed = self
            .whitelisted
            .write()
            .expect("whitelist set poisoned")
            .remove(&addr);
        if !removed {
            return Ok(false);
        }

        if self.whitelist_path.exists() {
            let content = std::fs::read_to_string(&self.whitelist_path)?;
            let kept: Vec<&str> = content
                .lines()
                .filter(|line| line.trim().parse::<IpAddr>().ok() != Some(addr))
                .collect();
            let mut rewritten = kept.join("\n");
            if !rewritten.is_empty() {
                rewritten.push('\n');
            }
            std::fs::write(&self.whitelist_path, rewritten)?;
        }

        self.bus.publish(&Event::WhitelistRemoved {
            addr,
            time: Utc::now(),
        });
        info!(%addr, "address removed from whitelist");
        Ok(true)
    }
}

/// Parse one address literal per line; `#` comments and blanks skipped.
fn read_address_file(path: &Path) -> HashSet<IpAddr> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(_) => {
            info!(path = %path.display(), "seed list not found, starting empty");
            return HashSet::new();
        }
    };

    let mut set = HashSet::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match line.parse::<IpAddr>() {
            Ok(addr) => {
                set.insert(addr);
            }
            Err(_) => {
                warn!(path = %path.display(), line = %line, "skipping invalid address literal");
            }
        }
    }
    set
}
