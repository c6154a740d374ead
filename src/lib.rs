//! vigild - host-based network firewall daemon.
//!
//! Tails the kernel syslog for new-connection records, correlates them per
//! source address, applies rate/geo/manual policies, and enforces decisions
//! through iptables DROP rules. Block state is persisted so restarts do not
//! break active blocks. Operators drive the daemon over a line-oriented
//! command channel (plaintext for loopback, TLS + encrypted payloads
//! otherwise).

pub mod blocker;
pub mod commands;
pub mod config;
pub mod context;
pub mod db;
pub mod dns;
pub mod engine;
pub mod events;
pub mod firewall;
pub mod geo;
pub mod lists;
pub mod logs;
pub mod scheduler;
pub mod server;
pub mod tail;
pub mod tasks;

pub use blocker::{BlockManager, BlockOutcome};
pub use config::Config;
pub use context::FirewallContext;
pub use engine::{AddressDirectory, EnforcementEngine};
pub use events::{Event, EventBus, EventKind};
pub use scheduler::{PluginScheduler, Scheduler};
