//! Shared harness for integration tests.
//!
//! Builds the full enforcement pipeline over a temporary base directory
//! with the packet filter pointed at a stub binary, so scenarios can be
//! driven in-process without root privileges.

#![allow(dead_code)]

use std::net::IpAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use vigild::config::Config;
use vigild::context::FirewallContext;
use vigild::events::{Event, EventKind};
use vigild::tail::{ConnectionRecord, Proto};

/// A captured stream of published events of one kind.
#[derive(Clone)]
pub struct EventProbe {
    events: Arc<Mutex<Vec<Event>>>,
}

impl EventProbe {
    pub fn install(ctx: &FirewallContext, kind: EventKind) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        ctx.bus.subscribe(
            kind,
            Arc::new(move |event| {
                sink.lock().unwrap().push(event.clone());
            }),
        );
        Self { events }
    }

    pub fn snapshot(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}

/// A test configuration rooted at `dir`: tight thresholds, stubbed
/// packet filter, no plaintext record writing (avoids reverse DNS).
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::fresh_default();
    config.base_dir = dir.to_path_buf();
    config.firewall.tool = "/bin/true".into();
    config.thresholds.attempts = 3;
    config.thresholds.window_secs = 10;
    config.thresholds.default_block_secs = 60;
    config.logging.plaintext_logs = false;
    config
}

/// Build the assembled daemon context over `dir`.
pub async fn context_with(config: Config, root: CancellationToken) -> Arc<FirewallContext> {
    FirewallContext::initialize(config, root)
        .await
        .expect("context initializes")
}

pub async fn context_in(dir: &Path) -> Arc<FirewallContext> {
    context_with(test_config(dir), CancellationToken::new()).await
}

/// A classifier record as the tail would produce it.
pub fn record(src: &str, dst_port: u16) -> ConnectionRecord {
    ConnectionRecord {
        proto: Proto::Tcp,
        src: src.parse().expect("valid test address"),
        src_port: 40000,
        dst_port,
    }
}

pub fn addr(s: &str) -> IpAddr {
    s.parse().unwrap()
}
