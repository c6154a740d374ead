//! Periodic tasks: expiry sweep, port-scan detector, bandwidth monitor,
//! certificate-age monitor, HTTP brute-force monitor.
//!
//! Detectors accumulate observations from `ConnectionAttempt` events (bus
//! handlers stay cheap: they only record) and a recurring scheduler job
//! evaluates and acts on them. The expiry sweep delegates to the block
//! manager.

use crate::blocker::BlockManager;
use crate::config::MonitorConfig;
use crate::events::{Event, EventBus, EventKind};
use crate::scheduler::Scheduler;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::{HashSet, VecDeque};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Flags sources that probe many distinct destination ports inside a
/// short window.
pub struct PortScanDetector {
    state: DashMap<IpAddr, Mutex<VecDeque<(DateTime<Utc>, u16)>>>,
    window: chrono::Duration,
    distinct_ports: usize,
}

impl PortScanDetector {
    pub fn new(window_secs: u64, distinct_ports: usize) -> Self {
        Self {
            state: DashMap::new(),
            window: chrono::Duration::seconds(window_secs as i64),
            distinct_ports,
        }
    }

    /// Record one observed destination port for a source.
    pub fn record(&self, addr: IpAddr, dst_port: u16, time: DateTime<Utc>) {
        let entry = self
            .state
            .entry(addr)
            .or_insert_with(|| Mutex::new(VecDeque::new()));
        entry
            .lock()
            .expect("port scan state poisoned")
            .push_back((time, dst_port));
    }

    /// Prune each source's window and drain the offenders: sources whose
    /// distinct-port count reached the threshold. Offender state is reset
    /// so one scan yields one detection.
    pub fn take_offenders(&self, now: DateTime<Utc>) -> Vec<(IpAddr, usize)> {
        let cutoff = now - self.window;
        let mut offenders = Vec::new();
        let mut idle: Vec<IpAddr> = Vec::new();

        for entry in self.state.iter() {
            let addr = *entry.key();
            let mut window = entry.value().lock().expect("port scan state poisoned");
            while let Some((time, _)) = window.front() {
                if *time < cutoff {
                    window.pop_front();
                } else {
                    break;
                }
            }

            if window.is_empty() {
                idle.push(addr);
                continue;
            }

            let distinct: HashSet<u16> = window.iter().map(|(_, port)| *port).collect();
            if distinct.len() >= self.distinct_ports {
                offenders.push((addr, distinct.len()));
                window.clear();
            }
        }

        for addr in idle {
            self.state.remove(&addr);
        }
        offenders
    }
}

/// Flags sources hammering the HTTP/HTTPS ports.
pub struct HttpFloodDetector {
    state: DashMap<IpAddr, Mutex<VecDeque<DateTime<Utc>>>>,
    window: chrono::Duration,
    max_attempts: usize,
}

impl HttpFloodDetector {
    const HTTP_PORTS: [u16; 2] = [80, 443];

    pub fn new(window_secs: u64, max_attempts: usize) -> Self {
        Self {
            state: DashMap::new(),
            window: chrono::Duration::seconds(window_secs as i64),
            max_attempts,
        }
    }

    /// Record an attempt if it targets an HTTP port.
    pub fn record(&self, addr: IpAddr, dst_port: u16, time: DateTime<Utc>) {
        if !Self::HTTP_PORTS.contains(&dst_port) {
            return;
        }
        let entry = self
            .state
            .entry(addr)
            .or_insert_with(|| Mutex::new(VecDeque::new()));
        entry
            .lock()
            .expect("http flood state poisoned")
            .push_back(time);
    }

    /// Prune windows and drain sources at or past the attempt limit.
    pub fn take_offenders(&self, now: DateTime<Utc>) -> Vec<(IpAddr, usize)> {
        let cutoff = now - self.window;
        let mut offenders = Vec::new();
        let mut idle: Vec<IpAddr> = Vec::new();

        for entry in self.state.iter() {
            let addr = *entry.key();
            let mut window = entry.value().lock().expect("http flood state poisoned");
            while let Some(time) = window.front() {
                if *time < cutoff {
                    window.pop_front();
                } else {
                    break;
                }
            }

            if window.is_empty() {
                idle.push(addr);
                continue;
            }

            if window.len() >= self.max_attempts {
                offenders.push((addr, window.len()));
                window.clear();
            }
        }

        for addr in idle {
            self.state.remove(&addr);
        }
        offenders
    }
}

/// Samples inbound byte counters and reports the rate since the previous
/// sample.
pub struct BandwidthMonitor {
    limit_bytes_per_sec: u64,
    last: Mutex<Option<(Instant, u64)>>,
}

impl BandwidthMonitor {
    pub fn new(limit_bytes_per_sec: u64) -> Self {
        Self {
            limit_bytes_per_sec,
            last: Mutex::new(None),
        }
    }

    /// Take a sample. Returns the inbound rate when it exceeds the limit.
    /// The first sample only establishes the baseline.
    pub fn check(&self) -> Option<u64> {
        let total = read_total_rx_bytes()?;
        self.check_with_sample(Instant::now(), total)
    }

    fn check_with_sample(&self, now: Instant, total: u64) -> Option<u64> {
        let mut last = self.last.lock().expect("bandwidth state poisoned");
        let previous = last.replace((now, total));

        let (prev_time, prev_total) = previous?;
        let elapsed = now.duration_since(prev_time).as_secs_f64();
        if elapsed <= 0.0 || total < prev_total {
            return None;
        }

        let rate = ((total - prev_total) as f64 / elapsed) as u64;
        if self.limit_bytes_per_sec > 0 && rate > self.limit_bytes_per_sec {
            Some(rate)
        } else {
            None
        }
    }
}

/// Sum of rx_bytes across interfaces from `/proc/net/dev`, loopback
/// excluded.
fn read_total_rx_bytes() -> Option<u64> {
    let content = std::fs::read_to_string("/proc/net/dev").ok()?;
    parse_rx_bytes(&content)
}

fn parse_rx_bytes(content: &str) -> Option<u64> {
    let mut total: u64 = 0;
    for line in content.lines().skip(2) {
        let mut parts = line.split(':');
        let iface = parts.next()?.trim();
        if iface == "lo" {
            continue;
        }
        let fields = parts.next()?;
        let rx: u64 = fields.split_whitespace().next()?.parse().ok()?;
        total = total.saturating_add(rx);
    }
    Some(total)
}

/// Warns while the service certificate approaches the end of its assumed
/// validity. Age is judged from the file's modification time.
pub struct CertificateMonitor {
    cert_path: PathBuf,
    validity: Duration,
    warn_before: Duration,
}

impl CertificateMonitor {
    pub fn new(cert_path: PathBuf, validity_days: i64, warn_days: i64) -> Self {
        Self {
            cert_path,
            validity: Duration::from_secs(validity_days.max(0) as u64 * 86_400),
            warn_before: Duration::from_secs(warn_days.max(0) as u64 * 86_400),
        }
    }

    /// Days until assumed expiry, if the certificate is inside the warning
    /// window (negative when already past it).
    pub fn check(&self) -> Option<i64> {
        let modified = std::fs::metadata(&self.cert_path).ok()?.modified().ok()?;
        let age = modified.elapsed().ok()?;

        let remaining = self.validity.checked_sub(age);
        match remaining {
            Some(left) if left > self.warn_before => None,
            Some(left) => Some((left.as_secs() / 86_400) as i64),
            None => Some(-(((age.as_secs() - self.validity.as_secs()) / 86_400) as i64)),
        }
    }
}

/// Wire every periodic task onto the scheduler and the event bus.
/// Returns the scheduled job ids.
pub fn register_periodic_tasks(
    scheduler: &Scheduler,
    bus: &Arc<EventBus>,
    blocker: &Arc<BlockManager>,
    monitors: &MonitorConfig,
    cert_path: PathBuf,
) -> Vec<Uuid> {
    let mut jobs = Vec::new();

    // Expiry sweep.
    {
        let blocker = Arc::clone(blocker);
        let period = Duration::from_secs(monitors.expiry_sweep_secs.max(1));
        jobs.push(scheduler.schedule_recurring_async(period, period, move || {
            let blocker = Arc::clone(&blocker);
            async move {
                blocker.sweep_expired().await;
            }
        }));
    }

    // Port-scan detector: record on the bus, evaluate on a timer.
    let port_scans = Arc::new(PortScanDetector::new(
        monitors.portscan_window_secs,
        monitors.portscan_distinct_ports,
    ));
    let http_floods = Arc::new(HttpFloodDetector::new(
        monitors.http_window_secs,
        monitors.http_max_attempts,
    ));

    {
        let port_scans = Arc::clone(&port_scans);
        let http_floods = Arc::clone(&http_floods);
        bus.subscribe(
            EventKind::ConnectionAttempt,
            Arc::new(move |event| {
                if let Event::ConnectionAttempt {
                    addr,
                    dst_port,
                    time,
                    ..
                } = event
                {
                    port_scans.record(*addr, *dst_port, *time);
                    http_floods.record(*addr, *dst_port, *time);
                }
            }),
        );
    }

    {
        let port_scans = Arc::clone(&port_scans);
        let blocker = Arc::clone(blocker);
        let bus = Arc::clone(bus);
        let period = Duration::from_secs(monitors.portscan_window_secs.max(1));
        jobs.push(scheduler.schedule_recurring_async(period, period, move || {
            let port_scans = Arc::clone(&port_scans);
            let blocker = Arc::clone(&blocker);
            let bus = Arc::clone(&bus);
            async move {
                let now = Utc::now();
                for (addr, distinct_ports) in port_scans.take_offenders(now) {
                    warn!(%addr, distinct_ports, "port scan detected");
                    bus.publish(&Event::PortScanDetected {
                        addr,
                        distinct_ports,
                        time: now,
                    });
                    blocker
                        .block(
                            addr,
                            None,
                            &format!("port scan across {} ports", distinct_ports),
                        )
                        .await;
                }
            }
        }));
    }

    {
        let http_floods = Arc::clone(&http_floods);
        let blocker = Arc::clone(blocker);
        let bus = Arc::clone(bus);
        let period = Duration::from_secs(monitors.http_window_secs.max(1));
        jobs.push(scheduler.schedule_recurring_async(period, period, move || {
            let http_floods = Arc::clone(&http_floods);
            let blocker = Arc::clone(&blocker);
            let bus = Arc::clone(&bus);
            async move {
                let now = Utc::now();
                for (addr, attempts) in http_floods.take_offenders(now) {
                    warn!(%addr, attempts, "http brute force suspected");
                    bus.publish(&Event::RateLimitExceeded {
                        addr,
                        attempts,
                        time: now,
                    });
                    blocker
                        .block(
                            addr,
                            None,
                            &format!("http brute force ({} attempts)", attempts),
                        )
                        .await;
                }
            }
        }));
    }

    // Bandwidth monitor, when a limit is configured.
    if monitors.bandwidth_limit_bytes_per_sec > 0 {
        let monitor = Arc::new(BandwidthMonitor::new(monitors.bandwidth_limit_bytes_per_sec));
        let bus = Arc::clone(bus);
        let period = Duration::from_secs(monitors.bandwidth_check_secs.max(1));
        jobs.push(scheduler.schedule_recurring_async(period, period, move || {
            let monitor = Arc::clone(&monitor);
            let bus = Arc::clone(&bus);
            async move {
                if let Some(bytes_per_sec) = monitor.check() {
                    warn!(bytes_per_sec, "inbound bandwidth limit exceeded");
                    bus.publish(&Event::BandwidthExceeded {
                        bytes_per_sec,
                        time: Utc::now(),
                    });
                }
            }
        }));
    }

    // Certificate age.
    {
        let monitor = CertificateMonitor::new(
            cert_path,
            monitors.cert_validity_days,
            monitors.cert_warn_days,
        );
        let period = Duration::from_secs(monitors.cert_check_secs.max(1));
        jobs.push(scheduler.schedule_recurring(period, period, move || {
            match monitor.check() {
                Some(days) if days < 0 => {
                    warn!(days_past = -days, "service certificate past assumed validity");
                }
                Some(days) => {
                    warn!(days_left = days, "service certificate nearing expiry");
                }
                None => debug!("service certificate age ok"),
            }
        }));
    }

    info!(jobs = jobs.len(), "periodic tasks registered");
    jobs
}
