//! Syslog tail and connection classifier.
//!
//! Opens the kernel log read-only, seeks to the end, and polls for new
//! lines every `poll_interval`. Lines whose payload (after the standard
//! `Mon DD HH:MM:SS host tag[pid]: ` prefix) reads `New TCP connection:`
//! or `New UDP connection:` are parsed into [`ConnectionRecord`]s via
//! delimited-field extraction of `SRC=`, `SPT=`, and `DPT=`. Records from
//! `127.0.0.1` are dropped. After a poll that processed lines, the output
//! connection log gets a rotation check.
//!
//! Cancellation returns cleanly; a truncated (rotated) syslog restarts the
//! cursor from the top of the file.

use crate::engine::EnforcementEngine;
use crate::logs::ConnectionLog;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const TCP_MARKER: &str = "New TCP connection:";
const UDP_MARKER: &str = "New UDP connection:";

/// Transport of a classified connection record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Proto {
    Tcp,
    Udp,
}

impl Proto {
    pub fn as_str(self) -> &'static str {
        match self {
            Proto::Tcp => "TCP",
            Proto::Udp => "UDP",
        }
    }
}

/// One accepted connection record out of the classifier.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionRecord {
    pub proto: Proto,
    pub src: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
}

/// Classify one raw syslog line. Returns `None` for anything that is not
/// a well-formed, non-loopback connection record.
pub fn classify_line(line: &str) -> Option<ConnectionRecord> {
    let (proto, start) = if let Some(pos) = line.find(TCP_MARKER) {
        (Proto::Tcp, pos + TCP_MARKER.len())
    } else if let Some(pos) = line.find(UDP_MARKER) {
        (Proto::Udp, pos + UDP_MARKER.len())
    } else {
        return None;
    };

    let mut src: Option<IpAddr> = None;
    let mut src_port: Option<u16> = None;
    let mut dst_port: Option<u16> = None;

    for field in line[start..].split_whitespace() {
        if let Some(value) = field.strip_prefix("SRC=") {
            src = value.parse().ok();
        } else if let Some(value) = field.strip_prefix("SPT=") {
            src_port = value.parse().ok();
        } else if let Some(value) = field.strip_prefix("DPT=") {
            dst_port = value.parse().ok();
        }
    }

    let src = src?;
    if src == IpAddr::V4(Ipv4Addr::LOCALHOST) {
        return None;
    }

    Some(ConnectionRecord {
        proto,
        src,
        src_port: src_port?,
        dst_port: dst_port?,
    })
}

/// Follows the kernel syslog and feeds the enforcement engine.
pub struct SyslogTail {
    path: PathBuf,
    poll_interval: Duration,
}

impl SyslogTail {
    pub fn new(path: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            path: path.into(),
            poll_interval,
        }
    }

    /// Run until cancelled. The engine call happens outside any file lock;
    /// a missing syslog is retried on the next poll.
    pub async fn run(
        self,
        engine: Arc<EnforcementEngine>,
        conn_log: Arc<ConnectionLog>,
        token: CancellationToken,
    ) {
        info!(path = %self.path.display(), "syslog tail started");

        let mut file: Option<File> = None;
        let mut offset: u64 = 0;
        let mut pending = String::new();

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("syslog tail stopped");
                    return;
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            if file.is_none() {
                match File::open(&self.path).await {
                    Ok(mut opened) => {
                        // Start at the end: only lines written from now on count.
                        match opened.seek(SeekFrom::End(0)).await {
                            Ok(pos) => {
                                offset = pos;
                                file = Some(opened);
                                debug!(offset, "syslog opened");
                            }
                            Err(e) => {
                                warn!(error = %e, "seek failed; will reopen");
                                continue;
                            }
                        }
                    }
                    Err(e) => {
                        debug!(path = %self.path.display(), error = %e, "syslog not readable yet");
                        continue;
                    }
                }
            }

            // Detect truncation (log rotation of the source file).
            if let Ok(meta) = tokio::fs::metadata(&self.path).await {
                if meta.len() < offset {
                    debug!("syslog truncated; restarting from the top");
                    file = None;
                    offset = 0;
                    pending.clear();
                    continue;
                }
            }

            let handle = file.as_mut().expect("file opened above");
            let mut buf = [0u8; 8192];
            let mut processed_any = false;
            let mut reopen = false;

            loop {
                let read = match handle.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(read) => read,
                    Err(e) => {
                        warn!(error = %e, "syslog read failed; reopening");
                        reopen = true;
                        break;
                    }
                };
                offset += read as u64;
                pending.push_str(&String::from_utf8_lossy(&buf[..read]));

                // Process complete lines; keep any partial trailer.
                while let Some(newline) = pending.find('\n') {
                    let line: String = pending.drain(..=newline).collect();
                    if let Some(record) = classify_line(line.trim_end()) {
                        processed_any = true;
                        engine.process(&record).await;
                    }
                }
            }

            if reopen {
                file = None;
            }

            if processed_any {
                if let Err(e) = conn_log.rotate_if_needed() {
                    warn!(error = %e, "connection log rotation check failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX: &str = "Aug  2 10:15:01 bastion kernel[123]: ";

    #[test]
    fn classifies_tcp_and_udp_lines() {
        let tcp = format!(
            "{}New TCP connection: IN=eth0 SRC=203.0.113.9 DST=10.0.0.1 SPT=51544 DPT=22",
            PREFIX
        );
        let record = classify_line(&tcp).unwrap();
        assert_eq!(record.proto, Proto::Tcp);
        assert_eq!(record.src, "203.0.113.9".parse::<IpAddr>().unwrap());
        assert_eq!(record.src_port, 51544);
        assert_eq!(record.dst_port, 22);

        let udp = format!("{}New UDP connection: SRC=198.51.100.7 SPT=53 DPT=5353", PREFIX);
        assert_eq!(classify_line(&udp).unwrap().proto, Proto::Udp);
    }

    #[test]
    fn rejects_loopback_source() {
        let line = format!(
            "{}New TCP connection: SRC=127.0.0.1 SPT=40000 DPT=22",
            PREFIX
        );
        assert!(classify_line(&line).is_none());
    }

    #[test]
    fn rejects_unrelated_and_incomplete_lines() {
        assert!(classify_line("Aug  2 10:15:01 bastion sshd[9]: Accepted publickey").is_none());
        // Missing DPT.
        let incomplete = format!("{}New TCP connection: SRC=203.0.113.9 SPT=51544", PREFIX);
        assert!(classify_line(&incomplete).is_none());
        // Case matters: the classifier matches the kernel tag verbatim.
        let wrong_case = format!("{}new tcp connection: SRC=203.0.113.9 SPT=1 DPT=2", PREFIX);
        assert!(classify_line(&wrong_case).is_none());
    }

    #[test]
    fn parses_ipv6_sources() {
        let line = format!(
            "{}New TCP connection: SRC=2001:db8::9 SPT=51544 DPT=443",
            PREFIX
        );
        let record = classify_line(&line).unwrap();
        assert_eq!(record.src, "2001:db8::9".parse::<IpAddr>().unwrap());
    }
}
