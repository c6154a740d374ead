//! Packet-filter driver: iptables invocation and ruleset reload.
//!
//! The driver shells out to the configured iptables binary. It is stateless
//! and never errors out of band: every invocation yields a [`DriverOutcome`]
//! with a success flag and a diagnostic (stderr on failure). Idempotence is
//! the caller's concern; [`crate::blocker::BlockManager`] guards against
//! duplicate installs through the store.
//!
//! Invocations are serialized behind a mutex so concurrent callers cannot
//! interleave rule ordering.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Result of a single packet-filter invocation.
#[derive(Debug, Clone)]
pub struct DriverOutcome {
    pub ok: bool,
    pub detail: String,
}

impl DriverOutcome {
    fn success() -> Self {
        Self {
            ok: true,
            detail: String::new(),
        }
    }

    fn failure(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            detail: detail.into(),
        }
    }
}

/// Static rules applied during a ruleset reload, ahead of the rule files.
#[derive(Debug, Clone)]
pub struct ReloadRules {
    /// Port for the SSH accept rule.
    pub ssh_port: u16,
    /// SYN packets per second admitted before the rate-drop rule matches.
    pub syn_rate_per_sec: u32,
    /// Burst allowance for the SYN limit.
    pub syn_burst: u32,
}

/// Shells out to iptables to install and remove DROP rules.
pub struct FirewallDriver {
    tool: PathBuf,
    lock: Mutex<()>,
}

impl FirewallDriver {
    pub fn new(tool: impl Into<PathBuf>) -> Self {
        Self {
            tool: tool.into(),
            lock: Mutex::new(()),
        }
    }

    /// Insert a DROP for inbound traffic from `addr` at the head of INPUT.
    ///
    /// `duration` is informational; rule expiry is the block manager's job.
    pub async fn block(&self, addr: IpAddr, duration: Duration) -> DriverOutcome {
        let outcome = self
            .run(&[
                "-I",
                "INPUT",
                "1",
                "-s",
                &addr.to_string(),
                "-j",
                "DROP",
            ])
            .await;
        if outcome.ok {
            info!(%addr, duration_secs = duration.as_secs(), "DROP rule installed");
        } else {
            warn!(%addr, detail = %outcome.detail, "failed to install DROP rule");
        }
        outcome
    }

    /// Delete the DROP rule for `addr` from INPUT.
    pub async fn unblock(&self, addr: IpAddr) -> DriverOutcome {
        let outcome = self
            .run(&["-D", "INPUT", "-s", &addr.to_string(), "-j", "DROP"])
            .await;
        if outcome.ok {
            info!(%addr, "DROP rule removed");
        } else {
            warn!(%addr, detail = %outcome.detail, "failed to remove DROP rule");
        }
        outcome
    }

    /// Re-apply the INPUT chain from scratch:
    /// accept-all policy, flush, SSH accept, SYN rate limit, every line of
    /// the given rule files verbatim, drop-all policy, then re-insert a DROP
    /// for each currently blocked address so active blocks survive the flush.
    ///
    /// Returns `(applied, failed)` rule counts.
    pub async fn reload_ruleset(
        &self,
        rules: &ReloadRules,
        rule_files: &[PathBuf],
        blocked: &[IpAddr],
    ) -> (usize, usize) {
        let mut lines: Vec<String> = vec![
            "-P INPUT ACCEPT".to_string(),
            "-F INPUT".to_string(),
            format!(
                "-A INPUT -p tcp --dport {} -j ACCEPT",
                rules.ssh_port
            ),
            format!(
                "-A INPUT -p tcp --syn -m limit --limit {}/s --limit-burst {} -j ACCEPT",
                rules.syn_rate_per_sec, rules.syn_burst
            ),
            "-A INPUT -p tcp --syn -j DROP".to_string(),
        ];

        for path in rule_files {
            lines.extend(read_rule_file(path));
        }

        lines.push("-P INPUT DROP".to_string());

        for addr in blocked {
            lines.push(format!("-I INPUT 1 -s {} -j DROP", addr));
        }

        let mut applied = 0;
        let mut failed = 0;
        for line in &lines {
            let args: Vec<&str> = line.split_whitespace().collect();
            let outcome = self.run(&args).await;
            if outcome.ok {
                applied += 1;
            } else {
                failed += 1;
                warn!(rule = %line, detail = %outcome.detail, "ruleset line rejected");
            }
        }

        info!(applied, failed, "firewall ruleset reloaded");
        (applied, failed)
    }

    async fn run(&self, args: &[&str]) -> DriverOutcome {
        let _guard = self.lock.lock().await;
        debug!(tool = %self.tool.display(), ?args, "invoking packet filter");

        match Command::new(&self.tool).args(args).output().await {
            Ok(output) => {
                if output.status.success() {
                    DriverOutcome::success()
                } else {
                    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                    DriverOutcome::failure(format!(
                        "{} exited with {}: {}",
                        self.tool.display(),
                        output.status,
                        stderr
                    ))
                }
            }
            Err(e) => DriverOutcome::failure(format!(
                "failed to spawn {}: {}",
                self.tool.display(),
                e
            )),
        }
    }
}

/// Read one iptables argument string per line; `#` comments and blanks
/// skipped. A missing file is an empty rule set.
fn read_rule_file(path: &Path) -> Vec<String> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "rule file not readable; skipping");
            return Vec::new();
        }
    };

    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn block_with_stub_tool_succeeds() {
        let driver = FirewallDriver::new("/bin/true");
        let outcome = driver
            .block("1.2.3.4".parse().unwrap(), Duration::from_secs(60))
            .await;
        assert!(outcome.ok);
        assert!(outcome.detail.is_empty());
    }

    #[tokio::test]
    async fn failing_tool_reports_without_panicking() {
        let driver = FirewallDriver::new("/bin/false");
        let outcome = driver.unblock("1.2.3.4".parse().unwrap()).await;
        assert!(!outcome.ok);
        assert!(!outcome.detail.is_empty());
    }

    #[tokio::test]
    async fn missing_tool_reports_spawn_failure() {
        let driver = FirewallDriver::new("/nonexistent/iptables");
        let outcome = driver
            .block("1.2.3.4".parse().unwrap(), Duration::from_secs(1))
            .await;
        assert!(!outcome.ok);
        assert!(outcome.detail.contains("failed to spawn"));
    }

    #[test]
    fn rule_file_parsing_skips_comments_and_blanks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.txt");
        std::fs::write(&path, "# allow dns\n\n-A INPUT -p udp --dport 53 -j ACCEPT\n").unwrap();

        let lines = read_rule_file(&path);
        assert_eq!(lines, vec!["-A INPUT -p udp --dport 53 -j ACCEPT"]);
        assert!(read_rule_file(&dir.path().join("missing.txt")).is_empty());
    }
}
