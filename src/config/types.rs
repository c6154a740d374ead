//! Configuration section types.

use super::defaults;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Rate-decision thresholds.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ThresholdConfig {
    /// Attempts inside the window that trigger a block (inclusive).
    #[serde(default = "defaults::threshold_attempts")]
    pub attempts: usize,
    /// Window length in seconds.
    #[serde(default = "defaults::threshold_seconds")]
    pub window_secs: u64,
    /// Block duration applied by automatic decisions.
    #[serde(default = "defaults::default_block_secs")]
    pub default_block_secs: u64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            attempts: defaults::threshold_attempts(),
            window_secs: defaults::threshold_seconds(),
            default_block_secs: defaults::default_block_secs(),
        }
    }
}

/// Syslog tail settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TailConfig {
    #[serde(default = "defaults::syslog_path")]
    pub syslog_path: PathBuf,
    #[serde(default = "defaults::poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            syslog_path: defaults::syslog_path(),
            poll_interval_secs: defaults::poll_interval_secs(),
        }
    }
}

/// Connection-log settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Write the pipe-delimited plaintext record per accepted line.
    #[serde(default = "defaults::yes")]
    pub plaintext_logs: bool,
    /// Rotation threshold for connection_attempts.log.
    #[serde(default = "defaults::max_log_size_bytes")]
    pub max_log_size_bytes: u64,
    /// Rotated archives retained (newest first).
    #[serde(default = "defaults::max_log_archives")]
    pub max_log_archives: usize,
    /// Directory (relative to the base dir) for encrypted log exports.
    #[serde(default = "defaults::secure_export_dir")]
    pub secure_export_dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            plaintext_logs: true,
            max_log_size_bytes: defaults::max_log_size_bytes(),
            max_log_archives: defaults::max_log_archives(),
            secure_export_dir: defaults::secure_export_dir(),
        }
    }
}

/// Command channel settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CommandServerConfig {
    #[serde(default = "defaults::command_port")]
    pub port: u16,
    /// Permit plaintext commands from non-loopback peers.
    #[serde(default = "defaults::no")]
    pub allow_plaintext_commands: bool,
    /// AES key, base64. 16/24/32 bytes decoded.
    #[serde(default)]
    pub aes_key: String,
    /// AES IV, base64. 16 bytes decoded.
    #[serde(default)]
    pub aes_iv: String,
}

impl Default for CommandServerConfig {
    fn default() -> Self {
        Self {
            port: defaults::command_port(),
            allow_plaintext_commands: false,
            aes_key: String::new(),
            aes_iv: String::new(),
        }
    }
}

/// Packet-filter settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FirewallToolConfig {
    #[serde(default = "defaults::firewall_tool")]
    pub tool: PathBuf,
    /// SSH allow-port for the reload sequence. Overridden by the
    /// `ssh_port.config` file or, failing that, the `SSH_PORT` variable.
    #[serde(default = "defaults::ssh_port")]
    pub ssh_port: u16,
    #[serde(default = "defaults::syn_rate_per_sec")]
    pub syn_rate_per_sec: u32,
    #[serde(default = "defaults::syn_burst")]
    pub syn_burst: u32,
}

impl Default for FirewallToolConfig {
    fn default() -> Self {
        Self {
            tool: defaults::firewall_tool(),
            ssh_port: defaults::ssh_port(),
            syn_rate_per_sec: defaults::syn_rate_per_sec(),
            syn_burst: defaults::syn_burst(),
        }
    }
}

/// Periodic-task settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitorConfig {
    /// Expiry sweep period.
    #[serde(default = "defaults::expiry_sweep_secs")]
    pub expiry_sweep_secs: u64,
    #[serde(default = "defaults::portscan_window_secs")]
    pub portscan_window_secs: u64,
    /// Distinct destination ports per window that flag a scan.
    #[serde(default = "defaults::portscan_distinct_ports")]
    pub portscan_distinct_ports: usize,
    /// Inbound bytes/sec that raise BandwidthExceeded. Zero disables.
    #[serde(default)]
    pub bandwidth_limit_bytes_per_sec: u64,
    #[serde(default = "defaults::bandwidth_check_secs")]
    pub bandwidth_check_secs: u64,
    #[serde(default = "defaults::http_window_secs")]
    pub http_window_secs: u64,
    /// HTTP/HTTPS attempts per window that flag a brute force.
    #[serde(default = "defaults::http_max_attempts")]
    pub http_max_attempts: usize,
    #[serde(default = "defaults::cert_check_secs")]
    pub cert_check_secs: u64,
    #[serde(default = "defaults::cert_warn_days")]
    pub cert_warn_days: i64,
    /// Validity assumed for the generated certificate.
    #[serde(default = "defaults::cert_validity_days")]
    pub cert_validity_days: i64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            expiry_sweep_secs: defaults::expiry_sweep_secs(),
            portscan_window_secs: defaults::portscan_window_secs(),
            portscan_distinct_ports: defaults::portscan_distinct_ports(),
            bandwidth_limit_bytes_per_sec: 0,
            bandwidth_check_secs: defaults::bandwidth_check_secs(),
            http_window_secs: defaults::http_window_secs(),
            http_max_attempts: defaults::http_max_attempts(),
            cert_check_secs: defaults::cert_check_secs(),
            cert_warn_days: defaults::cert_warn_days(),
            cert_validity_days: defaults::cert_validity_days(),
        }
    }
}
