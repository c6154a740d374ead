//! Default values for configuration fields.

use std::path::PathBuf;

pub fn yes() -> bool {
    true
}

pub fn no() -> bool {
    false
}

pub fn threshold_attempts() -> usize {
    5
}

pub fn threshold_seconds() -> u64 {
    60
}

pub fn default_block_secs() -> u64 {
    3600
}

pub fn syslog_path() -> PathBuf {
    PathBuf::from("/var/log/kern.log")
}

pub fn poll_interval_secs() -> u64 {
    2
}

pub fn max_log_size_bytes() -> u64 {
    10 * 1024 * 1024
}

pub fn max_log_archives() -> usize {
    10
}

pub fn secure_export_dir() -> PathBuf {
    PathBuf::from("SecureExport")
}

pub fn command_port() -> u16 {
    53860
}

pub fn firewall_tool() -> PathBuf {
    PathBuf::from("/sbin/iptables")
}

pub fn ssh_port() -> u16 {
    22
}

pub fn syn_rate_per_sec() -> u32 {
    25
}

pub fn syn_burst() -> u32 {
    50
}

pub fn expiry_sweep_secs() -> u64 {
    60
}

pub fn portscan_window_secs() -> u64 {
    30
}

pub fn portscan_distinct_ports() -> usize {
    10
}

pub fn bandwidth_check_secs() -> u64 {
    10
}

pub fn http_window_secs() -> u64 {
    30
}

pub fn http_max_attempts() -> usize {
    20
}

pub fn cert_check_secs() -> u64 {
    3600
}

pub fn cert_warn_days() -> i64 {
    14
}

pub fn cert_validity_days() -> i64 {
    365
}
