//! Service configuration.
//!
//! Loaded from `FirewallConfig/firewallconfig.yaml` under the base
//! directory; a default file (with a freshly generated AES key and IV) is
//! materialized on first run. All relative paths in the on-disk layout are
//! resolved against the base directory.

mod defaults;
mod types;

pub use types::{
    CommandServerConfig, FirewallToolConfig, LoggingConfig, MonitorConfig, TailConfig,
    ThresholdConfig,
};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Configuration errors. Fatal at startup; a reload that fails leaves the
/// previous configuration in force.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("aes_key must decode to 16, 24, or 32 bytes (got {0})")]
    BadKeyLength(usize),
    #[error("aes_iv must decode to 16 bytes (got {0})")]
    BadIvLength(usize),
    #[error("aes_key/aes_iv are not valid base64: {0}")]
    BadBase64(#[from] base64::DecodeError),
}

/// Service configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub thresholds: ThresholdConfig,
    #[serde(default)]
    pub tail: TailConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub command_server: CommandServerConfig,
    #[serde(default)]
    pub firewall: FirewallToolConfig,
    #[serde(default)]
    pub monitors: MonitorConfig,

    /// Base directory the on-disk layout hangs off. Set by the loader.
    #[serde(skip)]
    pub base_dir: PathBuf,
    #[serde(skip)]
    key_bytes: Vec<u8>,
    #[serde(skip)]
    iv_bytes: Vec<u8>,
}

impl Config {
    /// Load the configuration under `base_dir`, materializing a default
    /// file on first run.
    pub fn load_or_init(base_dir: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let base_dir = base_dir.into();
        let path = base_dir.join("FirewallConfig").join("firewallconfig.yaml");

        if !path.exists() {
            let mut fresh = Config::fresh_default();
            fresh.base_dir = base_dir.clone();
            fresh.write_to(&path)?;
            info!(path = %path.display(), "default configuration materialized");
        }

        let content = std::fs::read_to_string(&path)?;
        let mut config: Config = serde_yaml::from_str(&content)?;
        config.base_dir = base_dir;
        config.decode_key_material()?;
        Ok(config)
    }

    /// A default configuration with a freshly generated AES-256 key and IV.
    pub fn fresh_default() -> Self {
        let mut key = [0u8; 32];
        let mut iv = [0u8; 16];
        rand::rng().fill_bytes(&mut key);
        rand::rng().fill_bytes(&mut iv);

        let mut config = Config {
            thresholds: ThresholdConfig::default(),
            tail: TailConfig::default(),
            logging: LoggingConfig::default(),
            command_server: CommandServerConfig::default(),
            firewall: FirewallToolConfig::default(),
            monitors: MonitorConfig::default(),
            base_dir: PathBuf::new(),
            key_bytes: Vec::new(),
            iv_bytes: Vec::new(),
        };
        config.command_server.aes_key = BASE64.encode(key);
        config.command_server.aes_iv = BASE64.encode(iv);
        config
            .decode_key_material()
            .expect("generated key material is valid");
        config
    }

    fn write_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_yaml::to_string(self).expect("config serializes"))?;
        Ok(())
    }

    /// Decode and validate the AES key and IV.
    fn decode_key_material(&mut self) -> Result<(), ConfigError> {
        let key = BASE64.decode(self.command_server.aes_key.trim())?;
        if !matches!(key.len(), 16 | 24 | 32) {
            return Err(ConfigError::BadKeyLength(key.len()));
        }
        let iv = BASE64.decode(self.command_server.aes_iv.trim())?;
        if iv.len() != 16 {
            return Err(ConfigError::BadIvLength(iv.len()));
        }
        self.key_bytes = key;
        self.iv_bytes = iv;
        Ok(())
    }

    /// Decoded AES key (16/24/32 bytes).
    pub fn command_key(&self) -> &[u8] {
        &self.key_bytes
    }

    /// Decoded AES IV (16 bytes).
    pub fn command_iv(&self) -> &[u8] {
        &self.iv_bytes
    }

    /// SSH allow-port for the reload sequence: `ssh_port.config` under the
    /// base dir wins, then the `SSH_PORT` environment variable, then the
    /// configured value.
    pub fn resolve_ssh_port(&self) -> u16 {
        let file = self.base_dir.join("ssh_port.config");
        if let Ok(content) = std::fs::read_to_string(&file) {
            if let Ok(port) = content.trim().parse::<u16>() {
                return port;
            }
        }
        if let Ok(raw) = std::env::var("SSH_PORT") {
            if let Ok(port) = raw.trim().parse::<u16>() {
                return port;
            }
        }
        self.firewall.ssh_port
    }

    // ===== on-disk layout =====

    pub fn blocklist_path(&self) -> PathBuf {
        self.base_dir.join("BlockList").join("blocklist.txt")
    }

    pub fn whitelist_path(&self) -> PathBuf {
        self.base_dir.join("Whitelist").join("whitelist.txt")
    }

    pub fn blocked_countries_path(&self) -> PathBuf {
        self.base_dir.join("GeoBlock").join("blocked_countries.txt")
    }

    pub fn zones_dir(&self) -> PathBuf {
        self.base_dir.join("GeoBlock").join("zones")
    }

    pub fn rule_files(&self) -> Vec<PathBuf> {
        let dir = self.base_dir.join("FirewallRuleSet");
        vec![dir.join("rules.txt"), dir.join("custom_rules.txt")]
    }

    pub fn database_path(&self) -> PathBuf {
        self.base_dir.join("Database").join("firewall.db")
    }

    pub fn connection_log_path(&self) -> PathBuf {
        self.base_dir.join("connection_attempts.log")
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.base_dir.join("ServerConnectionLogs")
    }

    pub fn secure_export_dir(&self) -> PathBuf {
        self.base_dir.join(&self.logging.secure_export_dir)
    }

    pub fn certificate_path(&self) -> PathBuf {
        self.base_dir.join("certificate.pem")
    }

    pub fn certificate_key_path(&self) -> PathBuf {
        self.base_dir.join("certificate.key")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn materializes_and_reloads_defaults() {
        let dir = tempfile::tempdir().unwrap();

        let first = Config::load_or_init(dir.path()).unwrap();
        assert_eq!(first.command_server.port, 53860);
        assert_eq!(first.command_key().len(), 32);
        assert_eq!(first.command_iv().len(), 16);

        // Second load reads the same materialized key.
        let second = Config::load_or_init(dir.path()).unwrap();
        assert_eq!(first.command_key(), second.command_key());
    }

    #[test]
    fn rejects_bad_key_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("FirewallConfig").join("firewallconfig.yaml");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            "command_server:\n  aes_key: AAAA\n  aes_iv: AAAAAAAAAAAAAAAAAAAAAA==\n",
        )
        .unwrap();

        let err = Config::load_or_init(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::BadKeyLength(3)));
    }

    #[test]
    fn ssh_port_file_wins_over_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_init(dir.path()).unwrap();
        assert_eq!(config.resolve_ssh_port(), 22);

        std::fs::write(dir.path().join("ssh_port.config"), "2222\n").unwrap();
        assert_eq!(config.resolve_ssh_port(), 2222);
    }
}
