//! Connection log: plaintext records, rotation, archives, export.
//!
//! The engine appends one pipe-delimited record per accepted classifier
//! line to `connection_attempts.log`. When the file crosses the configured
//! size the tail loop rotates it into
//! `ServerConnectionLogs/connection_attempts_YYYYMMDDHHMMSS.txt.gz`,
//! keeping only the newest `max_log_archives` archives. `exportlogs`
//! writes an AES-CBC-encrypted JSON array of the current log lines.

use crate::server::crypto::PayloadCipher;
use chrono::Utc;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

const ARCHIVE_PREFIX: &str = "connection_attempts_";

/// Writer for the current connection log plus its archive directory.
pub struct ConnectionLog {
    path: PathBuf,
    archive_dir: PathBuf,
    max_size: u64,
    max_archives: usize,
    /// Serializes appends and rotation against each other.
    write_lock: Mutex<()>,
}

impl ConnectionLog {
    pub fn new(
        path: impl Into<PathBuf>,
        archive_dir: impl Into<PathBuf>,
        max_size: u64,
        max_archives: usize,
    ) -> Self {
        Self {
            path: path.into(),
            archive_dir: archive_dir.into(),
            max_size,
            max_archives,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record line.
    pub fn append(&self, line: &str) -> std::io::Result<()> {
        let _guard = self.write_lock.lock().expect("log lock poisoned");
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", line)
    }

    /// Rotate if the current log crossed the size threshold. Returns the
    /// archive path when a rotation happened.
    pub fn rotate_if_needed(&self) -> std::io::Result<Option<PathBuf>> {
        let size = match std::fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(_) => return Ok(None),
        };
        if size < self.max_size {
            return Ok(None);
        }
        self.rotate().map(Some)
    }

    /// Compress the current log into the archive directory, truncate it,
    /// and prune old archives.
    pub fn rotate(&self) -> std::io::Result<PathBuf> {
        let _guard = self.write_lock.lock().expect("log lock poisoned");

        std::fs::create_dir_all(&self.archive_dir)?;
        let stamp = Utc::now().format("%Y%m%d%H%M%S");
        let archive = self
            .archive_dir
            .join(format!("{}{}.txt.gz", ARCHIVE_PREFIX, stamp));

        let mut source = File::open(&self.path)?;
        let mut encoder = GzEncoder::new(File::create(&archive)?, Compression::default());
        std::io::copy(&mut source, &mut encoder)?;
        encoder.finish()?;

        // Truncate in place; the tail keeps appending to the same path.
        File::create(&self.path)?;

        info!(archive = %archive.display(), "connection log rotated");
        self.prune_archives()?;
        Ok(archive)
    }

    /// Delete archives beyond the newest `max_archives`. The timestamped
    /// name sorts chronologically.
    fn prune_archives(&self) -> std::io::Result<()> {
        let mut archives: Vec<PathBuf> = std::fs::read_dir(&self.archive_dir)?
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(ARCHIVE_PREFIX) && n.ends_with(".txt.gz"))
                    .unwrap_or(false)
            })
            .collect();

        archives.sort();
        archives.reverse();

        for stale in archives.iter().skip(self.max_archives) {
            if let Err(e) = std::fs::remove_file(stale) {
                warn!(path = %stale.display(), error = %e, "failed to prune archive");
            } else {
                debug!(path = %stale.display(), "stale archive pruned");
            }
        }
        Ok(())
    }

    /// The last `count` lines of the current log.
    pub fn tail(&self, count: usize) -> std::io::Result<Vec<String>> {
        let lines = self.read_lines()?;
        let skip = lines.len().saturating_sub(count);
        Ok(lines.into_iter().skip(skip).collect())
    }

    /// Export the current log lines as an AES-CBC-encrypted JSON array.
    /// Returns the number of exported lines.
    pub fn export(&self, dest: &Path, cipher: &PayloadCipher) -> std::io::Result<usize> {
        let lines = self.read_lines()?;
        let json = serde_json::to_string(&lines).expect("strings serialize");
        let ciphertext = cipher.encrypt_bytes(json.as_bytes());

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = File::create(dest)?;
        file.write_all(&ciphertext)?;

        info!(dest = %dest.display(), lines = lines.len(), "connection log exported");
        Ok(lines.len())
    }

    fn read_lines(&self) -> std::io::Result<Vec<String>> {
        let mut content = String::new();
        match File::open(&self.path) {
            Ok(mut file) => {
                file.read_to_string(&mut content)?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        }
        Ok(content.lines().map(str::to_string).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;

    fn log_in(dir: &Path, max_size: u64, max_archives: usize) -> ConnectionLog {
        ConnectionLog::new(
            dir.join("connection_attempts.log"),
            dir.join("ServerConnectionLogs"),
            max_size,
            max_archives,
        )
    }

    #[test]
    fn append_and_tail() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(dir.path(), u64::MAX, 3);

        for i in 0..5 {
            log.append(&format!("record {}", i)).unwrap();
        }

        assert_eq!(log.tail(2).unwrap(), vec!["record 3", "record 4"]);
        assert_eq!(log.tail(100).unwrap().len(), 5);
    }

    #[test]
    fn rotation_compresses_and_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(dir.path(), 1, 3);

        log.append("only record").unwrap();
        let archive = log.rotate_if_needed().unwrap().expect("should rotate");

        // Current log is empty again.
        assert!(log.tail(10).unwrap().is_empty());

        // Archive decompresses to the original content.
        let mut decoder = GzDecoder::new(File::open(&archive).unwrap());
        let mut content = String::new();
        decoder.read_to_string(&mut content).unwrap();
        assert_eq!(content, "only record\n");
    }

    #[test]
    fn retention_keeps_newest_archives() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(dir.path(), 1, 2);
        let archive_dir = dir.path().join("ServerConnectionLogs");
        std::fs::create_dir_all(&archive_dir).unwrap();

        // Pre-seed three archives with ascending timestamps.
        for stamp in ["20250101000000", "20250102000000", "20250103000000"] {
            std::fs::write(
                archive_dir.join(format!("connection_attempts_{}.txt.gz", stamp)),
                b"x",
            )
            .unwrap();
        }

        log.append("trigger").unwrap();
        log.rotate().unwrap();

        let mut remaining: Vec<String> = std::fs::read_dir(&archive_dir)
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        remaining.sort();

        assert_eq!(remaining.len(), 2);
        // The two oldest pre-seeded archives are gone.
        assert!(!remaining.contains(&"connection_attempts_20250101000000.txt.gz".to_string()));
        assert!(!remaining.contains(&"connection_attempts_20250102000000.txt.gz".to_string()));
    }

    #[test]
    fn export_round_trips_through_cipher() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(dir.path(), u64::MAX, 3);
        let cipher = PayloadCipher::new(&[3u8; 32], &[5u8; 16]).unwrap();

        log.append("first").unwrap();
        log.append("second").unwrap();

        let dest = dir.path().join("SecureExport").join("dump.bin");
        let count = log.export(&dest, &cipher).unwrap();
        assert_eq!(count, 2);

        let ciphertext = std::fs::read(&dest).unwrap();
        let json = cipher.decrypt_bytes(&ciphertext).unwrap();
        let lines: Vec<String> = serde_json::from_slice(&json).unwrap();
        assert_eq!(lines, vec!["first", "second"]);
    }
}
