//! Embedded SQLite store.
//!
//! Persists block records and the per-address audit trail (history, tags,
//! comments). Access goes through repository structs borrowing the pool, so
//! the scheduler tick and command server can call concurrently; SQLite
//! serializes the writes.

mod audit;
mod blocks;

pub use audit::{AddressStats, AuditRepository};
pub use blocks::{BlockRecord, BlockRepository};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("invalid stored timestamp: {0}")]
    Timestamp(String),
}

/// Database handle with connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connection acquire timeout - prevents connection storms from blocking
    /// indefinitely.
    const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Maximum time a connection can remain idle before being closed.
    const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Open (creating if missing) the store and run migrations.
    pub async fn open(path: &str) -> Result<Self, DbError> {
        let pool = if path == ":memory:" {
            let options = SqliteConnectOptions::new()
                .filename("file::memory:")
                .shared_cache(true)
                .create_if_missing(true);

            SqlitePoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(Some(Self::IDLE_TIMEOUT))
                .test_before_acquire(true)
                .connect_with(options)
                .await?
        } else {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    if let Err(e) = std::fs::create_dir_all(parent) {
                        tracing::warn!(
                            path = %parent.display(),
                            error = %e,
                            "failed to create database directory"
                        );
                    }
                }
            }

            let options = SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true);

            SqlitePoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(Some(Self::IDLE_TIMEOUT))
                .test_before_acquire(true)
                .connect_with(options)
                .await?
        };

        info!(path = %path, "store connected");

        Self::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    /// Get reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Block record repository.
    pub fn blocks(&self) -> BlockRepository<'_> {
        BlockRepository::new(&self.pool)
    }

    /// History/tags/comments repository.
    pub fn audit(&self) -> AuditRepository<'_> {
        AuditRepository::new(&self.pool)
    }

    async fn run_migrations(pool: &SqlitePool) -> Result<(), DbError> {
        async fn table_exists(pool: &SqlitePool, table: &str) -> bool {
            sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name=?)",
            )
            .bind(table)
            .fetch_one(pool)
            .await
            .unwrap_or(false)
        }

        let tables = ["blocked_ips", "ip_history", "ip_tags", "ip_comments"];
        let mut all_present = true;
        for table in tables {
            if !table_exists(pool, table).await {
                all_present = false;
                break;
            }
        }

        if all_present {
            info!("store already initialized");
            return Ok(());
        }

        Self::run_migration_file(pool, include_str!("../../migrations/001_init.sql")).await;
        info!("store migrations applied (001_init)");
        Ok(())
    }

    /// Run a single migration file, executing each statement.
    async fn run_migration_file(pool: &SqlitePool, migration: &str) {
        for statement in migration.split(';') {
            let sql: Vec<&str> = statement
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with("--"))
                .collect();

            if sql.is_empty() {
                continue;
            }
            let sql = sql.join("\n");

            if let Err(e) = sqlx::query(&sql).execute(pool).await {
                let err_str = e.to_string();
                if !err_str.contains("already exists") {
                    tracing::warn!(sql = %sql, error = %e, "migration statement failed");
                }
            }
        }
    }
}

/// Serialize a timestamp for storage. Fixed microsecond precision keeps
/// SQLite's text comparison chronological.
pub(crate) fn fmt_stored_time(time: chrono::DateTime<chrono::Utc>) -> String {
    time.to_rfc3339_opts(chrono::SecondsFormat::Micros, false)
}

/// Parse a stored RFC 3339 timestamp back to UTC.
pub(crate) fn parse_stored_time(raw: &str) -> Result<chrono::DateTime<chrono::Utc>, DbError> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&chrono::Utc))
        .map_err(|_| DbError::Timestamp(raw.to_string()))
}
