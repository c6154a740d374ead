//! Repository for persisted block records.

use super::{fmt_stored_time, parse_stored_time, DbError};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

/// An active block, as persisted.
#[derive(Debug, Clone)]
pub struct BlockRecord {
    pub address: String,
    pub blocked_at: DateTime<Utc>,
    pub duration_secs: i64,
    pub scheduled_unblock: DateTime<Utc>,
}

impl BlockRecord {
    /// Build a record starting now with the given duration.
    pub fn starting_now(address: String, duration_secs: i64) -> Self {
        let blocked_at = Utc::now();
        Self {
            address,
            blocked_at,
            duration_secs,
            scheduled_unblock: blocked_at + chrono::Duration::seconds(duration_secs),
        }
    }
}

/// Repository for block operations.
pub struct BlockRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> BlockRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace the record for an address. At most one row per
    /// address exists.
    pub async fn upsert(&self, record: &BlockRecord) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO blocked_ips
                (address, blocked_at, duration_seconds, scheduled_unblock)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&record.address)
        .bind(fmt_stored_time(record.blocked_at))
        .bind(record.duration_secs)
        .bind(fmt_stored_time(record.scheduled_unblock))
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Delete the record for an address. Returns whether a row existed.
    pub async fn remove(&self, address: &str) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM blocked_ips WHERE address = ?")
            .bind(address)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Fetch one record.
    pub async fn get(&self, address: &str) -> Result<Option<BlockRecord>, DbError> {
        let row = sqlx::query_as::<_, (String, String, i64, String)>(
            r#"
            SELECT address, blocked_at, duration_seconds, scheduled_unblock
            FROM blocked_ips
            WHERE address = ?
            "#,
        )
        .bind(address)
        .fetch_optional(self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(row_to_record(row)?)),
            None => Ok(None),
        }
    }

    /// All persisted records, ordered by address.
    pub async fn list(&self) -> Result<Vec<BlockRecord>, DbError> {
        let rows = sqlx::query_as::<_, (String, String, i64, String)>(
            r#"
            SELECT address, blocked_at, duration_seconds, scheduled_unblock
            FROM blocked_ips
            ORDER BY address
            "#,
        )
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(row_to_record).collect()
    }

    /// Number of persisted records.
    pub async fn count(&self) -> Result<i64, DbError> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM blocked_ips")
                .fetch_one(self.pool)
                .await?;
        Ok(count)
    }

    /// Delete every record whose scheduled unblock is at or before `now`
    /// and return the deleted rows. Select and delete run in one
    /// transaction so a concurrent upsert cannot slip between them.
    pub async fn remove_expired(&self, now: DateTime<Utc>) -> Result<Vec<BlockRecord>, DbError> {
        let cutoff = fmt_stored_time(now);
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query_as::<_, (String, String, i64, String)>(
            r#"
            SELECT address, blocked_at, duration_seconds, scheduled_unblock
            FROM blocked_ips
            WHERE scheduled_unblock <= ?
            "#,
        )
        .bind(&cutoff)
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM blocked_ips WHERE scheduled_unblock <= ?")
            .bind(&cutoff)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        rows.into_iter().map(row_to_record).collect()
    }
}

fn row_to_record(row: (String, String, i64, String)) -> Result<BlockRecord, DbError> {
    let (address, blocked_at, duration_secs, scheduled_unblock) = row;
    Ok(BlockRecord {
        address,
        blocked_at: parse_stored_time(&blocked_at)?,
        duration_secs,
        scheduled_unblock: parse_stored_time(&scheduled_unblock)?,
    })
}

#[cfg(test)]
mod tests {
    use super::super::Database;
    use super::*;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn upsert_keeps_one_row_per_address() {
        let db = test_db().await;
        let blocks = db.blocks();

        blocks
            .upsert(&BlockRecord::starting_now("1.2.3.4".into(), 60))
            .await
            .unwrap();
        blocks
            .upsert(&BlockRecord::starting_now("1.2.3.4".into(), 120))
            .await
            .unwrap();

        assert_eq!(blocks.count().await.unwrap(), 1);
        let record = blocks.get("1.2.3.4").await.unwrap().unwrap();
        assert_eq!(record.duration_secs, 120);
    }

    #[tokio::test]
    async fn block_then_unblock_restores_row_count() {
        let db = test_db().await;
        let blocks = db.blocks();
        let before = blocks.count().await.unwrap();

        blocks
            .upsert(&BlockRecord::starting_now("10.0.0.1".into(), 60))
            .await
            .unwrap();
        assert!(blocks.remove("10.0.0.1").await.unwrap());
        assert!(!blocks.remove("10.0.0.1").await.unwrap());

        assert_eq!(blocks.count().await.unwrap(), before);
    }

    #[tokio::test]
    async fn remove_expired_is_inclusive_and_returns_rows() {
        let db = test_db().await;
        let blocks = db.blocks();
        let now = Utc::now();

        let expired = BlockRecord {
            address: "10.0.0.1".into(),
            blocked_at: now - chrono::Duration::seconds(61),
            duration_secs: 60,
            scheduled_unblock: now - chrono::Duration::seconds(1),
        };
        let boundary = BlockRecord {
            address: "10.0.0.2".into(),
            blocked_at: now - chrono::Duration::seconds(60),
            duration_secs: 60,
            scheduled_unblock: now,
        };
        let live = BlockRecord {
            address: "10.0.0.3".into(),
            blocked_at: now,
            duration_secs: 60,
            scheduled_unblock: now + chrono::Duration::seconds(60),
        };

        blocks.upsert(&expired).await.unwrap();
        blocks.upsert(&boundary).await.unwrap();
        blocks.upsert(&live).await.unwrap();

        let removed = blocks.remove_expired(now).await.unwrap();
        let mut removed_addresses: Vec<String> =
            removed.into_iter().map(|r| r.address).collect();
        removed_addresses.sort();

        assert_eq!(removed_addresses, vec!["10.0.0.1", "10.0.0.2"]);
        assert_eq!(blocks.count().await.unwrap(), 1);
        assert!(blocks.get("10.0.0.3").await.unwrap().is_some());
    }
}
