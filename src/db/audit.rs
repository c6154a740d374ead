//! Repository for the per-address audit trail: history, tags, comments.
//!
//! Rows are keyed by the address identifier (the UUID minted on first
//! observation), not the address literal.

use super::{fmt_stored_time, parse_stored_time, DbError};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

/// Aggregate history figures for one address.
#[derive(Debug, Clone)]
pub struct AddressStats {
    pub total: i64,
    pub recent_fails: i64,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Repository for history, tag, and comment operations.
pub struct AuditRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> AuditRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    // ========== History ==========

    /// Append one history event. History is append-only.
    pub async fn add_history(
        &self,
        id: Uuid,
        time: DateTime<Utc>,
        message: &str,
    ) -> Result<(), DbError> {
        sqlx::query("INSERT INTO ip_history (id, time, message) VALUES (?, ?, ?)")
            .bind(id.to_string())
            .bind(fmt_stored_time(time))
            .bind(message)
            .execute(self.pool)
            .await?;

        Ok(())
    }

    /// All history events for an address, oldest first.
    pub async fn history(&self, id: Uuid) -> Result<Vec<(DateTime<Utc>, String)>, DbError> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT time, message FROM ip_history WHERE id = ? ORDER BY time",
        )
        .bind(id.to_string())
        .fetch_all(self.pool)
        .await?;

        rows.into_iter()
            .map(|(time, message)| Ok((parse_stored_time(&time)?, message)))
            .collect()
    }

    /// History aggregates: row count, rows whose message mentions "fail"
    /// (case-insensitive), and the newest timestamp.
    pub async fn stats(&self, id: Uuid) -> Result<AddressStats, DbError> {
        let (total, recent_fails, last_seen) =
            sqlx::query_as::<_, (i64, i64, Option<String>)>(
                r#"
                SELECT
                    COUNT(*),
                    COALESCE(SUM(message LIKE '%fail%'), 0),
                    MAX(time)
                FROM ip_history
                WHERE id = ?
                "#,
            )
            .bind(id.to_string())
            .fetch_one(self.pool)
            .await?;

        let last_seen = match last_seen {
            Some(raw) => Some(parse_stored_time(&raw)?),
            None => None,
        };

        Ok(AddressStats {
            total,
            recent_fails,
            last_seen,
        })
    }

    // ========== Tags ==========

    /// Add a tag. Returns `false` if the address already carries it.
    pub async fn add_tag(&self, id: Uuid, tag: &str) -> Result<bool, DbError> {
        let result = sqlx::query("INSERT OR IGNORE INTO ip_tags (id, tag) VALUES (?, ?)")
            .bind(id.to_string())
            .bind(tag)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Remove a tag. Returns whether it existed.
    pub async fn remove_tag(&self, id: Uuid, tag: &str) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM ip_tags WHERE id = ? AND tag = ?")
            .bind(id.to_string())
            .bind(tag)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// All tags for an address, sorted.
    pub async fn tags(&self, id: Uuid) -> Result<Vec<String>, DbError> {
        let rows = sqlx::query_as::<_, (String,)>(
            "SELECT tag FROM ip_tags WHERE id = ? ORDER BY tag",
        )
        .bind(id.to_string())
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(|(tag,)| tag).collect())
    }

    // ========== Comments ==========

    /// Append a comment. Comments are time-ordered and append-only.
    pub async fn add_comment(
        &self,
        id: Uuid,
        time: DateTime<Utc>,
        comment: &str,
    ) -> Result<(), DbError> {
        sqlx::query("INSERT INTO ip_comments (id, time, comment) VALUES (?, ?, ?)")
            .bind(id.to_string())
            .bind(fmt_stored_time(time))
            .bind(comment)
            .execute(self.pool)
            .await?;

        Ok(())
    }

    /// All comments for an address, oldest first.
    pub async fn comments(&self, id: Uuid) -> Result<Vec<(DateTime<Utc>, String)>, DbError> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT time, comment FROM ip_comments WHERE id = ? ORDER BY time",
        )
        .bind(id.to_string())
        .fetch_all(self.pool)
        .await?;

        rows.into_iter()
            .map(|(time, comment)| Ok((parse_stored_time(&time)?, comment)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::super::Database;
    use super::*;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn history_is_append_only_and_ordered() {
        let db = test_db().await;
        let audit = db.audit();
        let id = Uuid::new_v4();
        let base = Utc::now();

        audit
            .add_history(id, base, "Connection attempt")
            .await
            .unwrap();
        audit
            .add_history(id, base + chrono::Duration::seconds(1), "Blocked: rate limit")
            .await
            .unwrap();

        let history = audit.history(id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].1.contains("attempt"));
        assert!(history[1].1.contains("Blocked"));
    }

    #[tokio::test]
    async fn stats_counts_fail_case_insensitively() {
        let db = test_db().await;
        let audit = db.audit();
        let id = Uuid::new_v4();
        let now = Utc::now();

        audit.add_history(id, now, "Auth FAILED for root").await.unwrap();
        audit.add_history(id, now, "login failure").await.unwrap();
        audit.add_history(id, now, "Connection attempt").await.unwrap();

        let stats = audit.stats(id).await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.recent_fails, 2);
        assert!(stats.last_seen.is_some());

        let empty = audit.stats(Uuid::new_v4()).await.unwrap();
        assert_eq!(empty.total, 0);
        assert!(empty.last_seen.is_none());
    }

    #[tokio::test]
    async fn tags_are_unique_per_address() {
        let db = test_db().await;
        let audit = db.audit();
        let id = Uuid::new_v4();

        assert!(audit.add_tag(id, "scanner").await.unwrap());
        assert!(!audit.add_tag(id, "scanner").await.unwrap());
        assert!(audit.add_tag(id, "botnet").await.unwrap());

        assert_eq!(audit.tags(id).await.unwrap(), vec!["botnet", "scanner"]);

        assert!(audit.remove_tag(id, "scanner").await.unwrap());
        assert!(!audit.remove_tag(id, "scanner").await.unwrap());
        assert_eq!(audit.tags(id).await.unwrap(), vec!["botnet"]);
    }

    #[tokio::test]
    async fn comments_round_trip() {
        let db = test_db().await;
        let audit = db.audit();
        let id = Uuid::new_v4();

        audit
            .add_comment(id, Utc::now(), "repeat offender, see ticket 4411")
            .await
            .unwrap();
        let comments = audit.comments(id).await.unwrap();
        assert_eq!(comments.len(), 1);
        assert!(comments[0].1.contains("4411"));
    }
}
