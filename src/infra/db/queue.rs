use std::convert::TryFrom;

use async_trait::async_trait;

use crate::{
    application::repos::{QueueRepo, RepoError},
    domain::{
        entities::Priority,
        types::{QueueIntent, QueueItem},
    },
};

use super::{
    SqliteRepositories, map_sqlx_error,
    util::{from_millis, now_millis},
};

const QUEUE_COLUMNS: &str =
    "url, priority, intent, error, enqueued_at, claimed_at, attempts, version";

#[derive(sqlx::FromRow)]
struct QueueRow {
    url: String,
    priority: i64,
    intent: String,
    error: Option<String>,
    enqueued_at: i64,
    claimed_at: Option<i64>,
    attempts: i64,
    version: i64,
}

impl TryFrom<QueueRow> for QueueItem {
    type Error = RepoError;

    fn try_from(row: QueueRow) -> Result<Self, Self::Error> {
        let intent = row.intent.parse::<QueueIntent>().map_err(|_| {
            RepoError::from_persistence(format!("unknown queue intent `{}`", row.intent))
        })?;
        let priority = Priority::try_from(row.priority).map_err(|_| {
            RepoError::from_persistence(format!("priority {} out of range", row.priority))
        })?;

        Ok(Self {
            url: row.url,
            priority,
            intent,
            enqueued_at: from_millis(row.enqueued_at)?,
            error_message: row.error,
            attempts: row.attempts,
            version: row.version,
            claimed: row.claimed_at.is_some(),
        })
    }
}

#[async_trait]
impl QueueRepo for SqliteRepositories {
    async fn enqueue(
        &self,
        url: &str,
        priority: Priority,
        intent: QueueIntent,
    ) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            INSERT INTO static_pages_queue
                (url, priority, intent, error, enqueued_at, claimed_at, attempts, version)
            VALUES (?1, ?2, ?3, NULL, ?4, NULL, 0, 1)
            ON CONFLICT (url) DO UPDATE SET
                priority = excluded.priority,
                intent = excluded.intent,
                error = NULL,
                claimed_at = NULL,
                version = static_pages_queue.version + 1
            "#,
        )
        .bind(url)
        .bind(i64::from(priority))
        .bind(intent.as_str())
        .bind(now_millis())
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn next_url(&self) -> Result<Option<QueueItem>, RepoError> {
        let sql = format!(
            r#"
            UPDATE static_pages_queue
            SET claimed_at = ?1, attempts = attempts + 1
            WHERE url = (
                SELECT url FROM static_pages_queue
                WHERE error IS NULL AND claimed_at IS NULL
                ORDER BY priority ASC, enqueued_at ASC, rowid ASC
                LIMIT 1
            )
            RETURNING {QUEUE_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, QueueRow>(&sql)
            .bind(now_millis())
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        row.map(QueueItem::try_from).transpose()
    }

    async fn delete_by_url(&self, url: &str) -> Result<(), RepoError> {
        sqlx::query("DELETE FROM static_pages_queue WHERE url = ?1")
            .bind(url)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn mark_error(&self, url: &str, message: &str) -> Result<(), RepoError> {
        sqlx::query("UPDATE static_pages_queue SET error = ?2, claimed_at = NULL WHERE url = ?1")
            .bind(url)
            .bind(message)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn complete(&self, item: &QueueItem) -> Result<bool, RepoError> {
        let deleted = sqlx::query("DELETE FROM static_pages_queue WHERE url = ?1 AND version = ?2")
            .bind(&item.url)
            .bind(item.version)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?
            .rows_affected();

        if deleted > 0 {
            return Ok(true);
        }

        sqlx::query("UPDATE static_pages_queue SET claimed_at = NULL WHERE url = ?1")
            .bind(&item.url)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(false)
    }

    async fn release_claims(&self) -> Result<u64, RepoError> {
        let released = sqlx::query(
            "UPDATE static_pages_queue SET claimed_at = NULL WHERE claimed_at IS NOT NULL",
        )
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?
        .rows_affected();
        Ok(released)
    }

    async fn retry_errored(&self) -> Result<u64, RepoError> {
        let cleared =
            sqlx::query("UPDATE static_pages_queue SET error = NULL WHERE error IS NOT NULL")
                .execute(self.pool())
                .await
                .map_err(map_sqlx_error)?
                .rows_affected();
        Ok(cleared)
    }

    async fn pending_count(&self) -> Result<u64, RepoError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM static_pages_queue WHERE error IS NULL AND claimed_at IS NULL",
        )
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(count.max(0) as u64)
    }

    async fn list(&self) -> Result<Vec<QueueItem>, RepoError> {
        let sql = format!(
            "SELECT {QUEUE_COLUMNS} FROM static_pages_queue \
             ORDER BY priority ASC, enqueued_at ASC, rowid ASC"
        );
        let rows = sqlx::query_as::<_, QueueRow>(&sql)
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        rows.into_iter().map(QueueItem::try_from).collect()
    }
}
