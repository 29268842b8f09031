use std::convert::TryFrom;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::{
    application::repos::{RepoError, SummaryRepo, SummaryUpdate},
    domain::types::SummaryRecord,
};

use super::{
    SqliteRepositories, map_sqlx_error,
    util::{from_millis, now_millis, to_millis},
};

#[derive(sqlx::FromRow)]
struct SummaryRow {
    id: i64,
    pid: i64,
    pages: i64,
    total_time: f64,
    average_time: f64,
    memory_usage_mb: f64,
    finished: bool,
    updated_at: i64,
}

impl TryFrom<SummaryRow> for SummaryRecord {
    type Error = RepoError;

    fn try_from(row: SummaryRow) -> Result<Self, Self::Error> {
        let pid = u32::try_from(row.pid)
            .map_err(|_| RepoError::from_persistence(format!("invalid pid {}", row.pid)))?;

        Ok(Self {
            id: row.id,
            pid,
            pages_built: row.pages.max(0) as u64,
            total_time_secs: row.total_time,
            average_time_secs: row.average_time,
            memory_usage_mb: row.memory_usage_mb,
            finished: row.finished,
            timestamp: from_millis(row.updated_at)?,
        })
    }
}

#[async_trait]
impl SummaryRepo for SqliteRepositories {
    async fn record_summary(
        &self,
        id: Option<i64>,
        summary: &SummaryUpdate,
    ) -> Result<i64, RepoError> {
        let now = now_millis();
        let pages = i64::try_from(summary.pages_built).map_err(|_| RepoError::InvalidInput {
            message: format!("page count {} out of range", summary.pages_built),
        })?;

        if let Some(id) = id {
            let updated = sqlx::query(
                r#"
                UPDATE build_summaries
                SET pid = ?2, pages = ?3, total_time = ?4, average_time = ?5,
                    memory_usage_mb = ?6, finished = ?7, updated_at = ?8
                WHERE id = ?1
                "#,
            )
            .bind(id)
            .bind(i64::from(summary.pid))
            .bind(pages)
            .bind(summary.total_time_secs)
            .bind(summary.average_time_secs)
            .bind(summary.memory_usage_mb)
            .bind(summary.finished)
            .bind(now)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?
            .rows_affected();

            if updated > 0 {
                return Ok(id);
            }
        }

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO build_summaries
                (pid, pages, total_time, average_time, memory_usage_mb, finished, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
            RETURNING id
            "#,
        )
        .bind(i64::from(summary.pid))
        .bind(pages)
        .bind(summary.total_time_secs)
        .bind(summary.average_time_secs)
        .bind(summary.memory_usage_mb)
        .bind(summary.finished)
        .bind(now)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(id)
    }

    async fn prune_summaries(&self, cutoff: OffsetDateTime) -> Result<u64, RepoError> {
        let removed = sqlx::query("DELETE FROM build_summaries WHERE updated_at < ?1")
            .bind(to_millis(cutoff))
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?
            .rows_affected();
        Ok(removed)
    }

    async fn list_summaries(&self, limit: u32) -> Result<Vec<SummaryRecord>, RepoError> {
        let rows = sqlx::query_as::<_, SummaryRow>(
            r#"
            SELECT id, pid, pages, total_time, average_time, memory_usage_mb, finished, updated_at
            FROM build_summaries
            ORDER BY updated_at DESC, id DESC
            LIMIT ?1
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(SummaryRecord::try_from).collect()
    }
}
