//! SQLite-backed repository implementations.

mod queue;
mod summaries;
mod util;

pub use util::map_sqlx_error;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

#[derive(Clone)]
pub struct SqliteRepositories {
    pool: Arc<SqlitePool>,
}

impl SqliteRepositories {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Open (creating when missing) the queue database in WAL mode so the
    /// worker and change triggers can share it across processes.
    pub async fn connect(
        url: &str,
        max_connections: u32,
        busy_timeout: Duration,
    ) -> Result<SqlitePool, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(busy_timeout);

        SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
    }

    pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(Into::into)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::SqliteRepositories;

    /// Migrated repositories over a throwaway database file.
    pub(crate) async fn repositories() -> (tempfile::TempDir, SqliteRepositories) {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("queue.db").display());
        let pool = SqliteRepositories::connect(&url, 4, std::time::Duration::from_secs(5))
            .await
            .expect("connect");
        SqliteRepositories::run_migrations(&pool)
            .await
            .expect("migrations");
        (dir, SqliteRepositories::new(pool))
    }
}
