use time::OffsetDateTime;

use crate::application::repos::RepoError;

pub fn map_sqlx_error(err: sqlx::Error) -> RepoError {
    match err {
        sqlx::Error::RowNotFound => RepoError::NotFound,
        sqlx::Error::PoolTimedOut => RepoError::Timeout,
        sqlx::Error::Database(db)
            if db.message().contains("database is locked")
                || db.message().contains("database is busy") =>
        {
            RepoError::Timeout
        }
        sqlx::Error::Database(db) if db.message().contains("CHECK constraint failed") => {
            RepoError::InvalidInput {
                message: db.message().to_string(),
            }
        }
        sqlx::Error::Database(db) if db.message().contains("constraint failed") => {
            RepoError::Integrity {
                message: db.message().to_string(),
            }
        }
        other => RepoError::from_persistence(other),
    }
}

/// Timestamps are stored as unix milliseconds.
pub(super) fn to_millis(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}

pub(super) fn from_millis(millis: i64) -> Result<OffsetDateTime, RepoError> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .map_err(|err| RepoError::from_persistence(format!("invalid timestamp {millis}: {err}")))
}

pub(super) fn now_millis() -> i64 {
    to_millis(OffsetDateTime::now_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_round_trip_truncates_below_millisecond() {
        let at = OffsetDateTime::from_unix_timestamp_nanos(1_700_000_000_123_456_789).unwrap();
        let back = from_millis(to_millis(at)).unwrap();
        assert_eq!(to_millis(back), 1_700_000_000_123);
    }

    #[test]
    fn row_not_found_maps_to_not_found() {
        assert!(matches!(
            map_sqlx_error(sqlx::Error::RowNotFound),
            RepoError::NotFound
        ));
    }
}
