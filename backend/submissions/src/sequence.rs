//! Submission id allocation.
//!
//! Ids come from a single persisted counter row, incremented atomically at
//! the storage layer, then formatted as `PREFIX/YY-NNNNN`. Because the
//! counter lives in the database and only ever moves forward, a value is
//! never issued twice, even across restarts. An id allocated for a commit
//! that later fails is burned rather than reused.

use chrono::{DateTime, Datelike, Utc};
use sqlx::SqlitePool;

use crate::db;
use crate::errors::{PipelineError, Result};

/// Name of the counter row backing the submission sequence.
pub const COUNTER_NAME: &str = "submissions";

/// Allocate a fresh formatted submission id.
pub async fn next_submission_id(pool: &SqlitePool, prefix: &str) -> Result<String> {
    let ordinal = db::next_counter_value(pool, COUNTER_NAME)
        .await
        .map_err(|e| PipelineError::AllocationFailed(e.to_string()))?;
    Ok(format_submission_id(prefix, ordinal, Utc::now()))
}

/// `PREFIX/YY-NNNNN`: two-digit year, ordinal zero-padded to 5 digits.
pub fn format_submission_id(prefix: &str, ordinal: i64, now: DateTime<Utc>) -> String {
    format!("{prefix}/{:02}-{ordinal:05}", now.year() % 100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn formats_zero_padded_with_year_suffix() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(format_submission_id("TSA", 42, now), "TSA/26-00042");
        assert_eq!(format_submission_id("TSA", 1, now), "TSA/26-00001");
    }

    #[test]
    fn wide_ordinals_are_not_truncated() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(format_submission_id("TSA", 123_456, now), "TSA/26-123456");
    }

    #[tokio::test]
    async fn sequential_ids_are_distinct_and_increasing() {
        let pool = db::test_pool().await;
        let a = next_submission_id(&pool, "TSA").await.unwrap();
        let b = next_submission_id(&pool, "TSA").await.unwrap();
        assert_ne!(a, b);
        assert!(a.ends_with("00001"));
        assert!(b.ends_with("00002"));
    }

    #[tokio::test]
    async fn counter_survives_restart() {
        // Two pools against the same file stand in for a process restart.
        let path = std::env::temp_dir().join(format!(
            "submissions_seq_test_{}.db",
            std::process::id()
        ));
        let url = format!("sqlite:{}?mode=rwc", path.display());

        let pool = db::init_pool(&url).await.unwrap();
        let before = next_submission_id(&pool, "TSA").await.unwrap();
        pool.close().await;

        let pool = db::init_pool(&url).await.unwrap();
        let after = next_submission_id(&pool, "TSA").await.unwrap();
        pool.close().await;
        let _ = std::fs::remove_file(&path);

        assert!(before.ends_with("00001"));
        assert!(after.ends_with("00002"));
    }
}
