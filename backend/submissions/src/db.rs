//! Database layer — migrations, the three stores, and the counter primitive.

use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tracing::info;

use crate::errors::Result;
use crate::models::{SubmissionRecord, TransactionRecord};

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    // Make sure the file is created if it doesn't exist yet.
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

// ─────────────────────────────────────────────────────────
// Transaction store (keyed by user id)
// ─────────────────────────────────────────────────────────

/// Fetch a user's payment attempt, if any.
pub async fn get_transaction(pool: &SqlitePool, user_id: &str) -> Result<Option<TransactionRecord>> {
    let row = sqlx::query_as::<_, TransactionRecord>(
        r#"
        SELECT user_id, reference, amount, currency, status, category, country,
               created_at, verified_at, verification_payload
        FROM   transactions
        WHERE  user_id = ?1
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Record a fresh checkout attempt as `pending`.
///
/// The guard on the upsert means a settled success is never knocked back to
/// pending; status transitions only move forward.
#[allow(clippy::too_many_arguments)]
pub async fn upsert_pending_transaction(
    pool: &SqlitePool,
    user_id: &str,
    reference: &str,
    amount: i64,
    currency: &str,
    category: &str,
    country: &str,
    created_at: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO transactions
            (user_id, reference, amount, currency, status, category, country, created_at)
        VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6, ?7)
        ON CONFLICT(user_id) DO UPDATE SET
            reference  = excluded.reference,
            amount     = excluded.amount,
            currency   = excluded.currency,
            status     = 'pending',
            category   = excluded.category,
            country    = excluded.country,
            created_at = excluded.created_at
        WHERE transactions.status <> 'success'
        "#,
    )
    .bind(user_id)
    .bind(reference)
    .bind(amount)
    .bind(currency)
    .bind(category)
    .bind(country)
    .bind(created_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Promote a pending transaction to `success`, storing the raw verification
/// payload and timestamp. Returns the number of rows moved (0 when the row
/// was already settled or the reference does not match).
pub async fn mark_transaction_verified(
    pool: &SqlitePool,
    user_id: &str,
    reference: &str,
    payload: &str,
    verified_at: i64,
) -> Result<u64> {
    let rows = sqlx::query(
        r#"
        UPDATE transactions
        SET    status = 'success', verified_at = ?3, verification_payload = ?4
        WHERE  user_id = ?1 AND reference = ?2 AND status = 'pending'
        "#,
    )
    .bind(user_id)
    .bind(reference)
    .bind(verified_at)
    .bind(payload)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows)
}

/// Settle a pending transaction as `failed`.
pub async fn mark_transaction_failed(
    pool: &SqlitePool,
    user_id: &str,
    reference: &str,
) -> Result<u64> {
    let rows = sqlx::query(
        r#"
        UPDATE transactions
        SET    status = 'failed'
        WHERE  user_id = ?1 AND reference = ?2 AND status = 'pending'
        "#,
    )
    .bind(user_id)
    .bind(reference)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows)
}

/// Pending transactions created at or before `cutoff`, for the
/// reconciliation sweep.
pub async fn stale_pending_transactions(
    pool: &SqlitePool,
    cutoff: i64,
) -> Result<Vec<TransactionRecord>> {
    let rows = sqlx::query_as::<_, TransactionRecord>(
        r#"
        SELECT user_id, reference, amount, currency, status, category, country,
               created_at, verified_at, verification_payload
        FROM   transactions
        WHERE  status = 'pending' AND created_at <= ?1
        ORDER  BY created_at ASC
        "#,
    )
    .bind(cutoff)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// ─────────────────────────────────────────────────────────
// Submission store (keyed by owner id)
// ─────────────────────────────────────────────────────────

/// Fetch a user's committed submission, if any.
pub async fn get_submission_by_owner(
    pool: &SqlitePool,
    owner_id: &str,
) -> Result<Option<SubmissionRecord>> {
    let row = sqlx::query_as::<_, SubmissionRecord>(
        r#"
        SELECT submission_id, category, country, original_file_name, file_name,
               storage_path, public_url, owner_id, owner_email, owner_name,
               created_at, review_status
        FROM   submissions
        WHERE  owner_id = ?1
        "#,
    )
    .bind(owner_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Conditionally insert a submission. The unique index on `owner_id` makes
/// this the atomic exists-check-then-write: a concurrent duplicate is
/// silently ignored and reported as 0 rows affected, letting the caller
/// normalize to the record that won.
pub async fn insert_submission(
    pool: &SqlitePool,
    record: &SubmissionRecord,
) -> Result<u64> {
    let rows = sqlx::query(
        r#"
        INSERT OR IGNORE INTO submissions
            (submission_id, category, country, original_file_name, file_name,
             storage_path, public_url, owner_id, owner_email, owner_name,
             created_at, review_status)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        "#,
    )
    .bind(&record.submission_id)
    .bind(&record.category)
    .bind(&record.country)
    .bind(&record.original_file_name)
    .bind(&record.file_name)
    .bind(&record.storage_path)
    .bind(&record.public_url)
    .bind(&record.owner_id)
    .bind(&record.owner_email)
    .bind(&record.owner_name)
    .bind(record.created_at)
    .bind(&record.review_status)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows)
}

// ─────────────────────────────────────────────────────────
// Counter primitive
// ─────────────────────────────────────────────────────────

/// Atomically increment a named counter and return the new value.
///
/// The increment is a single `UPDATE ... RETURNING` statement, so two
/// concurrent callers can never observe the same value (no read-then-write
/// window). The row is created lazily at 0 on first use.
pub async fn next_counter_value(pool: &SqlitePool, name: &str) -> Result<i64> {
    sqlx::query("INSERT INTO counters (name, value) VALUES (?1, 0) ON CONFLICT(name) DO NOTHING")
        .bind(name)
        .execute(pool)
        .await?;

    let value: i64 =
        sqlx::query_scalar("UPDATE counters SET value = value + 1 WHERE name = ?1 RETURNING value")
            .bind(name)
            .fetch_one(pool)
            .await?;
    Ok(value)
}

// ─────────────────────────────────────────────────────────
// Test support
// ─────────────────────────────────────────────────────────

/// In-memory pool for tests. A single connection keeps every query on the
/// same `:memory:` database.
#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

#[cfg(test)]
pub(crate) fn sample_submission(owner_id: &str, submission_id: &str) -> SubmissionRecord {
    use crate::models::REVIEW_STATUS_PENDING;

    SubmissionRecord {
        submission_id: submission_id.to_string(),
        category: "vocals".to_string(),
        country: "NG".to_string(),
        original_file_name: "my audition.mp4".to_string(),
        file_name: "my_audition.mp4".to_string(),
        storage_path: format!("auditions/vocals/{owner_id}/my_audition.mp4"),
        public_url: "https://storage.example/my_audition.mp4".to_string(),
        owner_id: owner_id.to_string(),
        owner_email: "user@example.com".to_string(),
        owner_name: "Test User".to_string(),
        created_at: 1_700_000_000,
        review_status: REVIEW_STATUS_PENDING.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TransactionStatus;

    #[tokio::test]
    async fn pending_upsert_never_downgrades_success() {
        let pool = test_pool().await;
        upsert_pending_transaction(&pool, "u1", "ref-1", 1000, "NGN", "vocals", "NG", 100)
            .await
            .unwrap();
        let moved = mark_transaction_verified(&pool, "u1", "ref-1", "{}", 200)
            .await
            .unwrap();
        assert_eq!(moved, 1);

        // A later checkout attempt must not reopen the settled row.
        upsert_pending_transaction(&pool, "u1", "ref-2", 1000, "NGN", "vocals", "NG", 300)
            .await
            .unwrap();
        let tx = get_transaction(&pool, "u1").await.unwrap().unwrap();
        assert_eq!(tx.status(), TransactionStatus::Success);
        assert_eq!(tx.reference, "ref-1");
    }

    #[tokio::test]
    async fn verify_requires_matching_reference() {
        let pool = test_pool().await;
        upsert_pending_transaction(&pool, "u1", "ref-1", 1000, "NGN", "vocals", "NG", 100)
            .await
            .unwrap();
        let moved = mark_transaction_verified(&pool, "u1", "other-ref", "{}", 200)
            .await
            .unwrap();
        assert_eq!(moved, 0);
        let tx = get_transaction(&pool, "u1").await.unwrap().unwrap();
        assert_eq!(tx.status(), TransactionStatus::Pending);
    }

    #[tokio::test]
    async fn failed_transactions_are_terminal() {
        let pool = test_pool().await;
        upsert_pending_transaction(&pool, "u1", "ref-1", 1000, "NGN", "vocals", "NG", 100)
            .await
            .unwrap();
        assert_eq!(
            mark_transaction_failed(&pool, "u1", "ref-1").await.unwrap(),
            1
        );
        // Already settled; the verify window is closed.
        assert_eq!(
            mark_transaction_verified(&pool, "u1", "ref-1", "{}", 200)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn duplicate_submission_insert_is_ignored() {
        let pool = test_pool().await;
        let first = sample_submission("u1", "TSA/26-00001");
        assert_eq!(insert_submission(&pool, &first).await.unwrap(), 1);

        let second = sample_submission("u1", "TSA/26-00002");
        assert_eq!(insert_submission(&pool, &second).await.unwrap(), 0);

        let stored = get_submission_by_owner(&pool, "u1").await.unwrap().unwrap();
        assert_eq!(stored.submission_id, "TSA/26-00001");
    }

    #[tokio::test]
    async fn stale_pending_selection_respects_cutoff() {
        let pool = test_pool().await;
        upsert_pending_transaction(&pool, "u1", "ref-1", 1000, "NGN", "vocals", "NG", 100)
            .await
            .unwrap();
        upsert_pending_transaction(&pool, "u2", "ref-2", 1000, "NGN", "dance", "NG", 500)
            .await
            .unwrap();

        let stale = stale_pending_transactions(&pool, 200).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].user_id, "u1");
    }

    #[tokio::test]
    async fn counter_values_are_distinct_under_concurrency() {
        let pool = test_pool().await;
        let mut set = tokio::task::JoinSet::new();
        for _ in 0..20 {
            let pool = pool.clone();
            set.spawn(async move { next_counter_value(&pool, "submissions").await.unwrap() });
        }

        let mut values = Vec::new();
        while let Some(res) = set.join_next().await {
            values.push(res.unwrap());
        }
        values.sort_unstable();
        values.dedup();
        assert_eq!(values.len(), 20);
        assert_eq!(values.last(), Some(&20));
    }
}
