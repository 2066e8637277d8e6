//! Submission commit — the last, and only irreversible, step of the flow.

use chrono::Utc;
use reqwest::Client;
use sqlx::SqlitePool;
use tracing::info;

use crate::config::Config;
use crate::db;
use crate::errors::{PipelineError, Result};
use crate::models::{Phase, SubmissionRecord, UserIdentity, REVIEW_STATUS_PENDING};
use crate::resolver;
use crate::sequence;
use crate::upload::{self, IncomingFile, UploadResult};

/// Durably record a completed upload under a freshly allocated id.
///
/// Effectively exactly-once per user: the payment is re-checked at write
/// time (never trusted from an earlier read), and the insert is guarded by
/// the unique owner index, so of two racing commits exactly one creates the
/// record and the other is normalized to the winner's id. An id allocated
/// for the losing side burns; ids are never reused.
pub async fn commit(
    pool: &SqlitePool,
    config: &Config,
    user: &UserIdentity,
    uploaded: &UploadResult,
    category: &str,
    country: &str,
) -> Result<String> {
    if category.trim().is_empty() || country.trim().is_empty() {
        return Err(PipelineError::Validation(
            "category and country are required".to_string(),
        ));
    }

    if let Some(existing) = db::get_submission_by_owner(pool, &user.id).await? {
        return Ok(existing.submission_id);
    }

    let paid = db::get_transaction(pool, &user.id)
        .await?
        .map(|tx| tx.is_verified())
        .unwrap_or(false);
    if !paid {
        return Err(PipelineError::PaymentVerificationFailed(
            "entry fee is not verified for this user".to_string(),
        ));
    }

    let submission_id = sequence::next_submission_id(pool, &config.id_prefix).await?;
    let record = SubmissionRecord {
        submission_id: submission_id.clone(),
        category: category.to_string(),
        country: country.to_string(),
        original_file_name: uploaded.original_file_name.clone(),
        file_name: uploaded.file_name.clone(),
        storage_path: uploaded.storage_path.clone(),
        public_url: uploaded.public_url.clone(),
        owner_id: user.id.clone(),
        owner_email: user.email.clone(),
        owner_name: user.display_name.clone(),
        created_at: Utc::now().timestamp(),
        review_status: REVIEW_STATUS_PENDING.to_string(),
    };

    let rows = db::insert_submission(pool, &record).await?;
    if rows == 0 {
        // Lost the race to a concurrent commit; the allocated id burns.
        let existing = db::get_submission_by_owner(pool, &user.id)
            .await?
            .ok_or_else(|| {
                PipelineError::StateCheckFailed(
                    "submission insert conflicted but no record found".to_string(),
                )
            })?;
        let normalized = PipelineError::DuplicateSubmission(existing.submission_id.clone());
        info!("Commit for user {} normalized: {normalized}", user.id);
        return Ok(existing.submission_id);
    }

    info!("Submission {submission_id} committed for user {}", user.id);
    Ok(submission_id)
}

/// Run the whole flow for a paid user: resolve, transfer, commit.
///
/// Re-entry is harmless — an existing submission is returned as-is and a
/// missing payment is rejected before any byte is transferred.
pub async fn run_pipeline(
    pool: &SqlitePool,
    client: &Client,
    config: &Config,
    user: &UserIdentity,
    category: &str,
    country: &str,
    file: &IncomingFile,
    progress: impl FnMut(u8) + Send,
) -> Result<String> {
    // Local validation comes first: a request without category or country
    // must never cost a storage round trip or leave an orphan blob behind.
    if category.trim().is_empty() || country.trim().is_empty() {
        return Err(PipelineError::Validation(
            "category and country are required".to_string(),
        ));
    }

    match resolver::resolve_phase(pool, &user.id).await? {
        Phase::HasSubmission { submission_id } => Ok(submission_id),
        Phase::NoSubmissionNoPayment => Err(PipelineError::PaymentVerificationFailed(
            "entry fee has not been paid".to_string(),
        )),
        Phase::NoSubmissionPaymentVerified => {
            let uploaded =
                upload::upload(client, config, &user.id, category, file, progress).await?;
            commit(pool, config, user, &uploaded, category, country).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            database_url: "sqlite::memory:".to_string(),
            api_port: 0,
            gateway_url: "http://gateway.invalid".to_string(),
            gateway_secret: "sk_test".to_string(),
            storage_url: "http://storage.invalid".to_string(),
            entry_fee_minor: 1_000_000,
            currency: "NGN".to_string(),
            payment_timeout_secs: 300,
            reconcile_interval_secs: 300,
            reconcile_stale_secs: 900,
            max_file_bytes: 20 * 1024 * 1024,
            upload_chunk_bytes: 5 * 1024 * 1024,
            id_prefix: "TSA".to_string(),
        }
    }

    fn test_user() -> UserIdentity {
        UserIdentity {
            id: "u1".to_string(),
            email: "user@example.com".to_string(),
            display_name: "Test User".to_string(),
        }
    }

    fn uploaded_file() -> UploadResult {
        UploadResult {
            storage_path: "auditions/vocals/u1/take.mp4".to_string(),
            public_url: "https://storage.example/take.mp4".to_string(),
            file_name: "take.mp4".to_string(),
            original_file_name: "take.mp4".to_string(),
        }
    }

    async fn seed_verified_payment(pool: &SqlitePool, user_id: &str) {
        db::upsert_pending_transaction(pool, user_id, "ref-1", 1_000_000, "NGN", "vocals", "NG", 100)
            .await
            .unwrap();
        db::mark_transaction_verified(pool, user_id, "ref-1", "{}", 200)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn commit_requires_verified_payment() {
        let pool = db::test_pool().await;
        let err = commit(&pool, &test_config(), &test_user(), &uploaded_file(), "vocals", "NG")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::PaymentVerificationFailed(_)));
    }

    #[tokio::test]
    async fn pending_payment_is_not_enough() {
        let pool = db::test_pool().await;
        db::upsert_pending_transaction(&pool, "u1", "ref-1", 1_000_000, "NGN", "vocals", "NG", 100)
            .await
            .unwrap();
        let err = commit(&pool, &test_config(), &test_user(), &uploaded_file(), "vocals", "NG")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::PaymentVerificationFailed(_)));
    }

    #[tokio::test]
    async fn repeated_commit_returns_the_same_id() {
        let pool = db::test_pool().await;
        seed_verified_payment(&pool, "u1").await;

        let config = test_config();
        let first = commit(&pool, &config, &test_user(), &uploaded_file(), "vocals", "NG")
            .await
            .unwrap();
        let second = commit(&pool, &config, &test_user(), &uploaded_file(), "vocals", "NG")
            .await
            .unwrap();

        assert_eq!(first, second);
        assert!(first.starts_with("TSA/"));

        // Still exactly one record.
        let stored = db::get_submission_by_owner(&pool, "u1").await.unwrap().unwrap();
        assert_eq!(stored.submission_id, first);
    }

    #[tokio::test]
    async fn losing_commit_is_normalized_to_the_winner() {
        let pool = db::test_pool().await;
        seed_verified_payment(&pool, "u1").await;

        // A concurrent tab already landed its record.
        db::insert_submission(&pool, &db::sample_submission("u1", "TSA/26-00099"))
            .await
            .unwrap();

        let id = commit(&pool, &test_config(), &test_user(), &uploaded_file(), "vocals", "NG")
            .await
            .unwrap();
        assert_eq!(id, "TSA/26-00099");
    }

    #[tokio::test]
    async fn commit_rejects_missing_category() {
        let pool = db::test_pool().await;
        seed_verified_payment(&pool, "u1").await;
        let err = commit(&pool, &test_config(), &test_user(), &uploaded_file(), " ", "NG")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[tokio::test]
    async fn pipeline_rejects_unpaid_users_before_any_transfer() {
        let pool = db::test_pool().await;
        let file = IncomingFile {
            name: "take.mp4".to_string(),
            content_type: "video/mp4".to_string(),
            bytes: vec![0u8; 1024],
        };
        let err = run_pipeline(
            &pool,
            &Client::new(),
            &test_config(),
            &test_user(),
            "vocals",
            "NG",
            &file,
            |_| {},
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PipelineError::PaymentVerificationFailed(_)));
    }

    #[tokio::test]
    async fn pipeline_rejects_missing_category_before_any_transfer() {
        // The storage URL is unroutable: had a transfer been attempted, the
        // error would be UploadRetryable, not Validation.
        let pool = db::test_pool().await;
        seed_verified_payment(&pool, "u1").await;

        let file = IncomingFile {
            name: "take.mp4".to_string(),
            content_type: "video/mp4".to_string(),
            bytes: vec![0u8; 1024],
        };
        let config = test_config();

        let err = run_pipeline(
            &pool,
            &Client::new(),
            &config,
            &test_user(),
            "",
            "NG",
            &file,
            |_| {},
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));

        let err = run_pipeline(
            &pool,
            &Client::new(),
            &config,
            &test_user(),
            "vocals",
            "  ",
            &file,
            |_| {},
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[tokio::test]
    async fn pipeline_is_idempotent_for_submitted_users() {
        let pool = db::test_pool().await;
        db::insert_submission(&pool, &db::sample_submission("u1", "TSA/26-00007"))
            .await
            .unwrap();

        let file = IncomingFile {
            name: "take.mp4".to_string(),
            content_type: "video/mp4".to_string(),
            bytes: vec![0u8; 1024],
        };
        let id = run_pipeline(
            &pool,
            &Client::new(),
            &test_config(),
            &test_user(),
            "vocals",
            "NG",
            &file,
            |_| {},
        )
        .await
        .unwrap();
        assert_eq!(id, "TSA/26-00007");
    }
}
