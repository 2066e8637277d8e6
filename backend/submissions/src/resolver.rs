//! Submission state resolution.
//!
//! Consulted at the start of every request: the user's position in the flow
//! is re-derived from persisted records alone, so a page reload or a second
//! tab always lands back in the right place. Nothing here writes.

use sqlx::SqlitePool;

use crate::db;
use crate::errors::{PipelineError, Result};
use crate::models::Phase;

/// Determine which phase of the flow a user is in.
///
/// Submissions are checked first so a user who already holds one is
/// short-circuited no matter what their transaction row says. A store
/// failure is surfaced as [`PipelineError::StateCheckFailed`] — retryable,
/// and never collapsed into "no submission".
pub async fn resolve_phase(pool: &SqlitePool, user_id: &str) -> Result<Phase> {
    let submission = db::get_submission_by_owner(pool, user_id)
        .await
        .map_err(|e| PipelineError::StateCheckFailed(e.to_string()))?;
    if let Some(sub) = submission {
        return Ok(Phase::HasSubmission {
            submission_id: sub.submission_id,
        });
    }

    let transaction = db::get_transaction(pool, user_id)
        .await
        .map_err(|e| PipelineError::StateCheckFailed(e.to_string()))?;
    match transaction {
        Some(tx) if tx.is_verified() => Ok(Phase::NoSubmissionPaymentVerified),
        _ => Ok(Phase::NoSubmissionNoPayment),
    }
}
