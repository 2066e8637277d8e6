//! Core pipeline records and state types.
//!
//! Everything the pipeline persists lives in one of three tables:
//! `transactions` (one per user), `submissions` (one per user, enforced by a
//! unique index on owner), and `counters` (a single named row for the
//! submission id sequence).

use serde::{Deserialize, Serialize};

/// Review status assigned to every freshly committed submission.
pub const REVIEW_STATUS_PENDING: &str = "pending_review";

/// Lifecycle of an entry-fee payment attempt.
///
/// Transitions only ever go `Pending -> Success` or `Pending -> Failed`;
/// a settled transaction is never reopened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
}

impl TransactionStatus {
    /// Parse the status string stored in the database.
    pub fn parse(s: &str) -> Self {
        match s {
            "success" => Self::Success,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }

    /// Return the identifier string stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

/// Authenticated identity supplied by the upstream identity layer.
/// The pipeline only reads it; credentials are never handled here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    pub email: String,
    pub display_name: String,
}

/// A payment attempt row as stored in / read from the database.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TransactionRecord {
    pub user_id: String,
    pub reference: String,
    pub amount: i64,
    pub currency: String,
    pub status: String,
    pub category: String,
    pub country: String,
    pub created_at: i64,
    pub verified_at: Option<i64>,
    pub verification_payload: Option<String>,
}

impl TransactionRecord {
    pub fn status(&self) -> TransactionStatus {
        TransactionStatus::parse(&self.status)
    }

    pub fn is_verified(&self) -> bool {
        self.status() == TransactionStatus::Success
    }
}

/// A committed audition record as stored in / read from the database.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SubmissionRecord {
    pub submission_id: String,
    pub category: String,
    pub country: String,
    pub original_file_name: String,
    pub file_name: String,
    pub storage_path: String,
    pub public_url: String,
    pub owner_id: String,
    pub owner_email: String,
    pub owner_name: String,
    pub created_at: i64,
    pub review_status: String,
}

/// Where a user currently stands in the submission flow, derived entirely
/// from persisted state (client-held flags are never trusted).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum Phase {
    NoSubmissionNoPayment,
    NoSubmissionPaymentVerified,
    HasSubmission { submission_id: String },
}
