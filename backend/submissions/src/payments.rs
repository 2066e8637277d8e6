//! Payment orchestration — hosted checkout handshake and server-side
//! verification against the gateway.
//!
//! ## Trust model
//!
//! The client-side checkout callback is never trusted on its own: a claimed
//! success is always re-verified with an authenticated server-side call
//! before the transaction settles. A `pending` row is persisted before the
//! checkout URL is handed out, so a crash mid-flow leaves a recoverable
//! trace for the reconciliation sweep.

use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::config::Config;
use crate::db;
use crate::errors::{PipelineError, Result};
use crate::models::{TransactionRecord, UserIdentity};

// ─────────────────────────────────────────────────────────
// Gateway response shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct GatewayResponse<T> {
    pub status: bool,
    pub message: String,
    pub data: Option<T>,
}

#[derive(Debug, Deserialize)]
pub struct InitializeData {
    pub authorization_url: String,
}

/// Verification payload returned by `GET /transaction/verify/{reference}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyData {
    pub status: String,
    pub reference: String,
    pub amount: i64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub paid_at: Option<String>,
}

/// Outcome of [`initiate`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InitiateOutcome {
    /// A verified payment already exists; the gateway was not contacted.
    AlreadyVerified { reference: String },
    /// Hosted checkout opened; the UI should redirect the user.
    Checkout {
        reference: String,
        authorization_url: String,
    },
}

// ─────────────────────────────────────────────────────────
// Orchestration
// ─────────────────────────────────────────────────────────

/// Open a hosted checkout for the entry fee.
///
/// Category and country are required up front (they travel in the gateway
/// metadata and later into the submission record). A user whose payment is
/// already verified gets the cached success back without a gateway call.
pub async fn initiate(
    pool: &SqlitePool,
    client: &Client,
    config: &Config,
    user: &UserIdentity,
    category: &str,
    country: &str,
) -> Result<InitiateOutcome> {
    if category.trim().is_empty() || country.trim().is_empty() {
        return Err(PipelineError::Validation(
            "category and country are required".to_string(),
        ));
    }

    if let Some(tx) = db::get_transaction(pool, &user.id).await? {
        if tx.is_verified() {
            info!("User {} already holds a verified payment", user.id);
            return Ok(InitiateOutcome::AlreadyVerified {
                reference: tx.reference,
            });
        }
    }

    let reference = build_reference(&user.id, Utc::now().timestamp_millis(), rand::random());

    // Persist the pending attempt before opening checkout: if we crash after
    // the user pays, the row is still there for confirm/reconcile to settle.
    db::upsert_pending_transaction(
        pool,
        &user.id,
        &reference,
        config.entry_fee_minor,
        &config.currency,
        category,
        country,
        Utc::now().timestamp(),
    )
    .await?;

    let body: GatewayResponse<InitializeData> = client
        .post(format!("{}/transaction/initialize", config.gateway_url))
        .bearer_auth(&config.gateway_secret)
        .json(&json!({
            "email": user.email,
            "amount": config.entry_fee_minor,
            "currency": config.currency,
            "reference": reference,
            "metadata": {
                "user_id": user.id,
                "category": category,
                "country": country,
            },
        }))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let data = body
        .data
        .ok_or(PipelineError::PaymentVerificationFailed(body.message))?;

    Ok(InitiateOutcome::Checkout {
        reference,
        authorization_url: data.authorization_url,
    })
}

/// Settle a client-reported checkout success by verifying it server-side.
///
/// The whole verification round trip is bounded by
/// `config.payment_timeout_secs`; on elapse the transaction is left pending
/// and [`PipelineError::PaymentTimeout`] is returned. A transaction that is
/// already verified short-circuits without contacting the gateway.
pub async fn confirm(
    pool: &SqlitePool,
    client: &Client,
    config: &Config,
    user_id: &str,
    reference: &str,
) -> Result<TransactionRecord> {
    let tx = db::get_transaction(pool, user_id)
        .await?
        .ok_or_else(|| {
            PipelineError::PaymentVerificationFailed("no payment attempt on record".to_string())
        })?;

    if tx.is_verified() {
        return Ok(tx);
    }
    if tx.reference != reference {
        return Err(PipelineError::PaymentVerificationFailed(format!(
            "reference {reference} does not match the recorded attempt"
        )));
    }

    let verification = tokio::time::timeout(
        Duration::from_secs(config.payment_timeout_secs),
        fetch_verification(client, config, reference),
    )
    .await
    .map_err(|_| PipelineError::PaymentTimeout)??;

    // A dismissed checkout is reported as abandoned by the gateway. That is
    // a retryable outcome, not a failure: the row stays pending.
    if verification.status == "abandoned" {
        info!("Checkout for reference {reference} was abandoned; leaving transaction pending");
        return Err(PipelineError::PaymentCancelled);
    }

    if let Err(reason) = check_verification(&verification, reference, config.entry_fee_minor) {
        db::mark_transaction_failed(pool, user_id, reference).await?;
        return Err(PipelineError::PaymentVerificationFailed(reason));
    }

    let payload = serde_json::to_string(&verification)?;
    db::mark_transaction_verified(pool, user_id, reference, &payload, Utc::now().timestamp())
        .await?;
    info!("Payment verified for user {user_id} (reference {reference})");

    db::get_transaction(pool, user_id).await?.ok_or_else(|| {
        PipelineError::StateCheckFailed("transaction vanished after settlement".to_string())
    })
}

/// Record a user-dismissed checkout. The transaction deliberately stays
/// `pending` so the next attempt can pick up where this one left off.
pub async fn cancel(pool: &SqlitePool, user_id: &str, reference: &str) -> Result<()> {
    let Some(tx) = db::get_transaction(pool, user_id).await? else {
        return Err(PipelineError::PaymentVerificationFailed(
            "no payment attempt on record".to_string(),
        ));
    };
    if tx.reference != reference {
        return Err(PipelineError::PaymentVerificationFailed(format!(
            "reference {reference} does not match the recorded attempt"
        )));
    }
    warn!("Checkout dismissed by user {user_id} (reference {reference})");
    Ok(())
}

/// Call the gateway's verification endpoint for a reference.
pub(crate) async fn fetch_verification(
    client: &Client,
    config: &Config,
    reference: &str,
) -> Result<VerifyData> {
    let body: GatewayResponse<VerifyData> = client
        .get(format!(
            "{}/transaction/verify/{reference}",
            config.gateway_url
        ))
        .bearer_auth(&config.gateway_secret)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    body.data
        .ok_or(PipelineError::PaymentVerificationFailed(body.message))
}

/// Match a verification payload against what we charged.
pub(crate) fn check_verification(
    data: &VerifyData,
    reference: &str,
    expected_amount: i64,
) -> std::result::Result<(), String> {
    if data.status != "success" {
        return Err(format!("gateway reports status '{}'", data.status));
    }
    if data.reference != reference {
        return Err(format!(
            "gateway returned reference '{}', expected '{reference}'",
            data.reference
        ));
    }
    if data.amount != expected_amount {
        return Err(format!(
            "amount mismatch: charged {}, expected {expected_amount}",
            data.amount
        ));
    }
    Ok(())
}

/// Per-attempt gateway reference: user id, millisecond timestamp, and a
/// short random nonce so two tabs in the same millisecond still diverge.
/// References are not identity keys, so a collision is merely unlucky.
pub(crate) fn build_reference(user_id: &str, now_ms: i64, nonce: u16) -> String {
    format!("entry-{user_id}-{now_ms}-{nonce:04x}")
}
