//! Long-running background task that re-verifies stale pending payments
//! against the gateway.
//!
//! A user who pays and then closes the tab never calls the confirm endpoint,
//! leaving their transaction stuck at `pending`. This sweep settles such
//! rows on their behalf: verified charges are promoted to `success`,
//! gateway-reported failures to `failed`, and anything the gateway still
//! considers open is left alone for the next pass.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use sqlx::SqlitePool;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::db;
use crate::errors::Result;
use crate::payments;

pub struct ReconcilerState {
    pub pool: SqlitePool,
    pub config: Config,
    pub client: Client,
}

/// Spawn the reconciliation loop as a background [`tokio`] task.
pub async fn run(state: Arc<ReconcilerState>) {
    info!(
        "Reconciler starting — sweep every {}s, pending stale after {}s",
        state.config.reconcile_interval_secs, state.config.reconcile_stale_secs
    );

    loop {
        match sweep_once(&state.pool, &state.client, &state.config).await {
            Ok(settled) if settled > 0 => {
                info!("Reconcile sweep settled {settled} transaction(s)");
            }
            Ok(_) => {}
            Err(e) => {
                error!("Reconcile sweep error: {e}");
            }
        }

        tokio::time::sleep(Duration::from_secs(state.config.reconcile_interval_secs)).await;
    }
}

/// Perform a single sweep. Returns how many transactions were settled.
async fn sweep_once(pool: &SqlitePool, client: &Client, config: &Config) -> Result<usize> {
    let cutoff = Utc::now().timestamp() - config.reconcile_stale_secs;
    let stale = db::stale_pending_transactions(pool, cutoff).await?;

    let mut settled = 0usize;
    for tx in stale {
        let verification =
            match payments::fetch_verification(client, config, &tx.reference).await {
                Ok(v) => v,
                Err(e) => {
                    // Transient or unknown at the gateway; try again next pass.
                    warn!(
                        "Could not re-verify reference {} for user {}: {e}",
                        tx.reference, tx.user_id
                    );
                    continue;
                }
            };

        match verification.status.as_str() {
            "success" => {
                if let Err(reason) =
                    payments::check_verification(&verification, &tx.reference, tx.amount)
                {
                    warn!(
                        "Stale transaction {} verifies but mismatches ({reason}); marking failed",
                        tx.reference
                    );
                    settled += db::mark_transaction_failed(pool, &tx.user_id, &tx.reference)
                        .await? as usize;
                    continue;
                }
                let payload = serde_json::to_string(&verification)?;
                settled += db::mark_transaction_verified(
                    pool,
                    &tx.user_id,
                    &tx.reference,
                    &payload,
                    Utc::now().timestamp(),
                )
                .await? as usize;
                info!(
                    "Recovered abandoned payment for user {} (reference {})",
                    tx.user_id, tx.reference
                );
            }
            "failed" => {
                settled += db::mark_transaction_failed(pool, &tx.user_id, &tx.reference).await?
                    as usize;
            }
            // Still open at the gateway (pending/abandoned/ongoing).
            _ => {}
        }
    }

    Ok(settled)
}
