//! Axum REST API handlers.
//!
//! Identity is supplied by the upstream identity layer as `x-user-*`
//! headers; requests without it are rejected with 401. The handlers are a
//! thin shell over the pipeline modules — no flow state lives here.

use std::sync::Arc;

use axum::{
    extract::{Multipart, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::debug;

use crate::config::Config;
use crate::errors::PipelineError;
use crate::models::UserIdentity;
use crate::payments;
use crate::resolver;
use crate::submit;
use crate::upload::IncomingFile;

#[derive(Clone)]
pub struct ApiState {
    pub pool: SqlitePool,
    pub client: Client,
    pub config: Config,
}

// ─────────────────────────────────────────────────────────
// Request / response shapes
// ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct PaymentRequest {
    pub category: String,
    pub country: String,
}

#[derive(Deserialize)]
pub struct ReferenceRequest {
    pub reference: String,
}

#[derive(Serialize)]
pub struct ConfirmResponse {
    pub status: String,
    pub reference: String,
    pub verified_at: Option<i64>,
}

#[derive(Serialize)]
pub struct CancelResponse {
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct SubmissionResponse {
    pub submission_id: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET /entries/state`
///
/// Resolve the caller's phase in the submission flow from persisted state.
pub async fn get_state(State(state): State<Arc<ApiState>>, headers: HeaderMap) -> Response {
    let Some(user) = identity_from_headers(&headers) else {
        return unauthorized();
    };
    match resolver::resolve_phase(&state.pool, &user.id).await {
        Ok(phase) => (StatusCode::OK, Json(phase)).into_response(),
        Err(e) => error_response(e),
    }
}

/// `POST /entries/payment`
///
/// Open (or short-circuit) the hosted checkout for the entry fee.
pub async fn initiate_payment(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(req): Json<PaymentRequest>,
) -> Response {
    let Some(user) = identity_from_headers(&headers) else {
        return unauthorized();
    };
    match payments::initiate(
        &state.pool,
        &state.client,
        &state.config,
        &user,
        &req.category,
        &req.country,
    )
    .await
    {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(e) => error_response(e),
    }
}

/// `POST /entries/payment/confirm`
///
/// Server-side verification of a client-reported checkout success.
pub async fn confirm_payment(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(req): Json<ReferenceRequest>,
) -> Response {
    let Some(user) = identity_from_headers(&headers) else {
        return unauthorized();
    };
    match payments::confirm(
        &state.pool,
        &state.client,
        &state.config,
        &user.id,
        &req.reference,
    )
    .await
    {
        Ok(tx) => (
            StatusCode::OK,
            Json(ConfirmResponse {
                status: tx.status,
                reference: tx.reference,
                verified_at: tx.verified_at,
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// `POST /entries/payment/cancel`
///
/// Record a user-dismissed checkout. The attempt stays retryable.
pub async fn cancel_payment(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(req): Json<ReferenceRequest>,
) -> Response {
    let Some(user) = identity_from_headers(&headers) else {
        return unauthorized();
    };
    match payments::cancel(&state.pool, &user.id, &req.reference).await {
        Ok(()) => (
            StatusCode::OK,
            Json(CancelResponse {
                status: "cancelled",
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// `POST /entries/submission` (multipart: `category`, `country`, `file`)
///
/// Run the full pipeline: resolve, validate, transfer, commit. Re-entry for
/// a user who already submitted returns their existing id.
pub async fn submit_entry(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Response {
    let Some(user) = identity_from_headers(&headers) else {
        return unauthorized();
    };
    let form = match read_entry_form(multipart).await {
        Ok(form) => form,
        Err(e) => return error_response(e),
    };

    let user_id = user.id.clone();
    let result = submit::run_pipeline(
        &state.pool,
        &state.client,
        &state.config,
        &user,
        &form.category,
        &form.country,
        &form.file,
        move |p| debug!("Upload progress for {user_id}: {p}%"),
    )
    .await;

    match result {
        Ok(submission_id) => {
            (StatusCode::CREATED, Json(SubmissionResponse { submission_id })).into_response()
        }
        Err(e) => error_response(e),
    }
}

// ─────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────

struct EntryForm {
    category: String,
    country: String,
    file: IncomingFile,
}

async fn read_entry_form(mut multipart: Multipart) -> crate::errors::Result<EntryForm> {
    let mut category = String::new();
    let mut country = String::new();
    let mut file: Option<IncomingFile> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| PipelineError::Validation(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "category" => {
                category = field
                    .text()
                    .await
                    .map_err(|e| PipelineError::Validation(e.to_string()))?;
            }
            "country" => {
                country = field
                    .text()
                    .await
                    .map_err(|e| PipelineError::Validation(e.to_string()))?;
            }
            "file" => {
                let name = field.file_name().unwrap_or("audition").to_string();
                let content_type = field.content_type().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| PipelineError::Validation(e.to_string()))?;
                file = Some(IncomingFile {
                    name,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            }
            _ => {}
        }
    }

    let file = file.ok_or_else(|| {
        PipelineError::Validation("multipart field 'file' is required".to_string())
    })?;
    Ok(EntryForm {
        category,
        country,
        file,
    })
}

fn identity_from_headers(headers: &HeaderMap) -> Option<UserIdentity> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(String::from)
    };

    let id = header("x-user-id")?;
    let email = header("x-user-email")?;
    let display_name = header("x-user-name").unwrap_or_else(|| email.clone());
    Some(UserIdentity {
        id,
        email,
        display_name,
    })
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse {
            error: "authenticated identity required".to_string(),
        }),
    )
        .into_response()
}

fn error_response(e: PipelineError) -> Response {
    let status = match &e {
        PipelineError::Validation(_) | PipelineError::InvalidFile(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        PipelineError::PaymentVerificationFailed(_)
        | PipelineError::PaymentCancelled
        | PipelineError::DuplicateSubmission(_) => StatusCode::CONFLICT,
        PipelineError::PaymentTimeout => StatusCode::GATEWAY_TIMEOUT,
        PipelineError::Http(_) | PipelineError::UploadRetryable(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(
                axum::http::HeaderName::try_from(*k).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        map
    }

    #[test]
    fn identity_requires_id_and_email() {
        assert!(identity_from_headers(&headers(&[])).is_none());
        assert!(identity_from_headers(&headers(&[("x-user-id", "u1")])).is_none());
        assert!(identity_from_headers(&headers(&[("x-user-email", "a@b.c")])).is_none());

        let user = identity_from_headers(&headers(&[
            ("x-user-id", "u1"),
            ("x-user-email", "a@b.c"),
            ("x-user-name", "Ada"),
        ]))
        .unwrap();
        assert_eq!(user.id, "u1");
        assert_eq!(user.display_name, "Ada");
    }

    #[test]
    fn display_name_falls_back_to_email() {
        let user = identity_from_headers(&headers(&[
            ("x-user-id", "u1"),
            ("x-user-email", "a@b.c"),
        ]))
        .unwrap();
        assert_eq!(user.display_name, "a@b.c");
    }

    #[test]
    fn blank_identity_headers_are_rejected() {
        assert!(identity_from_headers(&headers(&[
            ("x-user-id", "  "),
            ("x-user-email", "a@b.c"),
        ]))
        .is_none());
    }
}
