//! Upload management — validation, naming, and the transfer itself.
//!
//! Validation happens entirely before any network call: an oversized or
//! non-video file is rejected without a single byte leaving the process.

use reqwest::Client;
use tracing::info;

use crate::config::Config;
use crate::errors::{PipelineError, Result};
use crate::storage;

/// A file as received from the client, held in memory (the size cap keeps
/// this bounded).
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// What the transfer hands to the record writer.
#[derive(Debug, Clone)]
pub struct UploadResult {
    pub storage_path: String,
    pub public_url: String,
    pub file_name: String,
    pub original_file_name: String,
}

/// Validate and transfer an audition file for a paid user.
///
/// Callers must have established `Phase::NoSubmissionPaymentVerified`
/// beforehand; this function does not consult the stores. Progress reaches
/// the callback as a monotone percentage in `0..=100`.
pub async fn upload(
    client: &Client,
    config: &Config,
    user_id: &str,
    category: &str,
    file: &IncomingFile,
    mut progress: impl FnMut(u8) + Send,
) -> Result<UploadResult> {
    validate(file, config.max_file_bytes)?;

    let file_name = sanitize_file_name(&file.name);
    let path = storage_path(category, user_id, &file_name);

    // Clamp so a storage quirk can never walk progress backwards.
    let mut last = 0u8;
    let mut forward = |p: u8| {
        if p > last {
            last = p;
            progress(p);
        }
    };

    let public_url = storage::upload_object(
        client,
        &config.storage_url,
        &path,
        &file.content_type,
        &file.bytes,
        config.upload_chunk_bytes,
        &mut forward,
    )
    .await?;

    info!(
        "Stored audition for user {user_id}: {} bytes at {path}",
        file.bytes.len()
    );

    Ok(UploadResult {
        storage_path: path,
        public_url,
        file_name,
        original_file_name: file.name.clone(),
    })
}

/// Reject anything that is not a video within the size cap.
pub fn validate(file: &IncomingFile, max_bytes: u64) -> Result<()> {
    if !file.content_type.starts_with("video/") {
        return Err(PipelineError::InvalidFile(format!(
            "only video files are accepted, got '{}'",
            file.content_type
        )));
    }
    if file.bytes.is_empty() {
        return Err(PipelineError::InvalidFile("file is empty".to_string()));
    }
    if file.bytes.len() as u64 > max_bytes {
        return Err(PipelineError::InvalidFile(format!(
            "file is {} bytes, the limit is {max_bytes}",
            file.bytes.len()
        )));
    }
    Ok(())
}

/// Keep word characters, dots, and hyphens; everything else becomes `_`.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.trim_matches('_').is_empty() {
        "audition".to_string()
    } else {
        cleaned
    }
}

/// Namespace the object by category and owner so users can never collide.
pub fn storage_path(category: &str, user_id: &str, file_name: &str) -> String {
    format!("auditions/{category}/{user_id}/{file_name}")
}
