//! Blob storage client — resumable, chunked object uploads.
//!
//! ## Protocol
//!
//! * `POST {storage}/upload?name={path}` opens a session; the session URI
//!   comes back in the `Location` header.
//! * Each chunk is `PUT` to the session URI with a `Content-Range` header.
//!   Intermediate chunks are acknowledged with `308`; the final chunk
//!   returns `200`/`201` with a JSON body carrying the public URL.
//!
//! ## Resilience
//!
//! Transient failures (connection errors, 5xx, 429) are retried per chunk
//! with exponential back-off up to [`MAX_ATTEMPTS`]; exhausting the budget
//! surfaces as retryable so the caller can re-invoke with the same file.
//! `401`/`403` are terminal and never retried.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::errors::{PipelineError, Result};

const MAX_ATTEMPTS: u32 = 4;
const INITIAL_BACKOFF_SECS: u64 = 2;
const MAX_BACKOFF_SECS: u64 = 16;

#[derive(Debug, Deserialize)]
struct CompleteResponse {
    /// Durable, publicly resolvable URL of the stored object.
    url: String,
}

/// Stream `bytes` to storage under `path`, reporting progress as each chunk
/// lands. Returns the public URL issued on completion.
///
/// Progress is a percentage in `0..=100` and only ever moves forward; a
/// retried chunk re-reports nothing until it succeeds.
pub async fn upload_object(
    client: &Client,
    storage_url: &str,
    path: &str,
    content_type: &str,
    bytes: &[u8],
    chunk_bytes: usize,
    progress: &mut (dyn FnMut(u8) + Send),
) -> Result<String> {
    let session_uri = open_session(client, storage_url, path, content_type, bytes.len()).await?;
    let total = bytes.len();

    let mut final_body: Option<CompleteResponse> = None;
    for (start, end) in chunk_ranges(total, chunk_bytes) {
        let chunk = &bytes[start..=end];
        let response = put_chunk(client, &session_uri, content_type, chunk, start, end, total).await?;

        if response.status() == StatusCode::OK || response.status() == StatusCode::CREATED {
            final_body = Some(response.json().await?);
        }
        progress(percent_done(end, total));
    }

    let body = final_body.ok_or_else(|| {
        PipelineError::UploadRetryable("storage never finalized the session".to_string())
    })?;
    debug!("Upload complete: {path} -> {}", body.url);
    Ok(body.url)
}

/// Open a resumable session and return its URI.
async fn open_session(
    client: &Client,
    storage_url: &str,
    path: &str,
    content_type: &str,
    total_bytes: usize,
) -> Result<String> {
    let mut backoff = INITIAL_BACKOFF_SECS;

    for attempt in 1..=MAX_ATTEMPTS {
        let response = client
            .post(format!("{storage_url}/upload"))
            .query(&[("name", path)])
            .header("x-upload-content-type", content_type)
            .header("x-upload-content-length", total_bytes.to_string())
            .send()
            .await;

        match response {
            Err(e) => {
                if attempt == MAX_ATTEMPTS {
                    return Err(PipelineError::UploadRetryable(e.to_string()));
                }
                warn!("Storage session open failed (will retry in {backoff}s): {e}");
            }
            Ok(resp) => {
                let status = resp.status();
                if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                    return Err(PipelineError::UploadUnauthorized(format!(
                        "storage returned {status} opening session for {path}"
                    )));
                }
                if status.is_success() {
                    return resp
                        .headers()
                        .get(reqwest::header::LOCATION)
                        .and_then(|v| v.to_str().ok())
                        .map(String::from)
                        .ok_or_else(|| {
                            PipelineError::UploadRetryable(
                                "storage session response had no location".to_string(),
                            )
                        });
                }
                if attempt == MAX_ATTEMPTS {
                    return Err(PipelineError::UploadRetryable(format!(
                        "storage returned {status} opening session"
                    )));
                }
                warn!("Storage returned {status} opening session (will retry in {backoff}s)");
            }
        }

        tokio::time::sleep(Duration::from_secs(backoff)).await;
        backoff = (backoff * 2).min(MAX_BACKOFF_SECS);
    }

    unreachable!("session loop returns on the final attempt")
}

/// `PUT` one chunk, retrying transient failures.
async fn put_chunk(
    client: &Client,
    session_uri: &str,
    content_type: &str,
    chunk: &[u8],
    start: usize,
    end: usize,
    total: usize,
) -> Result<reqwest::Response> {
    let range = format!("bytes {start}-{end}/{total}");
    let mut backoff = INITIAL_BACKOFF_SECS;

    for attempt in 1..=MAX_ATTEMPTS {
        let response = client
            .put(session_uri)
            .header(reqwest::header::CONTENT_RANGE, &range)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(chunk.to_vec())
            .send()
            .await;

        match response {
            Err(e) => {
                if attempt == MAX_ATTEMPTS {
                    return Err(PipelineError::UploadRetryable(e.to_string()));
                }
                warn!("Chunk {range} failed (will retry in {backoff}s): {e}");
            }
            Ok(resp) => {
                let status = resp.status();
                if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                    return Err(PipelineError::UploadUnauthorized(format!(
                        "storage returned {status} for chunk {range}"
                    )));
                }
                // 308 acknowledges an intermediate chunk; 200/201 close out
                // the session on the final one.
                if status == StatusCode::PERMANENT_REDIRECT
                    || status == StatusCode::OK
                    || status == StatusCode::CREATED
                {
                    return Ok(resp);
                }
                if attempt == MAX_ATTEMPTS {
                    return Err(PipelineError::UploadRetryable(format!(
                        "storage returned {status} for chunk {range}"
                    )));
                }
                warn!("Storage returned {status} for chunk {range} (will retry in {backoff}s)");
            }
        }

        tokio::time::sleep(Duration::from_secs(backoff)).await;
        backoff = (backoff * 2).min(MAX_BACKOFF_SECS);
    }

    unreachable!("chunk loop returns on the final attempt")
}

/// Split `total` bytes into inclusive `(start, end)` chunk ranges.
/// A zero chunk size is clamped to one byte; config rejects it upstream.
pub(crate) fn chunk_ranges(total: usize, chunk_bytes: usize) -> Vec<(usize, usize)> {
    let step = chunk_bytes.max(1);
    let mut ranges = Vec::new();
    let mut start = 0;
    while start < total {
        let end = (start + step).min(total) - 1;
        ranges.push((start, end));
        start = end + 1;
    }
    ranges
}

/// Percentage of `total` covered once the byte at `end` has landed.
pub(crate) fn percent_done(end: usize, total: usize) -> u8 {
    (((end + 1) * 100) / total) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_ranges_cover_every_byte_once() {
        let ranges = chunk_ranges(10, 4);
        assert_eq!(ranges, vec![(0, 3), (4, 7), (8, 9)]);
    }

    #[test]
    fn exact_multiple_has_no_tail_chunk() {
        let ranges = chunk_ranges(8, 4);
        assert_eq!(ranges, vec![(0, 3), (4, 7)]);
    }

    #[test]
    fn zero_chunk_size_does_not_underflow() {
        let ranges = chunk_ranges(3, 0);
        assert_eq!(ranges, vec![(0, 0), (1, 1), (2, 2)]);
    }

    #[test]
    fn single_chunk_when_file_is_smaller() {
        let ranges = chunk_ranges(3, 1024);
        assert_eq!(ranges, vec![(0, 2)]);
    }

    #[test]
    fn progress_is_monotone_and_ends_at_100() {
        let ranges = chunk_ranges(10, 3);
        let percents: Vec<u8> = ranges.iter().map(|&(_, end)| percent_done(end, 10)).collect();
        assert!(percents.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(percents.last(), Some(&100));
    }
}
