//! Application configuration loaded from environment variables.

use crate::errors::{PipelineError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file
    pub database_url: String,
    /// Port for the REST API server
    pub api_port: u16,
    /// Payment gateway base URL (hosted checkout + verification endpoints)
    pub gateway_url: String,
    /// Server-side secret key for the payment gateway
    pub gateway_secret: String,
    /// Blob storage service base URL (resumable upload sessions)
    pub storage_url: String,
    /// Entry fee in minor currency units (e.g. kobo)
    pub entry_fee_minor: i64,
    /// ISO currency code for the entry fee
    pub currency: String,
    /// Upper bound on the initiate-to-verify payment round trip, in seconds
    pub payment_timeout_secs: u64,
    /// How often the background sweep re-checks stale pending transactions
    pub reconcile_interval_secs: u64,
    /// Age (seconds) after which a pending transaction counts as stale
    pub reconcile_stale_secs: i64,
    /// Maximum accepted audition file size in bytes
    pub max_file_bytes: u64,
    /// Chunk size for resumable transfers to blob storage
    pub upload_chunk_bytes: usize,
    /// Prefix for formatted submission ids (PREFIX/YY-NNNNN)
    pub id_prefix: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./submissions.db".to_string()),
            api_port: env_var("API_PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse()
                .map_err(|_| PipelineError::Config("Invalid API_PORT".to_string()))?,
            gateway_url: env_var("GATEWAY_URL")
                .unwrap_or_else(|_| "https://api.paystack.co".to_string()),
            gateway_secret: env_var("GATEWAY_SECRET_KEY").map_err(|_| {
                PipelineError::Config(
                    "GATEWAY_SECRET_KEY environment variable is required".to_string(),
                )
            })?,
            storage_url: env_var("STORAGE_URL").map_err(|_| {
                PipelineError::Config("STORAGE_URL environment variable is required".to_string())
            })?,
            entry_fee_minor: env_var("ENTRY_FEE_MINOR")
                .unwrap_or_else(|_| "1000000".to_string())
                .parse()
                .map_err(|_| PipelineError::Config("Invalid ENTRY_FEE_MINOR".to_string()))?,
            currency: env_var("CURRENCY").unwrap_or_else(|_| "NGN".to_string()),
            payment_timeout_secs: env_var("PAYMENT_TIMEOUT_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .map_err(|_| PipelineError::Config("Invalid PAYMENT_TIMEOUT_SECS".to_string()))?,
            reconcile_interval_secs: env_var("RECONCILE_INTERVAL_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .map_err(|_| {
                    PipelineError::Config("Invalid RECONCILE_INTERVAL_SECS".to_string())
                })?,
            reconcile_stale_secs: env_var("RECONCILE_STALE_SECS")
                .unwrap_or_else(|_| "900".to_string())
                .parse()
                .map_err(|_| PipelineError::Config("Invalid RECONCILE_STALE_SECS".to_string()))?,
            max_file_bytes: env_var("MAX_FILE_BYTES")
                .unwrap_or_else(|_| "20971520".to_string())
                .parse()
                .map_err(|_| PipelineError::Config("Invalid MAX_FILE_BYTES".to_string()))?,
            upload_chunk_bytes: env_var("UPLOAD_CHUNK_BYTES")
                .unwrap_or_else(|_| "5242880".to_string())
                .parse()
                .ok()
                .filter(|v: &usize| *v > 0)
                .ok_or_else(|| {
                    PipelineError::Config("Invalid UPLOAD_CHUNK_BYTES".to_string())
                })?,
            id_prefix: env_var("SUBMISSION_ID_PREFIX").unwrap_or_else(|_| "TSA".to_string()),
        })
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| PipelineError::Config(format!("Missing env var: {key}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_chunk_size_is_rejected() {
        std::env::set_var("GATEWAY_SECRET_KEY", "sk_test");
        std::env::set_var("STORAGE_URL", "http://storage.test");

        std::env::set_var("UPLOAD_CHUNK_BYTES", "0");
        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("UPLOAD_CHUNK_BYTES"));

        std::env::set_var("UPLOAD_CHUNK_BYTES", "1024");
        let config = Config::from_env().unwrap();
        assert_eq!(config.upload_chunk_bytes, 1024);
        std::env::remove_var("UPLOAD_CHUNK_BYTES");
    }
}
