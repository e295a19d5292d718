//! Application-wide error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// An on-chain read or notarization call failed; retried on the next pass.
    #[error("Transient RPC error: {0}")]
    TransientRpc(String),

    /// Malformed address or missing required field.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Persisting a verification failed after the notarization succeeded.
    #[error("Store update error: {0}")]
    StoreUpdate(String),

    #[error("Invalid token decimals: {0}")]
    InvalidDecimals(u32),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl SyncError {
    /// Errors that are expected to clear up on a later reconciliation pass.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::TransientRpc(_) | Self::Http(_) | Self::StoreUpdate(_) | Self::Database(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
