//! Application configuration loaded from environment variables.

use std::time::Duration;

use crate::errors::{Result, SyncError};

#[derive(Debug, Clone)]
pub struct Config {
    /// EVM JSON-RPC endpoint used for vault reads
    pub rpc_url: String,
    /// ERC-20 token held by the vaults; its `decimals()` scales balances
    pub token_address: String,
    /// Base URL of the notarization service
    pub notary_url: String,
    /// Optional bearer token for the notarization service
    pub notary_api_key: Option<String>,
    /// Path to the SQLite database file
    pub database_url: String,
    /// Port for the REST API server
    pub api_port: u16,
    /// Delay between a wallet connecting and its reconciliation pass
    pub settle_delay_secs: u64,
    /// Pause between two notarization calls within one pass
    pub item_delay_ms: u64,
    /// Precision assumed when the token's `decimals()` cannot be read
    pub fallback_decimals: u32,
    /// Timeout applied to every outbound HTTP request
    pub http_timeout_secs: u64,
    /// Deadline for a single chain read while composing a vault summary
    pub read_timeout_ms: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            rpc_url: env_var("RPC_URL")
                .unwrap_or_else(|_| "https://coston2-api.flare.network/ext/C/rpc".to_string()),
            token_address: env_var("TOKEN_ADDRESS").map_err(|_| {
                SyncError::Config("TOKEN_ADDRESS environment variable is required".to_string())
            })?,
            notary_url: env_var("NOTARY_URL").map_err(|_| {
                SyncError::Config("NOTARY_URL environment variable is required".to_string())
            })?,
            notary_api_key: env_var("NOTARY_API_KEY").ok().filter(|k| !k.is_empty()),
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./receipts.db".to_string()),
            api_port: parsed("API_PORT", "3001")?,
            settle_delay_secs: parsed("SETTLE_DELAY_SECS", "5")?,
            item_delay_ms: parsed("ITEM_DELAY_MS", "1000")?,
            fallback_decimals: parsed("FALLBACK_DECIMALS", "18")?,
            http_timeout_secs: parsed("HTTP_TIMEOUT_SECS", "30")?,
            read_timeout_ms: parsed("READ_TIMEOUT_MS", "3000")?,
        })
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }

    pub fn item_delay(&self) -> Duration {
        Duration::from_millis(self.item_delay_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

fn parsed<T: std::str::FromStr>(key: &str, default: &str) -> Result<T> {
    env_var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| SyncError::Config(format!("Invalid {key}")))
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| SyncError::Config(format!("Missing env var: {key}")))
}
