//! Collaborator contracts the engine and aggregator are written against.
//!
//! Production implementations live in [`crate::db`], [`crate::rpc`] and
//! [`crate::notary`]; tests substitute in-memory fakes.

use async_trait::async_trait;
use ethers::types::U256;
use serde::Serialize;

use crate::errors::Result;
use crate::models::{NewNotification, Receipt, ReceiptId, ReceiptPatch, SavedVaultMetadata};

/// Document store holding receipts and vault metadata.
#[async_trait]
pub trait ReceiptStore: Send + Sync {
    /// All receipts owned by `wallet`, in store order (newest first).
    async fn receipts_for_wallet(&self, wallet: &str) -> Result<Vec<Receipt>>;

    async fn get_receipt(&self, id: ReceiptId) -> Result<Option<Receipt>>;

    /// Merge `patch` into the stored receipt, leaving unset fields untouched.
    /// `verified` never moves back from `true`.
    async fn update_receipt(&self, id: ReceiptId, patch: &ReceiptPatch) -> Result<()>;

    async fn vault_metadata(&self, vault: &str) -> Result<Option<SavedVaultMetadata>>;
}

/// The payment template submitted for notarization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub amount: String,
    pub from: String,
    pub to: String,
    pub purpose: String,
    /// The on-chain transaction hash; the service deduplicates on it.
    #[serde(rename = "transactionHash")]
    pub idempotency_token: String,
}

/// External proof-issuance service.
#[async_trait]
pub trait Notarizer: Send + Sync {
    /// Returns the service's opaque notarization identifier.
    async fn submit_payment(&self, request: &PaymentRequest) -> Result<String>;
}

/// Append-only sink for user-facing notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notification: NewNotification) -> Result<()>;
}

/// Read-only view of vault contracts and the vault token.
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn vault_purpose(&self, vault: &str) -> Result<String>;

    /// Raw balance in the token's smallest unit.
    async fn vault_total_assets(&self, vault: &str) -> Result<U256>;

    /// Unix seconds.
    async fn vault_unlock_timestamp(&self, vault: &str) -> Result<u64>;

    async fn vault_beneficiary(&self, vault: &str) -> Result<String>;

    async fn token_decimals(&self) -> Result<u32>;
}
