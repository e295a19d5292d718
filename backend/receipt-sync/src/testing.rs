//! In-memory collaborators used by unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ethers::types::U256;
use tokio::sync::{Notify, Semaphore};

use crate::errors::{Result, SyncError};
use crate::models::{
    NewNotification, Receipt, ReceiptId, ReceiptKind, ReceiptPatch, SavedVaultMetadata,
};
use crate::store::{ChainReader, Notarizer, NotificationSink, PaymentRequest, ReceiptStore};

pub const WALLET: &str = "0x1111111111111111111111111111111111111111";
pub const VAULT: &str = "0x2222222222222222222222222222222222222222";

pub fn receipt(id: ReceiptId, kind: ReceiptKind, verified: bool) -> Receipt {
    Receipt {
        id,
        wallet_address: WALLET.to_string(),
        vault_address: Some(VAULT.to_string()),
        kind,
        amount: "50.00".to_string(),
        penalty: None,
        purpose: format!("Goal {id}"),
        tx_hash: format!("0xtx{id}"),
        timestamp: id,
        verified,
        notarization_id: verified.then(|| format!("proof-existing-{id}")),
    }
}

// ─────────────────────────────────────────────────────────
// Receipt store
// ─────────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct MemoryStore {
    receipts: Arc<Mutex<Vec<Receipt>>>,
    metadata: Arc<Mutex<HashMap<String, SavedVaultMetadata>>>,
    fail_updates: Arc<Mutex<bool>>,
    fail_queries: Arc<Mutex<bool>>,
    update_calls: Arc<Mutex<usize>>,
}

impl MemoryStore {
    pub fn with_receipts(receipts: Vec<Receipt>) -> Self {
        let store = Self::default();
        *store.receipts.lock().unwrap() = receipts;
        store
    }

    pub fn receipts(&self) -> Vec<Receipt> {
        self.receipts.lock().unwrap().clone()
    }

    pub fn receipt(&self, id: ReceiptId) -> Receipt {
        self.receipts()
            .into_iter()
            .find(|r| r.id == id)
            .expect("receipt exists")
    }

    pub fn put_metadata(&self, metadata: SavedVaultMetadata) {
        self.metadata
            .lock()
            .unwrap()
            .insert(metadata.vault_address.clone(), metadata);
    }

    pub fn set_fail_updates(&self, fail: bool) {
        *self.fail_updates.lock().unwrap() = fail;
    }

    pub fn set_fail_queries(&self, fail: bool) {
        *self.fail_queries.lock().unwrap() = fail;
    }

    pub fn update_calls(&self) -> usize {
        *self.update_calls.lock().unwrap()
    }
}

#[async_trait]
impl ReceiptStore for MemoryStore {
    async fn receipts_for_wallet(&self, wallet: &str) -> Result<Vec<Receipt>> {
        if *self.fail_queries.lock().unwrap() {
            return Err(SyncError::TransientRpc("store offline".to_string()));
        }
        Ok(self
            .receipts()
            .into_iter()
            .filter(|r| r.wallet_address.eq_ignore_ascii_case(wallet))
            .collect())
    }

    async fn get_receipt(&self, id: ReceiptId) -> Result<Option<Receipt>> {
        Ok(self.receipts().into_iter().find(|r| r.id == id))
    }

    async fn update_receipt(&self, id: ReceiptId, patch: &ReceiptPatch) -> Result<()> {
        *self.update_calls.lock().unwrap() += 1;
        if *self.fail_updates.lock().unwrap() {
            return Err(SyncError::TransientRpc("store write rejected".to_string()));
        }
        let mut receipts = self.receipts.lock().unwrap();
        let receipt = receipts
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| SyncError::NotFound(format!("receipt {id}")))?;
        if let Some(verified) = patch.verified {
            receipt.verified |= verified;
        }
        if receipt.notarization_id.is_none() {
            receipt.notarization_id = patch.notarization_id.clone();
        }
        Ok(())
    }

    async fn vault_metadata(&self, vault: &str) -> Result<Option<SavedVaultMetadata>> {
        Ok(self.metadata.lock().unwrap().get(vault).cloned())
    }
}

// ─────────────────────────────────────────────────────────
// Notarization service
// ─────────────────────────────────────────────────────────

/// Notarization fake keyed by idempotency token.
///
/// In strict mode a repeated token is an error, which makes any duplicate
/// submission by the engine fail loudly. Otherwise a repeated token returns
/// the id issued the first time, like the real service.
#[derive(Clone, Default)]
pub struct FakeNotary {
    strict: bool,
    issued: Arc<Mutex<HashMap<String, String>>>,
    calls: Arc<Mutex<Vec<PaymentRequest>>>,
    duplicates: Arc<Mutex<usize>>,
    failing: Arc<Mutex<HashSet<String>>>,
    gate: Arc<Mutex<Option<Arc<Semaphore>>>>,
    pub entered: Arc<Notify>,
}

impl FakeNotary {
    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Self::default()
        }
    }

    /// Make submissions for `token` fail until cleared.
    pub fn fail_token(&self, token: &str) {
        self.failing.lock().unwrap().insert(token.to_string());
    }

    pub fn clear_failures(&self) {
        self.failing.lock().unwrap().clear();
    }

    /// Block every submission until [`FakeNotary::release`] hands out permits.
    pub fn hold(&self) {
        *self.gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self, submissions: usize) {
        if let Some(gate) = self.gate.lock().unwrap().as_ref() {
            gate.add_permits(submissions);
        }
    }

    pub fn calls(&self) -> Vec<PaymentRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn tokens(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .map(|c| c.idempotency_token)
            .collect()
    }

    pub fn duplicates(&self) -> usize {
        *self.duplicates.lock().unwrap()
    }

    pub fn issued(&self) -> usize {
        self.issued.lock().unwrap().len()
    }
}

#[async_trait]
impl Notarizer for FakeNotary {
    async fn submit_payment(&self, request: &PaymentRequest) -> Result<String> {
        self.calls.lock().unwrap().push(request.clone());
        self.entered.notify_one();

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.expect("gate open").forget();
        }

        if self.failing.lock().unwrap().contains(&request.idempotency_token) {
            return Err(SyncError::TransientRpc("service unavailable".to_string()));
        }

        let mut issued = self.issued.lock().unwrap();
        if let Some(existing) = issued.get(&request.idempotency_token) {
            *self.duplicates.lock().unwrap() += 1;
            if self.strict {
                return Err(SyncError::TransientRpc(format!(
                    "duplicate idempotency token {}",
                    request.idempotency_token
                )));
            }
            return Ok(existing.clone());
        }
        let id = format!("proof-{}", issued.len() + 1);
        issued.insert(request.idempotency_token.clone(), id.clone());
        Ok(id)
    }
}

// ─────────────────────────────────────────────────────────
// Notification sink
// ─────────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct RecordingSink {
    sent: Arc<Mutex<Vec<NewNotification>>>,
    fail: Arc<Mutex<bool>>,
}

impl RecordingSink {
    pub fn failing() -> Self {
        let sink = Self::default();
        *sink.fail.lock().unwrap() = true;
        sink
    }

    pub fn sent(&self) -> Vec<NewNotification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(&self, notification: NewNotification) -> Result<()> {
        if *self.fail.lock().unwrap() {
            return Err(SyncError::TransientRpc("notification store down".to_string()));
        }
        self.sent.lock().unwrap().push(notification);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────
// Chain
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct VaultState {
    purpose: String,
    total_assets: U256,
    unlock_timestamp: u64,
}

/// Chain fake; reads for unknown vaults fail like a reverted call.
#[derive(Clone)]
pub struct FakeChain {
    vaults: Arc<Mutex<HashMap<String, VaultState>>>,
    decimals: Arc<Mutex<Option<u32>>>,
    stall_decimals: Arc<Mutex<bool>>,
}

impl Default for FakeChain {
    fn default() -> Self {
        Self {
            vaults: Default::default(),
            decimals: Arc::new(Mutex::new(Some(6))),
            stall_decimals: Default::default(),
        }
    }
}

impl FakeChain {
    pub fn set_vault(&self, vault: &str, purpose: &str, total_assets: u128, unlock_timestamp: u64) {
        self.vaults.lock().unwrap().insert(
            vault.to_string(),
            VaultState {
                purpose: purpose.to_string(),
                total_assets: U256::from(total_assets),
                unlock_timestamp,
            },
        );
    }

    pub fn set_decimals(&self, decimals: Option<u32>) {
        *self.decimals.lock().unwrap() = decimals;
    }

    /// Make `decimals()` hang forever, like an RPC node that never answers.
    pub fn stall_decimals(&self) {
        *self.stall_decimals.lock().unwrap() = true;
    }

    fn vault(&self, vault: &str) -> Result<VaultState> {
        self.vaults
            .lock()
            .unwrap()
            .get(vault)
            .cloned()
            .ok_or_else(|| SyncError::TransientRpc("execution reverted".to_string()))
    }
}

#[async_trait]
impl ChainReader for FakeChain {
    async fn vault_purpose(&self, vault: &str) -> Result<String> {
        Ok(self.vault(vault)?.purpose)
    }

    async fn vault_total_assets(&self, vault: &str) -> Result<U256> {
        Ok(self.vault(vault)?.total_assets)
    }

    async fn vault_unlock_timestamp(&self, vault: &str) -> Result<u64> {
        Ok(self.vault(vault)?.unlock_timestamp)
    }

    async fn vault_beneficiary(&self, _vault: &str) -> Result<String> {
        Err(SyncError::TransientRpc("no beneficiary".to_string()))
    }

    async fn token_decimals(&self) -> Result<u32> {
        let stalled = *self.stall_decimals.lock().unwrap();
        if stalled {
            std::future::pending::<()>().await;
        }
        (*self.decimals.lock().unwrap())
            .ok_or_else(|| SyncError::TransientRpc("decimals unavailable".to_string()))
    }
}
