//! Vault state aggregation.
//!
//! Merges the chain's view of a vault (purpose, balance, unlock time,
//! beneficiary, token precision) with the off-chain savings goal. Reads run
//! concurrently, each under its own deadline, and each one may fail on its
//! own: a failed or unfinished read leaves its field unknown instead of
//! failing or stalling the summary.

use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use ethers::types::U256;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::warn;

use crate::decimals;
use crate::errors::{Result, SyncError};
use crate::models::{normalize_address, SavedVaultMetadata, VaultStateSummary};
use crate::store::{ChainReader, ReceiptStore};

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Raw chain reads for one vault; `None` marks a read that has not succeeded.
#[derive(Debug, Clone, Default)]
pub struct ChainSnapshot {
    pub purpose: Option<String>,
    pub total_assets: Option<U256>,
    pub unlock_timestamp: Option<u64>,
    pub beneficiary: Option<String>,
    pub decimals: Option<u32>,
}

pub struct VaultAggregator {
    chain: Arc<dyn ChainReader>,
    store: Arc<dyn ReceiptStore>,
    fallback_decimals: u32,
    read_timeout: Duration,
}

impl VaultAggregator {
    pub fn new(
        chain: Arc<dyn ChainReader>,
        store: Arc<dyn ReceiptStore>,
        fallback_decimals: u32,
        read_timeout: Duration,
    ) -> Self {
        Self {
            chain,
            store,
            fallback_decimals,
            read_timeout,
        }
    }

    /// Run one read under the per-read deadline. Running out of time is
    /// reported like any other failed read.
    async fn bounded<T>(&self, field: &str, read: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.read_timeout, read)
            .await
            .unwrap_or_else(|_| {
                Err(SyncError::TransientRpc(format!(
                    "{field} not read within {:?}",
                    self.read_timeout
                )))
            })
    }

    /// Compose a point-in-time summary. Side-effect free; safe to call again
    /// as previously failed reads recover.
    pub async fn vault_summary(&self, vault: &str) -> Result<VaultStateSummary> {
        let vault = normalize_address(vault)?;

        let (purpose, total_assets, unlock_timestamp, beneficiary, decimals, metadata) = tokio::join!(
            self.bounded("purpose", self.chain.vault_purpose(&vault)),
            self.bounded("totalAssets", self.chain.vault_total_assets(&vault)),
            self.bounded("unlockTimestamp", self.chain.vault_unlock_timestamp(&vault)),
            self.bounded("beneficiary", self.chain.vault_beneficiary(&vault)),
            self.bounded("decimals", self.chain.token_decimals()),
            self.bounded("metadata", self.store.vault_metadata(&vault)),
        );

        let snapshot = ChainSnapshot {
            purpose: known(&vault, "purpose", purpose),
            total_assets: known(&vault, "totalAssets", total_assets),
            unlock_timestamp: known(&vault, "unlockTimestamp", unlock_timestamp),
            beneficiary: known(&vault, "beneficiary", beneficiary),
            decimals: known(&vault, "decimals", decimals),
        };
        let metadata = known(&vault, "metadata", metadata).flatten();

        Ok(compose(
            vault,
            snapshot,
            metadata.as_ref(),
            self.fallback_decimals,
            chrono::Utc::now().timestamp(),
        ))
    }
}

fn known<T>(vault: &str, field: &str, read: Result<T>) -> Option<T> {
    match read {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Vault {vault}: {field} unavailable: {e}");
            None
        }
    }
}

/// Build the summary from already-collected reads. `now` is unix seconds.
pub fn compose(
    vault_address: String,
    snapshot: ChainSnapshot,
    metadata: Option<&SavedVaultMetadata>,
    fallback_decimals: u32,
    now: i64,
) -> VaultStateSummary {
    let (balance, precision) = match snapshot.total_assets {
        Some(raw) => {
            let (value, used) =
                decimals::normalize_or_default(raw, snapshot.decimals, fallback_decimals);
            (Some(value), used)
        }
        None => (
            None,
            snapshot
                .decimals
                .filter(|d| *d <= decimals::MAX_DECIMALS)
                .unwrap_or(fallback_decimals),
        ),
    };

    let is_locked = snapshot
        .unlock_timestamp
        .map(|unlock| u64::try_from(now).map_or(true, |now| now < unlock));

    let target_amount = metadata.and_then(|m| m.target_amount.clone());
    let target = target_amount
        .as_deref()
        .and_then(|t| Decimal::from_str(t.trim()).ok());

    let (progress_percent, remaining) = match (balance.as_deref(), target) {
        (Some(balance), Some(target)) => match Decimal::from_str(balance) {
            Ok(current) => (
                progress(current, target),
                Some((target - current).max(Decimal::ZERO).normalize().to_string()),
            ),
            // Too large for `Decimal`, so past any goal that fits in one.
            Err(_) if target > Decimal::ZERO => (Some(100.0), Some("0".to_string())),
            Err(_) => (None, None),
        },
        _ => (None, None),
    };

    VaultStateSummary {
        vault_address,
        purpose: snapshot.purpose,
        balance,
        decimals: precision,
        unlock_timestamp: snapshot.unlock_timestamp,
        is_locked,
        beneficiary: snapshot.beneficiary,
        target_amount,
        progress_percent,
        remaining,
    }
}

/// `balance / target` as a percentage clamped to `[0, 100]`. A zero or
/// negative target has no meaningful progress and yields `None`.
pub fn progress(balance: Decimal, target: Decimal) -> Option<f64> {
    if target <= Decimal::ZERO {
        return None;
    }
    let ratio = balance.checked_div(target)?.checked_mul(HUNDRED)?;
    ratio
        .clamp(Decimal::ZERO, HUNDRED)
        .round_dp(2)
        .to_f64()
}
