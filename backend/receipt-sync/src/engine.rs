//! Receipt reconciliation.
//!
//! A pass pulls every receipt of a wallet, keeps the ones that are still
//! unverified and tied to a vault, and notarizes them one at a time. Each
//! success is persisted as a merge-patch and announced with a notification.
//! A failed item is logged and left for the next pass; nothing inside the
//! loop aborts the batch.
//!
//! At most one pass per wallet runs at a time in this process. Passes for
//! different wallets are independent. Across processes the notarization
//! service's idempotency key (the transaction hash) is what prevents
//! duplicate proofs.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::errors::{Result, SyncError};
use crate::models::{
    normalize_address, validate_amount, NewNotification, Receipt, ReceiptPatch, Severity,
};
use crate::store::{Notarizer, NotificationSink, PaymentRequest, ReceiptStore};

const HISTORY_LINK: &str = "/dashboard/history";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassOutcome {
    /// Every candidate was attempted.
    Completed,
    /// Another pass for the wallet was already running.
    Skipped,
    /// The session ended; the pass stopped at an item boundary.
    Cancelled,
}

/// What one reconciliation pass did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassReport {
    pub wallet: String,
    pub outcome: PassOutcome,
    pub candidates: usize,
    pub verified: usize,
    pub failed: usize,
    pub invalid: usize,
}

impl PassReport {
    fn new(wallet: &str, outcome: PassOutcome) -> Self {
        Self {
            wallet: wallet.to_string(),
            outcome,
            candidates: 0,
            verified: 0,
            failed: 0,
            invalid: 0,
        }
    }
}

/// Marks a wallet as running until dropped.
struct RunningGuard<'a> {
    running: &'a Mutex<HashSet<String>>,
    wallet: String,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.wallet);
    }
}

pub struct ReconcileEngine {
    store: Arc<dyn ReceiptStore>,
    notary: Arc<dyn Notarizer>,
    notifier: Arc<dyn NotificationSink>,
    item_delay: Duration,
    running: Mutex<HashSet<String>>,
}

impl ReconcileEngine {
    pub fn new(
        store: Arc<dyn ReceiptStore>,
        notary: Arc<dyn Notarizer>,
        notifier: Arc<dyn NotificationSink>,
        item_delay: Duration,
    ) -> Self {
        Self {
            store,
            notary,
            notifier,
            item_delay,
            running: Mutex::new(HashSet::new()),
        }
    }

    /// Whether a pass for `wallet` is in flight.
    pub fn is_running(&self, wallet: &str) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&wallet.to_ascii_lowercase())
    }

    fn try_begin(&self, wallet: &str) -> Option<RunningGuard<'_>> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if !running.insert(wallet.to_string()) {
            return None;
        }
        Some(RunningGuard {
            running: &self.running,
            wallet: wallet.to_string(),
        })
    }

    /// Run one reconciliation pass for `wallet`.
    ///
    /// Returns immediately with [`PassOutcome::Skipped`] when a pass for the
    /// same wallet is already running. Only a malformed wallet address or a
    /// failure to list the wallet's receipts is an error.
    pub async fn reconcile(&self, wallet: &str, cancel: &CancellationToken) -> Result<PassReport> {
        let wallet = normalize_address(wallet)?;
        let Some(_guard) = self.try_begin(&wallet) else {
            debug!("Reconciliation already running for {wallet}, skipping");
            return Ok(PassReport::new(&wallet, PassOutcome::Skipped));
        };

        self.run_pass(&wallet, cancel)
            .instrument(info_span!("reconcile", wallet = %wallet))
            .await
    }

    async fn run_pass(&self, wallet: &str, cancel: &CancellationToken) -> Result<PassReport> {
        let mut report = PassReport::new(wallet, PassOutcome::Completed);

        let candidates: Vec<Receipt> = self
            .store
            .receipts_for_wallet(wallet)
            .await?
            .into_iter()
            .filter(Receipt::is_candidate)
            .collect();
        report.candidates = candidates.len();

        if candidates.is_empty() {
            debug!("No receipts need syncing");
            return Ok(report);
        }
        info!("Found {} pending receipts", candidates.len());

        for (index, receipt) in candidates.iter().enumerate() {
            if cancel.is_cancelled() {
                report.outcome = PassOutcome::Cancelled;
                break;
            }

            match self.sync_receipt(receipt).await {
                Ok(notarization_id) => {
                    report.verified += 1;
                    info!(
                        "Synced receipt {} ({}) as {notarization_id}",
                        receipt.id, receipt.purpose
                    );
                }
                Err(e @ SyncError::Validation(_)) => {
                    report.invalid += 1;
                    warn!("Skipping receipt {}: {e}", receipt.id);
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        transient = e.is_transient(),
                        "Failed to sync receipt {}: {e}", receipt.id
                    );
                }
            }

            let has_next = index + 1 < candidates.len();
            if has_next && !self.item_delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        report.outcome = PassOutcome::Cancelled;
                        break;
                    }
                    _ = tokio::time::sleep(self.item_delay) => {}
                }
            }
        }

        if report.outcome == PassOutcome::Cancelled {
            info!(
                "Reconciliation cancelled after {} of {} receipts",
                report.verified + report.failed + report.invalid,
                report.candidates
            );
        } else {
            info!(
                "Reconciliation finished: {} verified, {} failed, {} invalid",
                report.verified, report.failed, report.invalid
            );
        }
        Ok(report)
    }

    /// Notarize a single receipt and persist the result.
    async fn sync_receipt(&self, receipt: &Receipt) -> Result<String> {
        let request = payment_request(receipt)?;
        let notarization_id = self.notary.submit_payment(&request).await?;

        self.store
            .update_receipt(receipt.id, &ReceiptPatch::verified_with(&notarization_id))
            .await
            .map_err(|e| {
                SyncError::StoreUpdate(format!(
                    "receipt {} notarized as {notarization_id} but not saved: {e}",
                    receipt.id
                ))
            })?;

        let notification = NewNotification {
            recipient: receipt.wallet_address.clone(),
            title: "Receipt Synced".to_string(),
            message: format!(
                "Background check: Your receipt for \"{}\" has been verified.",
                receipt.purpose
            ),
            severity: Severity::Success,
            link: Some(HISTORY_LINK.to_string()),
            reference_id: Some(notarization_id.clone()),
        };
        if let Err(e) = self.notifier.notify(notification).await {
            warn!("Receipt {} verified but notification failed: {e}", receipt.id);
        }

        Ok(notarization_id)
    }
}

/// Build the notarization request, rejecting receipts that cannot be synced.
pub fn payment_request(receipt: &Receipt) -> Result<PaymentRequest> {
    let vault = receipt
        .vault_address
        .as_deref()
        .ok_or_else(|| SyncError::Validation(format!("receipt {} has no vault", receipt.id)))?;
    normalize_address(vault)?;
    normalize_address(&receipt.wallet_address)?;
    let amount = validate_amount(&receipt.amount)?;
    if receipt.tx_hash.trim().is_empty() {
        return Err(SyncError::Validation(format!(
            "receipt {} has no tx hash",
            receipt.id
        )));
    }

    let (from, to) = receipt
        .transfer_endpoints()
        .ok_or_else(|| SyncError::Validation(format!("receipt {} has no vault", receipt.id)))?;

    Ok(PaymentRequest {
        amount: amount.normalize().to_string(),
        from: from.to_string(),
        to: to.to_string(),
        purpose: receipt.purpose.clone(),
        idempotency_token: receipt.tx_hash.clone(),
    })
}
