//! Domain types shared by the store, the reconciliation engine and the API.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SyncError};

/// Store-assigned receipt identifier.
pub type ReceiptId = i64;

/// The vault lifecycle event a receipt records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptKind {
    /// Funds were locked into a new vault (wallet → vault).
    Created,
    /// The vault was broken before its unlock time (vault → wallet).
    #[serde(alias = "breaked")]
    Broken,
    /// The vault matured and was withdrawn (vault → wallet).
    Completed,
}

impl ReceiptKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "created" => Some(Self::Created),
            "broken" | "breaked" => Some(Self::Broken),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    /// Short identifier string suitable for storage in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Broken => "broken",
            Self::Completed => "completed",
        }
    }
}

/// A recorded vault lifecycle event awaiting (or done with) notarization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub id: ReceiptId,
    pub wallet_address: String,
    pub vault_address: Option<String>,
    pub kind: ReceiptKind,
    /// Human-unit decimal string, scaled when the receipt was recorded.
    pub amount: String,
    /// Early-withdrawal fee kept by the vault; only breaks carry one.
    pub penalty: Option<String>,
    pub purpose: String,
    pub tx_hash: String,
    /// Unix milliseconds at which the event was recorded.
    pub timestamp: i64,
    pub verified: bool,
    pub notarization_id: Option<String>,
}

impl Receipt {
    /// A receipt needs reconciling until it is verified, and only once it
    /// names the vault it concerns.
    pub fn is_candidate(&self) -> bool {
        !self.verified && self.vault_address.is_some()
    }

    /// `(from, to)` for the notarized payment. Deposits flow from the
    /// wallet into the vault; breaks and completions flow back out.
    pub fn transfer_endpoints(&self) -> Option<(&str, &str)> {
        let vault = self.vault_address.as_deref()?;
        let wallet = self.wallet_address.as_str();
        Some(match self.kind {
            ReceiptKind::Created => (wallet, vault),
            ReceiptKind::Broken | ReceiptKind::Completed => (vault, wallet),
        })
    }
}

/// Intake payload for a freshly confirmed vault transaction.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReceipt {
    pub wallet_address: String,
    pub vault_address: Option<String>,
    pub kind: ReceiptKind,
    pub amount: String,
    #[serde(default)]
    pub penalty: Option<String>,
    pub purpose: String,
    pub tx_hash: String,
    pub timestamp: Option<i64>,
}

impl NewReceipt {
    /// Normalize addresses and reject receipts the engine could never sync.
    pub fn validated(self) -> Result<Self> {
        let wallet_address = normalize_address(&self.wallet_address)?;
        let vault_address = self
            .vault_address
            .as_deref()
            .map(normalize_address)
            .transpose()?;
        validate_amount(&self.amount)?;
        let penalty = self
            .penalty
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| validate_amount(p).map(|_| p.to_string()))
            .transpose()?;
        if self.tx_hash.trim().is_empty() {
            return Err(SyncError::Validation("tx hash is empty".to_string()));
        }
        Ok(Self {
            wallet_address,
            vault_address,
            penalty,
            tx_hash: self.tx_hash.trim().to_string(),
            ..self
        })
    }
}

/// Amounts are human-unit decimal strings such as `"12.50"`.
pub fn validate_amount(amount: &str) -> Result<Decimal> {
    let value = Decimal::from_str(amount.trim())
        .map_err(|e| SyncError::Validation(format!("amount `{amount}` is not a decimal: {e}")))?;
    if value.is_sign_negative() {
        return Err(SyncError::Validation(format!("amount `{amount}` is negative")));
    }
    Ok(value)
}

/// Merge-patch for a stored receipt. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiptPatch {
    pub verified: Option<bool>,
    pub notarization_id: Option<String>,
}

impl ReceiptPatch {
    /// The one mutation the engine performs: flip to verified and record
    /// the notarization identifier.
    pub fn verified_with(notarization_id: impl Into<String>) -> Self {
        Self {
            verified: Some(true),
            notarization_id: Some(notarization_id.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.verified.is_none() && self.notarization_id.is_none()
    }
}

/// Off-chain vault fields that cannot be read back from the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SavedVaultMetadata {
    pub vault_address: String,
    /// `None` means the vault has no savings goal.
    pub target_amount: Option<String>,
    pub created_at: i64,
}

/// Point-in-time view of a vault. `None` means "not yet known", never zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultStateSummary {
    pub vault_address: String,
    pub purpose: Option<String>,
    pub balance: Option<String>,
    /// Precision used to scale `balance` (the fallback when unreadable).
    pub decimals: u32,
    pub unlock_timestamp: Option<u64>,
    pub is_locked: Option<bool>,
    pub beneficiary: Option<String>,
    pub target_amount: Option<String>,
    pub progress_percent: Option<f64>,
    pub remaining: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Success,
    Warning,
    Info,
    Error,
}

impl Severity {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "success" => Self::Success,
            "warning" => Self::Warning,
            "error" => Self::Error,
            _ => Self::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Info => "info",
            Self::Error => "error",
        }
    }
}

/// A notification to append for a wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNotification {
    pub recipient: String,
    pub title: String,
    pub message: String,
    pub severity: Severity,
    pub link: Option<String>,
    pub reference_id: Option<String>,
}

/// A stored notification as read back for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: i64,
    pub recipient: String,
    pub title: String,
    pub message: String,
    pub severity: Severity,
    pub timestamp: i64,
    pub read: bool,
    pub link: Option<String>,
    pub reference_id: Option<String>,
}

/// Validate a `0x`-prefixed 20-byte hex address and lower-case it.
pub fn normalize_address(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let hex_part = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(|| SyncError::Validation(format!("address `{trimmed}` lacks 0x prefix")))?;
    if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(SyncError::Validation(format!(
            "address `{trimmed}` is not 20 hex bytes"
        )));
    }
    Ok(format!("0x{}", hex_part.to_ascii_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const WALLET: &str = "0x1111111111111111111111111111111111111111";
    const VAULT: &str = "0x2222222222222222222222222222222222222222";

    fn receipt(kind: ReceiptKind) -> Receipt {
        Receipt {
            id: 1,
            wallet_address: WALLET.to_string(),
            vault_address: Some(VAULT.to_string()),
            kind,
            amount: "10.00".to_string(),
            penalty: None,
            purpose: "Rent".to_string(),
            tx_hash: "0xabc".to_string(),
            timestamp: 0,
            verified: false,
            notarization_id: None,
        }
    }

    #[test]
    fn created_flows_from_wallet_to_vault() {
        assert_eq!(
            receipt(ReceiptKind::Created).transfer_endpoints(),
            Some((WALLET, VAULT))
        );
    }

    #[test]
    fn completed_and_broken_flow_back_to_wallet() {
        assert_eq!(
            receipt(ReceiptKind::Completed).transfer_endpoints(),
            Some((VAULT, WALLET))
        );
        assert_eq!(
            receipt(ReceiptKind::Broken).transfer_endpoints(),
            Some((VAULT, WALLET))
        );
    }

    #[test]
    fn candidates_require_vault_and_unverified() {
        let mut r = receipt(ReceiptKind::Created);
        assert!(r.is_candidate());

        r.verified = true;
        assert!(!r.is_candidate());

        r.verified = false;
        r.vault_address = None;
        assert!(!r.is_candidate());
        assert_eq!(r.transfer_endpoints(), None);
    }

    #[test]
    fn receipt_kind_accepts_legacy_spelling() {
        assert_eq!(ReceiptKind::parse("breaked"), Some(ReceiptKind::Broken));
        assert_eq!(ReceiptKind::parse("withdrawn"), None);
        let kind: ReceiptKind = serde_json::from_str(r#""breaked""#).unwrap();
        assert_eq!(kind, ReceiptKind::Broken);
    }

    #[test]
    fn normalize_address_lowercases() {
        let addr = normalize_address(" 0xABCDEFabcdef0123456789012345678901234567 ").unwrap();
        assert_eq!(addr, "0xabcdefabcdef0123456789012345678901234567");
    }

    #[test]
    fn normalize_address_rejects_malformed() {
        assert!(matches!(
            normalize_address("1111111111111111111111111111111111111111"),
            Err(SyncError::Validation(_))
        ));
        assert!(normalize_address("0x1234").is_err());
        assert!(normalize_address("0xZZ11111111111111111111111111111111111111").is_err());
    }

    #[test]
    fn new_receipt_validation() {
        let raw = NewReceipt {
            wallet_address: "0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA".to_string(),
            vault_address: Some(VAULT.to_string()),
            kind: ReceiptKind::Created,
            amount: "12.50".to_string(),
            penalty: None,
            purpose: "Car".to_string(),
            tx_hash: " 0xfeed ".to_string(),
            timestamp: None,
        };
        let ok = raw.clone().validated().unwrap();
        assert_eq!(ok.wallet_address, "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        assert_eq!(ok.tx_hash, "0xfeed");

        let bad_amount = NewReceipt {
            amount: "twelve".to_string(),
            ..raw.clone()
        };
        assert!(matches!(bad_amount.validated(), Err(SyncError::Validation(_))));

        let negative = NewReceipt {
            amount: "-1".to_string(),
            ..raw.clone()
        };
        assert!(negative.validated().is_err());

        let no_hash = NewReceipt {
            tx_hash: "  ".to_string(),
            ..raw.clone()
        };
        assert!(no_hash.validated().is_err());

        let broken = NewReceipt {
            kind: ReceiptKind::Broken,
            penalty: Some(" 1.25 ".to_string()),
            ..raw.clone()
        };
        assert_eq!(broken.validated().unwrap().penalty.as_deref(), Some("1.25"));

        let blank_penalty = NewReceipt {
            penalty: Some(String::new()),
            ..raw.clone()
        };
        assert_eq!(blank_penalty.validated().unwrap().penalty, None);

        let bad_penalty = NewReceipt {
            penalty: Some("ten percent".to_string()),
            ..raw
        };
        assert!(matches!(bad_penalty.validated(), Err(SyncError::Validation(_))));
    }

    #[test]
    fn intake_payload_carries_penalty() {
        let new: NewReceipt = serde_json::from_str(
            r#"{
                "walletAddress": "0x1111111111111111111111111111111111111111",
                "vaultAddress": "0x2222222222222222222222222222222222222222",
                "kind": "breaked",
                "amount": "90.00",
                "penalty": "10.00",
                "purpose": "Rent",
                "txHash": "0xbreak"
            }"#,
        )
        .unwrap();
        assert_eq!(new.kind, ReceiptKind::Broken);
        assert_eq!(new.penalty.as_deref(), Some("10.00"));
    }
}
