//! Database layer — migrations, receipt/metadata queries and notifications.

use async_trait::async_trait;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tracing::{info, warn};

use crate::errors::{Result, SyncError};
use crate::models::{
    NewNotification, NewReceipt, Notification, Receipt, ReceiptId, ReceiptKind, ReceiptPatch,
    SavedVaultMetadata, Severity,
};
use crate::store::{NotificationSink, ReceiptStore};

/// Notifications returned per wallet, newest first.
const NOTIFICATION_PAGE: i64 = 20;

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };
    // Make sure the file is created if it doesn't exist yet.
    let url = if url.contains('?') || url.contains(":memory:") {
        url
    } else {
        format!("{url}?mode=rwc")
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

// ─────────────────────────────────────────────────────────
// Row shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, sqlx::FromRow)]
struct ReceiptRow {
    id: i64,
    wallet_address: String,
    vault_address: Option<String>,
    kind: String,
    amount: String,
    penalty: Option<String>,
    purpose: String,
    tx_hash: String,
    timestamp: i64,
    verified: bool,
    notarization_id: Option<String>,
}

impl TryFrom<ReceiptRow> for Receipt {
    type Error = SyncError;

    fn try_from(row: ReceiptRow) -> Result<Self> {
        let kind = ReceiptKind::parse(&row.kind).ok_or_else(|| {
            SyncError::Validation(format!("receipt {} has unknown kind `{}`", row.id, row.kind))
        })?;
        Ok(Receipt {
            id: row.id,
            wallet_address: row.wallet_address,
            vault_address: row.vault_address,
            kind,
            amount: row.amount,
            penalty: row.penalty,
            purpose: row.purpose,
            tx_hash: row.tx_hash,
            timestamp: row.timestamp,
            verified: row.verified,
            notarization_id: row.notarization_id,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct NotificationRow {
    id: i64,
    recipient: String,
    title: String,
    message: String,
    severity: String,
    timestamp: i64,
    read: bool,
    link: Option<String>,
    reference_id: Option<String>,
}

impl From<NotificationRow> for Notification {
    fn from(row: NotificationRow) -> Self {
        Notification {
            id: row.id,
            recipient: row.recipient,
            title: row.title,
            message: row.message,
            severity: Severity::parse(&row.severity),
            timestamp: row.timestamp,
            read: row.read,
            link: row.link,
            reference_id: row.reference_id,
        }
    }
}

const RECEIPT_COLUMNS: &str = "id, wallet_address, vault_address, kind, amount, penalty, \
                               purpose, tx_hash, timestamp, verified, notarization_id";

// ─────────────────────────────────────────────────────────
// Receipt writes
// ─────────────────────────────────────────────────────────

/// Record a confirmed vault event. Re-recording the same
/// `(wallet, tx_hash, kind)` returns the existing receipt untouched.
pub async fn insert_receipt(pool: &SqlitePool, new: NewReceipt) -> Result<Receipt> {
    let new = new.validated()?;
    let timestamp = new
        .timestamp
        .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());

    sqlx::query(
        r#"
        INSERT INTO receipts
            (wallet_address, vault_address, kind, amount, penalty, purpose, tx_hash, timestamp,
             verified)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0)
        ON CONFLICT (wallet_address, tx_hash, kind) DO NOTHING
        "#,
    )
    .bind(&new.wallet_address)
    .bind(&new.vault_address)
    .bind(new.kind.as_str())
    .bind(new.amount.trim())
    .bind(new.penalty.as_deref())
    .bind(&new.purpose)
    .bind(&new.tx_hash)
    .bind(timestamp)
    .execute(pool)
    .await?;

    let row = sqlx::query_as::<_, ReceiptRow>(&format!(
        "SELECT {RECEIPT_COLUMNS} FROM receipts \
         WHERE wallet_address = ?1 AND tx_hash = ?2 AND kind = ?3"
    ))
    .bind(&new.wallet_address)
    .bind(&new.tx_hash)
    .bind(new.kind.as_str())
    .fetch_one(pool)
    .await?;
    Receipt::try_from(row)
}

/// Apply a merge-patch. Only fields present in `patch` are written;
/// `verified` is monotonic and an existing notarization id is never replaced.
pub async fn apply_patch(pool: &SqlitePool, id: ReceiptId, patch: &ReceiptPatch) -> Result<()> {
    if patch.is_empty() {
        return Ok(());
    }
    let affected = sqlx::query(
        r#"
        UPDATE receipts
        SET    verified        = MAX(verified, COALESCE(?1, verified)),
               notarization_id = COALESCE(notarization_id, ?2)
        WHERE  id = ?3
        "#,
    )
    .bind(patch.verified)
    .bind(patch.notarization_id.as_deref())
    .bind(id)
    .execute(pool)
    .await?
    .rows_affected();

    if affected == 0 {
        return Err(SyncError::NotFound(format!("receipt {id}")));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Receipt reads
// ─────────────────────────────────────────────────────────

/// Fetch all receipts for a wallet, newest first. Rows that no longer
/// decode are logged and left out.
pub async fn get_receipts_for_wallet(pool: &SqlitePool, wallet: &str) -> Result<Vec<Receipt>> {
    let rows = sqlx::query_as::<_, ReceiptRow>(&format!(
        "SELECT {RECEIPT_COLUMNS} FROM receipts \
         WHERE wallet_address = ?1 \
         ORDER BY timestamp DESC, id DESC"
    ))
    .bind(wallet.to_ascii_lowercase())
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .filter_map(|row| match Receipt::try_from(row) {
            Ok(receipt) => Some(receipt),
            Err(e) => {
                warn!("Skipping undecodable receipt row: {e}");
                None
            }
        })
        .collect())
}

pub async fn get_receipt(pool: &SqlitePool, id: ReceiptId) -> Result<Option<Receipt>> {
    let row = sqlx::query_as::<_, ReceiptRow>(&format!(
        "SELECT {RECEIPT_COLUMNS} FROM receipts WHERE id = ?1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.map(Receipt::try_from).transpose()
}

// ─────────────────────────────────────────────────────────
// Vault metadata
// ─────────────────────────────────────────────────────────

pub async fn get_vault_metadata(
    pool: &SqlitePool,
    vault: &str,
) -> Result<Option<SavedVaultMetadata>> {
    let row = sqlx::query_as::<_, SavedVaultMetadata>(
        "SELECT vault_address, target_amount, created_at FROM vault_metadata WHERE vault_address = ?1",
    )
    .bind(vault.to_ascii_lowercase())
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Insert or replace the savings goal of a vault. `created_at` is kept
/// from the first write.
pub async fn save_vault_metadata(
    pool: &SqlitePool,
    vault: &str,
    target_amount: Option<&str>,
) -> Result<SavedVaultMetadata> {
    let vault = vault.to_ascii_lowercase();
    sqlx::query(
        r#"
        INSERT INTO vault_metadata (vault_address, target_amount, created_at)
        VALUES (?1, ?2, ?3)
        ON CONFLICT (vault_address) DO UPDATE SET target_amount = excluded.target_amount
        "#,
    )
    .bind(&vault)
    .bind(target_amount)
    .bind(chrono::Utc::now().timestamp_millis())
    .execute(pool)
    .await?;

    get_vault_metadata(pool, &vault)
        .await?
        .ok_or_else(|| SyncError::NotFound(format!("vault metadata {vault}")))
}

// ─────────────────────────────────────────────────────────
// Notifications
// ─────────────────────────────────────────────────────────

pub async fn insert_notification(pool: &SqlitePool, n: &NewNotification) -> Result<i64> {
    let id = sqlx::query(
        r#"
        INSERT INTO notifications
            (recipient, title, message, severity, timestamp, read, link, reference_id)
        VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7)
        "#,
    )
    .bind(n.recipient.to_ascii_lowercase())
    .bind(&n.title)
    .bind(&n.message)
    .bind(n.severity.as_str())
    .bind(chrono::Utc::now().timestamp_millis())
    .bind(n.link.as_deref())
    .bind(n.reference_id.as_deref())
    .execute(pool)
    .await?
    .last_insert_rowid();
    Ok(id)
}

/// The most recent notifications for a wallet.
pub async fn get_notifications(pool: &SqlitePool, recipient: &str) -> Result<Vec<Notification>> {
    let rows = sqlx::query_as::<_, NotificationRow>(
        r#"
        SELECT id, recipient, title, message, severity, timestamp, read, link, reference_id
        FROM   notifications
        WHERE  recipient = ?1
        ORDER  BY timestamp DESC, id DESC
        LIMIT  ?2
        "#,
    )
    .bind(recipient.to_ascii_lowercase())
    .bind(NOTIFICATION_PAGE)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(Notification::from).collect())
}

pub async fn mark_notification_read(pool: &SqlitePool, id: i64) -> Result<()> {
    let affected = sqlx::query("UPDATE notifications SET read = 1 WHERE id = ?1")
        .bind(id)
        .execute(pool)
        .await?
        .rows_affected();
    if affected == 0 {
        return Err(SyncError::NotFound(format!("notification {id}")));
    }
    Ok(())
}

/// Returns the number of notifications that flipped to read.
pub async fn mark_all_notifications_read(pool: &SqlitePool, recipient: &str) -> Result<u64> {
    let affected = sqlx::query("UPDATE notifications SET read = 1 WHERE recipient = ?1 AND read = 0")
        .bind(recipient.to_ascii_lowercase())
        .execute(pool)
        .await?
        .rows_affected();
    Ok(affected)
}

// ─────────────────────────────────────────────────────────
// Collaborator implementations
// ─────────────────────────────────────────────────────────

/// SQLite-backed receipt store and notification sink.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl ReceiptStore for SqliteStore {
    async fn receipts_for_wallet(&self, wallet: &str) -> Result<Vec<Receipt>> {
        get_receipts_for_wallet(&self.pool, wallet).await
    }

    async fn get_receipt(&self, id: ReceiptId) -> Result<Option<Receipt>> {
        get_receipt(&self.pool, id).await
    }

    async fn update_receipt(&self, id: ReceiptId, patch: &ReceiptPatch) -> Result<()> {
        apply_patch(&self.pool, id, patch).await
    }

    async fn vault_metadata(&self, vault: &str) -> Result<Option<SavedVaultMetadata>> {
        get_vault_metadata(&self.pool, vault).await
    }
}

#[async_trait]
impl NotificationSink for SqliteStore {
    async fn notify(&self, notification: NewNotification) -> Result<()> {
        insert_notification(&self.pool, &notification).await.map(|_| ())
    }
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) async fn memory_pool() -> SqlitePool {
    // A single connection so every query sees the same in-memory database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}
