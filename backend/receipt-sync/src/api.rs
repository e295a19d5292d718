//! Axum REST API handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::aggregator::VaultAggregator;
use crate::db::{self, SqliteStore};
use crate::errors::{Result, SyncError};
use crate::models::{normalize_address, validate_amount, NewReceipt, Notification, Receipt};
use crate::sessions::SessionManager;
use crate::store::ReceiptStore;

#[derive(Clone)]
pub struct ApiState {
    pub store: SqliteStore,
    pub sessions: Arc<SessionManager>,
    pub aggregator: Arc<VaultAggregator>,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/receipts", post(create_receipt))
        .route("/receipts/:id", get(get_receipt))
        .route("/wallets/:wallet/status", get(wallet_status))
        .route("/wallets/:wallet/connect", post(connect_wallet))
        .route("/wallets/:wallet/disconnect", post(disconnect_wallet))
        .route("/wallets/:wallet/reconcile", post(reconcile_wallet))
        .route("/wallets/:wallet/receipts", get(get_wallet_receipts))
        .route("/wallets/:wallet/notifications", get(get_notifications))
        .route("/wallets/:wallet/notifications/read", post(mark_all_read))
        .route("/notifications/:id/read", post(mark_read))
        .route("/vaults/:vault/summary", get(get_vault_summary))
        .route("/vaults/:vault/metadata", put(put_vault_metadata))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────
// Request / response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ReceiptsResponse {
    pub wallet: String,
    pub count: usize,
    pub receipts: Vec<Receipt>,
}

#[derive(Serialize)]
pub struct NotificationsResponse {
    pub count: usize,
    pub unread: usize,
    pub notifications: Vec<Notification>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub wallet: String,
    pub connected: bool,
    /// Whether this call scheduled a reconciliation pass.
    pub scheduled: bool,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub wallet: String,
    pub connected: bool,
    pub running: bool,
}

#[derive(Serialize)]
pub struct UpdatedResponse {
    pub updated: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataRequest {
    pub target_amount: Option<String>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn status_for(err: &SyncError) -> StatusCode {
    match err {
        SyncError::Validation(_) | SyncError::InvalidDecimals(_) => StatusCode::BAD_REQUEST,
        SyncError::NotFound(_) => StatusCode::NOT_FOUND,
        SyncError::TransientRpc(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn respond<T: Serialize>(status: StatusCode, result: Result<T>) -> Response {
    match result {
        Ok(body) => (status, Json(body)).into_response(),
        Err(e) => (
            status_for(&e),
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
            .into_response(),
    }
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `POST /receipts`
///
/// Records a confirmed vault transaction as an unverified receipt.
pub async fn create_receipt(
    State(state): State<Arc<ApiState>>,
    Json(new): Json<NewReceipt>,
) -> Response {
    respond(
        StatusCode::CREATED,
        db::insert_receipt(state.store.pool(), new).await,
    )
}

/// `GET /receipts/:id`
pub async fn get_receipt(State(state): State<Arc<ApiState>>, Path(id): Path<i64>) -> Response {
    let result = state
        .store
        .get_receipt(id)
        .await
        .and_then(|r| r.ok_or_else(|| SyncError::NotFound(format!("receipt {id}"))));
    respond(StatusCode::OK, result)
}

/// `GET /wallets/:wallet/status`
pub async fn wallet_status(
    State(state): State<Arc<ApiState>>,
    Path(wallet): Path<String>,
) -> Response {
    let result = normalize_address(&wallet).map(|wallet| StatusResponse {
        connected: state.sessions.is_connected(&wallet),
        running: state.sessions.is_running(&wallet),
        wallet,
    });
    respond(StatusCode::OK, result)
}

/// `POST /wallets/:wallet/connect`
///
/// Starts a session; the first connect schedules one reconciliation pass.
pub async fn connect_wallet(
    State(state): State<Arc<ApiState>>,
    Path(wallet): Path<String>,
) -> Response {
    let result = state.sessions.connect(&wallet).and_then(|handle| {
        Ok(SessionResponse {
            wallet: normalize_address(&wallet)?,
            connected: true,
            scheduled: handle.is_some(),
        })
    });
    respond(StatusCode::OK, result)
}

/// `POST /wallets/:wallet/disconnect`
pub async fn disconnect_wallet(
    State(state): State<Arc<ApiState>>,
    Path(wallet): Path<String>,
) -> Response {
    let result = state.sessions.disconnect(&wallet).and_then(|_| {
        Ok(SessionResponse {
            wallet: normalize_address(&wallet)?,
            connected: false,
            scheduled: false,
        })
    });
    respond(StatusCode::OK, result)
}

/// `POST /wallets/:wallet/reconcile`
///
/// Manual trigger; returns the pass report (`skipped` if one is running).
pub async fn reconcile_wallet(
    State(state): State<Arc<ApiState>>,
    Path(wallet): Path<String>,
) -> Response {
    respond(StatusCode::OK, state.sessions.trigger(&wallet).await)
}

/// `GET /wallets/:wallet/receipts`
pub async fn get_wallet_receipts(
    State(state): State<Arc<ApiState>>,
    Path(wallet): Path<String>,
) -> Response {
    let result = async {
        let wallet = normalize_address(&wallet)?;
        let receipts = db::get_receipts_for_wallet(state.store.pool(), &wallet).await?;
        Ok::<_, SyncError>(ReceiptsResponse {
            wallet,
            count: receipts.len(),
            receipts,
        })
    }
    .await;
    respond(StatusCode::OK, result)
}

/// `GET /wallets/:wallet/notifications`
pub async fn get_notifications(
    State(state): State<Arc<ApiState>>,
    Path(wallet): Path<String>,
) -> Response {
    let result = async {
        let wallet = normalize_address(&wallet)?;
        let notifications = db::get_notifications(state.store.pool(), &wallet).await?;
        Ok::<_, SyncError>(NotificationsResponse {
            count: notifications.len(),
            unread: notifications.iter().filter(|n| !n.read).count(),
            notifications,
        })
    }
    .await;
    respond(StatusCode::OK, result)
}

/// `POST /wallets/:wallet/notifications/read`
pub async fn mark_all_read(
    State(state): State<Arc<ApiState>>,
    Path(wallet): Path<String>,
) -> Response {
    let result = async {
        let wallet = normalize_address(&wallet)?;
        let updated = db::mark_all_notifications_read(state.store.pool(), &wallet).await?;
        Ok::<_, SyncError>(UpdatedResponse { updated })
    }
    .await;
    respond(StatusCode::OK, result)
}

/// `POST /notifications/:id/read`
pub async fn mark_read(State(state): State<Arc<ApiState>>, Path(id): Path<i64>) -> Response {
    let result = db::mark_notification_read(state.store.pool(), id)
        .await
        .map(|_| UpdatedResponse { updated: 1 });
    respond(StatusCode::OK, result)
}

/// `GET /vaults/:vault/summary`
///
/// Fields whose chain read failed are `null` ("not yet known").
pub async fn get_vault_summary(
    State(state): State<Arc<ApiState>>,
    Path(vault): Path<String>,
) -> Response {
    respond(StatusCode::OK, state.aggregator.vault_summary(&vault).await)
}

/// `PUT /vaults/:vault/metadata`
pub async fn put_vault_metadata(
    State(state): State<Arc<ApiState>>,
    Path(vault): Path<String>,
    Json(body): Json<MetadataRequest>,
) -> Response {
    let result = async {
        let vault = normalize_address(&vault)?;
        let target = body
            .target_amount
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());
        if let Some(target) = target {
            validate_amount(target)?;
        }
        db::save_vault_metadata(state.store.pool(), &vault, target).await
    }
    .await;
    respond(StatusCode::OK, result)
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
