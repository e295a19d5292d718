//! Savings vault receipt service — entry point.
//!
//! Records vault lifecycle receipts, notarizes unverified ones exactly once
//! per wallet session with the external proof service, and serves vault
//! summaries that merge on-chain state with stored savings goals.

mod aggregator;
mod api;
mod config;
mod db;
mod decimals;
mod engine;
mod errors;
mod models;
mod notary;
mod rpc;
mod sessions;
mod store;
#[cfg(test)]
mod testing;

use std::sync::Arc;

use reqwest::Client;
use tracing::info;
use tracing_subscriber::EnvFilter;

use aggregator::VaultAggregator;
use api::ApiState;
use config::Config;
use db::SqliteStore;
use engine::ReconcileEngine;
use notary::HttpNotarizer;
use rpc::EvmChainReader;
use sessions::SessionManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    // Set up the SQLite connection pool and run migrations.
    let pool = db::init_pool(&config.database_url).await?;
    let store = SqliteStore::new(pool);

    // HTTP client for the notarization service.
    let client = Client::builder()
        .timeout(std::time::Duration::from_secs(config.http_timeout_secs))
        .build()?;

    // ─── Reconciliation ───────────────────────────────────
    let engine = Arc::new(ReconcileEngine::new(
        Arc::new(store.clone()),
        Arc::new(HttpNotarizer::new(
            client,
            config.notary_url.clone(),
            config.notary_api_key.clone(),
        )),
        Arc::new(store.clone()),
        config.item_delay(),
    ));
    let sessions = Arc::new(SessionManager::new(engine, config.settle_delay()));

    // ─── Vault summaries ──────────────────────────────────
    let aggregator = Arc::new(VaultAggregator::new(
        Arc::new(EvmChainReader::connect(
            &config.rpc_url,
            &config.token_address,
        )?),
        Arc::new(store.clone()),
        config.fallback_decimals,
        config.read_timeout(),
    ));

    // ─── REST API ─────────────────────────────────────────
    let app = api::router(Arc::new(ApiState {
        store,
        sessions: sessions.clone(),
        aggregator,
    }));

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down, cancelling wallet sessions");
            sessions.shutdown();
        })
        .await?;

    Ok(())
}
