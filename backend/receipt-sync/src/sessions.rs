//! Wallet sessions and the reconciliation trigger policy.
//!
//! A pass is triggered once per connection, after a settling delay; there is
//! no periodic schedule. Disconnecting cancels the session token, which stops
//! a pending trigger or makes a running pass finish its current item and
//! stop. Manual triggers go through the same engine and therefore the same
//! per-wallet single-flight guard.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::engine::{PassReport, ReconcileEngine};
use crate::errors::Result;
use crate::models::normalize_address;

pub struct SessionManager {
    engine: Arc<ReconcileEngine>,
    settle_delay: Duration,
    sessions: Mutex<HashMap<String, CancellationToken>>,
    shutdown: CancellationToken,
}

impl SessionManager {
    pub fn new(engine: Arc<ReconcileEngine>, settle_delay: Duration) -> Self {
        Self {
            engine,
            settle_delay,
            sessions: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Register a wallet connection and schedule its reconciliation pass.
    ///
    /// Returns `None` when the wallet already has a live session, so a
    /// repeated connect does not trigger a second pass.
    pub fn connect(&self, wallet: &str) -> Result<Option<JoinHandle<()>>> {
        let wallet = normalize_address(wallet)?;
        let token = {
            let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
            if sessions.contains_key(&wallet) {
                return Ok(None);
            }
            let token = self.shutdown.child_token();
            sessions.insert(wallet.clone(), token.clone());
            token
        };
        info!("Wallet {wallet} connected, reconciling in {:?}", self.settle_delay);

        let engine = self.engine.clone();
        let settle_delay = self.settle_delay;
        Ok(Some(tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(settle_delay) => {}
            }
            if let Err(e) = engine.reconcile(&wallet, &token).await {
                error!("Reconciliation for {wallet} failed: {e}");
            }
        })))
    }

    /// End a wallet session. Returns whether a session existed.
    pub fn disconnect(&self, wallet: &str) -> Result<bool> {
        let wallet = normalize_address(wallet)?;
        let token = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&wallet);
        match token {
            Some(token) => {
                token.cancel();
                info!("Wallet {wallet} disconnected");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn is_connected(&self, wallet: &str) -> bool {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&wallet.to_ascii_lowercase())
    }

    /// Whether a reconciliation pass for the wallet is in flight.
    pub fn is_running(&self, wallet: &str) -> bool {
        self.engine.is_running(wallet)
    }

    /// Run a pass now. Bound to the wallet's session when it has one.
    pub async fn trigger(&self, wallet: &str) -> Result<PassReport> {
        let wallet = normalize_address(wallet)?;
        let token = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&wallet)
            .cloned()
            .unwrap_or_else(|| self.shutdown.child_token());
        self.engine.reconcile(&wallet, &token).await
    }

    /// Cancel every session and any pass still running.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
