//! EVM chain reads — vault and token state through `ethers` contract calls.
//!
//! ## Resilience
//!
//! Reads are single-shot. Transport failures, reverts and undecodable
//! return data surface as [`SyncError::TransientRpc`]; the vault summary
//! reports the affected field as unknown and callers simply ask again.

use std::sync::Arc;

use async_trait::async_trait;
use ethers::contract::abigen;
use ethers::providers::{Http, JsonRpcClient, Provider};
use ethers::types::{Address, U256};
use tracing::debug;

use crate::errors::{Result, SyncError};
use crate::store::ChainReader;

abigen!(
    SavingsVault,
    r#"[
        function purpose() external view returns (string)
        function totalAssets() external view returns (uint256)
        function unlockTimestamp() external view returns (uint256)
        function beneficiary() external view returns (address)
    ]"#
);

abigen!(
    VaultToken,
    r#"[
        function decimals() external view returns (uint8)
    ]"#
);

/// [`ChainReader`] backed by an EVM JSON-RPC endpoint.
pub struct EvmChainReader<P> {
    provider: Arc<Provider<P>>,
    token: Address,
}

impl EvmChainReader<Http> {
    pub fn connect(rpc_url: &str, token_address: &str) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| SyncError::Config(format!("Invalid RPC_URL `{rpc_url}`: {e}")))?;
        let token = parse_address(token_address)
            .map_err(|_| SyncError::Config(format!("Invalid TOKEN_ADDRESS `{token_address}`")))?;
        Ok(Self::new(provider, token))
    }
}

impl<P: JsonRpcClient + 'static> EvmChainReader<P> {
    pub fn new(provider: Provider<P>, token: Address) -> Self {
        Self {
            provider: Arc::new(provider),
            token,
        }
    }

    fn vault(&self, vault: &str) -> Result<SavingsVault<Provider<P>>> {
        Ok(SavingsVault::new(parse_address(vault)?, self.provider.clone()))
    }
}

fn parse_address(raw: &str) -> Result<Address> {
    raw.trim()
        .parse::<Address>()
        .map_err(|e| SyncError::Validation(format!("`{raw}` is not an address: {e}")))
}

fn read_failed(what: &str, target: &str, e: impl std::fmt::Display) -> SyncError {
    SyncError::TransientRpc(format!("{what}() on {target} failed: {e}"))
}

/// Narrow a `uint256` that the contract documents as a unix timestamp.
fn timestamp_from(raw: U256) -> Result<u64> {
    if raw > U256::from(u64::MAX) {
        return Err(SyncError::TransientRpc(format!(
            "unlock timestamp {raw} overflows u64"
        )));
    }
    Ok(raw.as_u64())
}

#[async_trait]
impl<P: JsonRpcClient + 'static> ChainReader for EvmChainReader<P> {
    async fn vault_purpose(&self, vault: &str) -> Result<String> {
        self.vault(vault)?
            .purpose()
            .call()
            .await
            .map_err(|e| read_failed("purpose", vault, e))
    }

    async fn vault_total_assets(&self, vault: &str) -> Result<U256> {
        let assets = self
            .vault(vault)?
            .total_assets()
            .call()
            .await
            .map_err(|e| read_failed("totalAssets", vault, e))?;
        debug!("Vault {vault} holds {assets} raw units");
        Ok(assets)
    }

    async fn vault_unlock_timestamp(&self, vault: &str) -> Result<u64> {
        let raw = self
            .vault(vault)?
            .unlock_timestamp()
            .call()
            .await
            .map_err(|e| read_failed("unlockTimestamp", vault, e))?;
        timestamp_from(raw)
    }

    async fn vault_beneficiary(&self, vault: &str) -> Result<String> {
        let beneficiary = self
            .vault(vault)?
            .beneficiary()
            .call()
            .await
            .map_err(|e| read_failed("beneficiary", vault, e))?;
        Ok(format!("{beneficiary:#x}"))
    }

    async fn token_decimals(&self) -> Result<u32> {
        let token = format!("{:#x}", self.token);
        VaultToken::new(self.token, self.provider.clone())
            .decimals()
            .call()
            .await
            .map(u32::from)
            .map_err(|e| read_failed("decimals", &token, e))
    }
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
