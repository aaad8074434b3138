//! Ledger access-control contract.
//!
//! Two capabilities are consumed from the registry's role-based access-control
//! contract: a pure membership read ([`RoleOracle`]) and a state-changing signer
//! grant ([`RoleGrantExecutor`]). The grant is not idempotent on chain, so callers
//! must consult the oracle before and after every grant attempt.
#![forbid(unsafe_code)]

pub mod mock_ledger;

use crate::{LedgerRole, WalletAddress};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Signer membership of one wallet across the three department roles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignerRoles {
    pub notary: bool,
    pub surveyor: bool,
    pub ivsl: bool,
}

impl SignerRoles {
    pub const fn has(&self, role: LedgerRole) -> bool {
        match role {
            LedgerRole::Notary => self.notary,
            LedgerRole::Surveyor => self.surveyor,
            LedgerRole::Ivsl => self.ivsl,
        }
    }

    pub fn set(&mut self, role: LedgerRole, granted: bool) {
        match role {
            LedgerRole::Notary => self.notary = granted,
            LedgerRole::Surveyor => self.surveyor = granted,
            LedgerRole::Ivsl => self.ivsl = granted,
        }
    }
}

/// Result of a confirmed grant transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantReceipt {
    /// `0x`-prefixed transaction hash.
    pub tx_hash: String,
}

/// Connection settings for the access-control contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRpcConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    pub contract_address: String,
    /// Environment variable holding the hex-encoded signer key.
    #[serde(default = "default_signer_key_env")]
    pub signer_key_env: String,
    #[serde(default = "default_confirmations")]
    pub confirmations: usize,
}

fn default_signer_key_env() -> String {
    "REGISTRAR_SIGNER_KEY".to_string()
}

fn default_confirmations() -> usize {
    1
}

#[async_trait]
pub trait RoleOracle: Send + Sync {
    async fn get_roles_of(&self, wallet: &WalletAddress) -> Result<SignerRoles, LedgerError>;
}

#[async_trait]
pub trait RoleGrantExecutor: Send + Sync {
    async fn add_signer(
        &self,
        role: LedgerRole,
        wallet: &WalletAddress,
    ) -> Result<GrantReceipt, LedgerError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger configuration error: {0}")]
    Config(String),
    /// The signer declined to sign the transaction.
    #[error("transaction rejected: {0}")]
    TransactionRejected(String),
    /// The contract rejected the call (role already granted, caller unauthorized, ...).
    #[error("transaction reverted: {0}")]
    TransactionReverted(String),
    #[error("ledger transport error: {0}")]
    Transport(String),
}
