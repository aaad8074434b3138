//! `ethers` binding of the registry access-control contract.
//!
//! Implements [`RoleOracle`] and [`RoleGrantExecutor`] over a signing HTTP client.
#![forbid(unsafe_code)]

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use ethers::prelude::*;
use ethers::middleware::signer::SignerMiddlewareError;
use ethers::providers::MiddlewareError;
use ethers::utils::keccak256;
use registry_core::ledger::{
    GrantReceipt, LedgerError, LedgerRpcConfig, RoleGrantExecutor, RoleOracle, SignerRoles,
};
use registry_core::{LedgerRole, WalletAddress};
use std::sync::Arc;
use tracing::{debug, info, warn};

abigen!(
    RegistryAccessControl,
    r#"[
        function getRolesOf(address account) external view returns (bool, bool, bool)
        function addSigner(bytes32 role, address account) external
    ]"#
);

type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// JSON-RPC code wallets use for a declined signature request.
const USER_REJECTED_CODE: i64 = 4001;

/// On-chain role id: `keccak256(selector)`.
pub fn role_id(role: LedgerRole) -> [u8; 32] {
    keccak256(role.selector().as_bytes())
}

fn to_address(wallet: &WalletAddress) -> Result<Address, LedgerError> {
    wallet
        .as_str()
        .parse::<Address>()
        .map_err(|e| LedgerError::Config(format!("invalid wallet address {wallet}: {e}")))
}

fn classify(err: ContractError<SignerClient>) -> LedgerError {
    if err.is_revert() {
        return LedgerError::TransactionReverted(err.to_string());
    }
    if let Some(mw) = err.as_middleware_error() {
        if let SignerMiddlewareError::SignerError(e) = mw {
            return LedgerError::TransactionRejected(e.to_string());
        }
        if let Some(resp) = mw.as_error_response() {
            if resp.code == USER_REJECTED_CODE {
                return LedgerError::TransactionRejected(resp.message.clone());
            }
            if resp.message.to_ascii_lowercase().contains("revert") {
                return LedgerError::TransactionReverted(resp.message.clone());
            }
        }
    }
    LedgerError::Transport(err.to_string())
}

#[derive(Clone)]
pub struct EthRoleRegistry {
    contract: RegistryAccessControl<SignerClient>,
    confirmations: usize,
}

impl std::fmt::Debug for EthRoleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EthRoleRegistry")
            .field("contract", &self.contract.address())
            .field("confirmations", &self.confirmations)
            .finish()
    }
}

impl EthRoleRegistry {
    /// Build a client signing with the hex key in `cfg.signer_key_env`.
    pub fn from_env(cfg: &LedgerRpcConfig) -> Result<Self> {
        let key = std::env::var(&cfg.signer_key_env)
            .with_context(|| format!("missing required env var {}", cfg.signer_key_env))?;
        Self::new(cfg, &key)
    }

    pub fn new(cfg: &LedgerRpcConfig, private_key: &str) -> Result<Self> {
        let rpc_url = cfg.rpc_url.clone();
        let provider = Provider::<Http>::try_from(rpc_url.clone())
            .with_context(|| format!("invalid ledger rpc url: {rpc_url}"))?;

        let wallet: LocalWallet = private_key
            .trim()
            .trim_start_matches("0x")
            .parse::<LocalWallet>()
            .context("failed parsing signer key")?
            .with_chain_id(cfg.chain_id);
        let client = Arc::new(SignerMiddleware::new(provider, wallet));

        let addr: Address = cfg
            .contract_address
            .parse()
            .context("invalid ledger.contract_address")?;
        if addr == Address::zero() {
            return Err(anyhow!(
                "ledger.contract_address is zero; deploy and update config"
            ));
        }

        Ok(Self {
            contract: RegistryAccessControl::new(addr, client),
            confirmations: cfg.confirmations.max(1),
        })
    }

    pub fn contract_address(&self) -> Address {
        self.contract.address()
    }

    pub fn signer_address(&self) -> Address {
        self.contract.client().address()
    }
}

#[async_trait]
impl RoleOracle for EthRoleRegistry {
    async fn get_roles_of(&self, wallet: &WalletAddress) -> Result<SignerRoles, LedgerError> {
        let account = to_address(wallet)?;
        let (notary, surveyor, ivsl) = self
            .contract
            .get_roles_of(account)
            .call()
            .await
            .map_err(classify)?;
        debug!(wallet = %wallet, notary, surveyor, ivsl, "roles read");
        Ok(SignerRoles {
            notary,
            surveyor,
            ivsl,
        })
    }
}

#[async_trait]
impl RoleGrantExecutor for EthRoleRegistry {
    async fn add_signer(
        &self,
        role: LedgerRole,
        wallet: &WalletAddress,
    ) -> Result<GrantReceipt, LedgerError> {
        let account = to_address(wallet)?;
        let call = self.contract.add_signer(role_id(role), account);
        let pending = call.send().await.map_err(classify)?;
        let tx_hash: TxHash = *pending;
        info!(wallet = %wallet, role = %role, tx = ?tx_hash, "addSigner submitted");

        let receipt = pending
            .confirmations(self.confirmations)
            .await
            .map_err(|e| LedgerError::Transport(format!("failed waiting for confirmation: {e}")))?
            .ok_or_else(|| LedgerError::Transport(format!("tx {tx_hash:?} dropped from mempool")))?;

        if receipt.status == Some(U64::zero()) {
            warn!(wallet = %wallet, role = %role, tx = ?receipt.transaction_hash, "addSigner reverted");
            return Err(LedgerError::TransactionReverted(format!(
                "tx {:?} reverted",
                receipt.transaction_hash
            )));
        }
        Ok(GrantReceipt {
            tx_hash: format!("{:?}", receipt.transaction_hash),
        })
    }
}
