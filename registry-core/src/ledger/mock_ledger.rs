//! Deterministic in-memory access-control ledger.
//!
//! Mirrors the contract rule that granting an already-held role reverts.
#![forbid(unsafe_code)]

use super::{GrantReceipt, LedgerError, RoleGrantExecutor, RoleOracle, SignerRoles};
use crate::{LedgerRole, WalletAddress};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct State {
    roles: HashMap<WalletAddress, SignerRoles>,
    oracle_calls: HashMap<WalletAddress, usize>,
    grant_calls: Vec<(LedgerRole, WalletAddress)>,
    oracle_failures: VecDeque<LedgerError>,
    grant_failures: VecDeque<LedgerError>,
    tx_seq: u64,
}

#[derive(Debug, Default)]
pub struct MockLedger {
    state: Mutex<State>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Set membership directly, as if granted by another registrar.
    pub fn grant_out_of_band(&self, role: LedgerRole, wallet: &WalletAddress) {
        self.lock()
            .roles
            .entry(wallet.clone())
            .or_default()
            .set(role, true);
    }

    pub fn roles_of(&self, wallet: &WalletAddress) -> SignerRoles {
        self.lock().roles.get(wallet).copied().unwrap_or_default()
    }

    pub fn oracle_calls(&self, wallet: &WalletAddress) -> usize {
        self.lock().oracle_calls.get(wallet).copied().unwrap_or(0)
    }

    pub fn grant_calls(&self) -> Vec<(LedgerRole, WalletAddress)> {
        self.lock().grant_calls.clone()
    }

    pub fn fail_next_lookup(&self, err: LedgerError) {
        self.lock().oracle_failures.push_back(err);
    }

    /// Make the next grant fail with `err` without touching membership.
    pub fn fail_next_grant(&self, err: LedgerError) {
        self.lock().grant_failures.push_back(err);
    }
}

#[async_trait]
impl RoleOracle for MockLedger {
    async fn get_roles_of(&self, wallet: &WalletAddress) -> Result<SignerRoles, LedgerError> {
        let mut st = self.lock();
        *st.oracle_calls.entry(wallet.clone()).or_insert(0) += 1;
        if let Some(err) = st.oracle_failures.pop_front() {
            return Err(err);
        }
        Ok(st.roles.get(wallet).copied().unwrap_or_default())
    }
}

#[async_trait]
impl RoleGrantExecutor for MockLedger {
    async fn add_signer(
        &self,
        role: LedgerRole,
        wallet: &WalletAddress,
    ) -> Result<GrantReceipt, LedgerError> {
        let mut st = self.lock();
        st.grant_calls.push((role, wallet.clone()));
        if let Some(err) = st.grant_failures.pop_front() {
            return Err(err);
        }
        let entry = st.roles.entry(wallet.clone()).or_default();
        if entry.has(role) {
            return Err(LedgerError::TransactionReverted(format!(
                "AccessControl: {wallet} already has role {role}"
            )));
        }
        entry.set(role, true);
        st.tx_seq += 1;
        Ok(GrantReceipt {
            tx_hash: format!("0x{:064x}", st.tx_seq),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallet() -> WalletAddress {
        WalletAddress::parse("0x1000000000000000000000000000000000000001").unwrap()
    }

    #[tokio::test]
    async fn regrant_reverts() {
        let ledger = MockLedger::new();
        let w = wallet();
        ledger.add_signer(LedgerRole::Notary, &w).await.unwrap();
        assert!(ledger.get_roles_of(&w).await.unwrap().notary);

        let err = ledger.add_signer(LedgerRole::Notary, &w).await.unwrap_err();
        assert!(matches!(err, LedgerError::TransactionReverted(_)));
        assert_eq!(ledger.grant_calls().len(), 2);
    }

    #[tokio::test]
    async fn injected_failure_leaves_membership_untouched() {
        let ledger = MockLedger::new();
        let w = wallet();
        ledger.fail_next_grant(LedgerError::TransactionRejected("user denied".to_string()));
        assert!(ledger.add_signer(LedgerRole::Ivsl, &w).await.is_err());
        assert!(!ledger.roles_of(&w).ivsl);
    }
}
