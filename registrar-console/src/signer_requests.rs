//! Per-department signer provisioning.
//!
//! Each view lists the department users of one role together with their on-chain
//! membership and offers an "add signer" action. The ledger grant is not idempotent,
//! so membership is read before offering the action, re-read right before submitting
//! and re-read again after every attempt.
#![forbid(unsafe_code)]

use crate::error::ConsoleError;
use crate::inflight::{Busy, InFlight, SubjectState};
use crate::metrics;
use crate::session::SessionContext;
use futures::future::join_all;
use registry_core::directory::{users_with_role, IdentityDirectory};
use registry_core::ledger::{GrantReceipt, LedgerError, RoleGrantExecutor, RoleOracle};
use registry_core::{DepartmentRole, KycStatus, LedgerRole, User, WalletAddress};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Membership {
    Granted,
    NotGranted,
    /// Lookup failed; no grant is offered until a reload succeeds.
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GrantAction {
    Available,
    AlreadyAdded,
    Processing,
    KycNotVerified,
    NoWallet,
    MembershipUnknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerCandidate {
    pub user: User,
    pub membership: Membership,
    pub grant_state: SubjectState,
}

impl SignerCandidate {
    pub fn action(&self) -> GrantAction {
        if self.user.wallet_address.is_none() {
            return GrantAction::NoWallet;
        }
        if self.membership == Membership::Granted {
            return GrantAction::AlreadyAdded;
        }
        if self.grant_state == SubjectState::Processing {
            return GrantAction::Processing;
        }
        if self.user.kyc_status != KycStatus::Verified {
            return GrantAction::KycNotVerified;
        }
        match self.membership {
            Membership::NotGranted => GrantAction::Available,
            _ => GrantAction::MembershipUnknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Applied(Vec<SignerCandidate>),
    /// A newer load or [`SignerRequests::close`] superseded this one.
    Discarded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantOutcome {
    Granted(GrantReceipt),
    /// The ledger already held the role; no transaction was needed or the attempt
    /// raced another grant.
    AlreadyGranted,
}

#[derive(Debug, Default)]
struct Board {
    users: Vec<User>,
    membership: HashMap<WalletAddress, Membership>,
    last_error: Option<String>,
    loaded: bool,
}

pub struct SignerRequests {
    role: DepartmentRole,
    directory: Arc<dyn IdentityDirectory>,
    oracle: Arc<dyn RoleOracle>,
    executor: Arc<dyn RoleGrantExecutor>,
    session: SessionContext,
    generation: AtomicU64,
    board: Mutex<Board>,
    inflight: InFlight<WalletAddress>,
}

impl std::fmt::Debug for SignerRequests {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignerRequests")
            .field("role", &self.role)
            .field("generation", &self.generation.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

fn lookup_result(res: Result<bool, LedgerError>, wallet: &WalletAddress) -> Membership {
    match res {
        Ok(true) => Membership::Granted,
        Ok(false) => Membership::NotGranted,
        Err(e) => {
            warn!(wallet = %wallet, error = %e, "role lookup failed");
            Membership::Unknown
        }
    }
}

impl SignerRequests {
    pub fn new(
        role: DepartmentRole,
        directory: Arc<dyn IdentityDirectory>,
        oracle: Arc<dyn RoleOracle>,
        executor: Arc<dyn RoleGrantExecutor>,
        session: SessionContext,
    ) -> Self {
        Self {
            role,
            directory,
            oracle,
            executor,
            session,
            generation: AtomicU64::new(0),
            board: Mutex::new(Board::default()),
            inflight: InFlight::new(),
        }
    }

    pub fn role(&self) -> DepartmentRole {
        self.role
    }

    fn ledger_role(&self) -> LedgerRole {
        self.role.ledger_role()
    }

    fn lock(&self) -> MutexGuard<'_, Board> {
        self.board.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn lookup(&self, wallet: &WalletAddress) -> Membership {
        let role = self.ledger_role();
        lookup_result(
            self.oracle.get_roles_of(wallet).await.map(|r| r.has(role)),
            wallet,
        )
    }

    /// Load the department users and look up every wallet's membership in parallel.
    pub async fn load(&self) -> Result<LoadOutcome, ConsoleError> {
        let gen = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let session = self.session.require_admin()?;

        let users = match self.directory.list_users(&session.token).await {
            Ok(all) => users_with_role(&all, self.role.role()),
            Err(e) => {
                let err = ConsoleError::from(e);
                metrics::DIRECTORY_LOAD_FAILURES_TOTAL
                    .with_label_values(&[self.role.role().as_wire()])
                    .inc();
                warn!(role = %self.role, error = %err, "signer candidate load failed");
                if self.generation.load(Ordering::SeqCst) == gen {
                    self.lock().last_error = Some(err.to_string());
                }
                return Err(err);
            }
        };

        let wallets: Vec<WalletAddress> = users
            .iter()
            .filter_map(|u| u.wallet_address.clone())
            .collect();
        let lookups = wallets.iter().map(|w| self.lookup(w));
        let results = join_all(lookups).await;

        if self.generation.load(Ordering::SeqCst) != gen {
            debug!(role = %self.role, gen, "discarding superseded signer load");
            return Ok(LoadOutcome::Discarded);
        }
        let membership: HashMap<WalletAddress, Membership> =
            wallets.into_iter().zip(results).collect();
        for (wallet, m) in &membership {
            if *m == Membership::NotGranted {
                self.inflight.reopen(wallet);
            }
        }
        {
            let mut board = self.lock();
            board.users = users;
            board.membership = membership;
            board.last_error = None;
            board.loaded = true;
        }
        debug!(role = %self.role, "signer candidates loaded");
        Ok(LoadOutcome::Applied(self.candidates()))
    }

    /// Discard the results of any load still in flight.
    pub fn close(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn is_loaded(&self) -> bool {
        self.lock().loaded
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    pub fn candidates(&self) -> Vec<SignerCandidate> {
        let board = self.lock();
        board
            .users
            .iter()
            .map(|u| {
                let (membership, grant_state) = match &u.wallet_address {
                    Some(w) => (
                        board
                            .membership
                            .get(w)
                            .copied()
                            .unwrap_or(Membership::Unknown),
                        self.inflight.state(w),
                    ),
                    None => (Membership::Unknown, SubjectState::Idle),
                };
                SignerCandidate {
                    user: u.clone(),
                    membership,
                    grant_state,
                }
            })
            .collect()
    }

    fn set_membership(&self, wallet: &WalletAddress, membership: Membership) {
        let mut board = self.lock();
        if let Some(slot) = board.membership.get_mut(wallet) {
            *slot = membership;
        }
    }

    fn record(&self, result: &str) {
        metrics::ROLE_GRANTS_TOTAL
            .with_label_values(&[self.ledger_role().selector(), result])
            .inc();
    }

    /// Grant this view's ledger role to `raw`.
    ///
    /// Never submits when membership shows the role held. Membership is re-read
    /// after the attempt, and the wallet stays `Processing` until that read ends.
    pub async fn grant(&self, raw: &str) -> Result<GrantOutcome, ConsoleError> {
        let wallet =
            WalletAddress::parse(raw).map_err(|e| ConsoleError::Validation(e.to_string()))?;
        let role = self.ledger_role();

        let (user, known) = {
            let board = self.lock();
            let user = board
                .users
                .iter()
                .find(|u| u.wallet_address.as_ref() == Some(&wallet))
                .cloned()
                .ok_or_else(|| ConsoleError::UnknownSubject(wallet.to_string()))?;
            let known = board
                .membership
                .get(&wallet)
                .copied()
                .unwrap_or(Membership::Unknown);
            (user, known)
        };
        if known == Membership::Granted {
            debug!(wallet = %wallet, role = %role, "role already held; grant skipped");
            return Ok(GrantOutcome::AlreadyGranted);
        }
        if user.kyc_status != KycStatus::Verified {
            return Err(ConsoleError::Validation(format!(
                "kyc of {} is {}; only verified users can be granted {role}",
                user.id, user.kyc_status
            )));
        }
        if known == Membership::Unknown {
            return Err(ConsoleError::InvalidState(format!(
                "{role} membership of {wallet} is unknown; reload before granting"
            )));
        }

        let session = self.session.require_admin()?;
        let guard = self.inflight.begin(wallet.clone()).map_err(|busy| match busy {
            Busy::Processing => ConsoleError::AlreadyProcessing(wallet.to_string()),
            Busy::Done => ConsoleError::DuplicateGrant {
                wallet: wallet.clone(),
                role,
            },
        })?;

        let fresh = match self.oracle.get_roles_of(&wallet).await {
            Ok(roles) => roles.has(role),
            Err(e) => {
                self.set_membership(&wallet, Membership::Unknown);
                warn!(wallet = %wallet, error = %e, "membership check before grant failed");
                return Err(e.into());
            }
        };
        if fresh {
            self.set_membership(&wallet, Membership::Granted);
            guard.complete();
            return Ok(GrantOutcome::AlreadyGranted);
        }

        info!(
            wallet = %wallet,
            role = %role,
            admin = %session.wallet_address,
            "submitting signer grant"
        );
        let attempt = self.executor.add_signer(role, &wallet).await;
        let after = self.lookup(&wallet).await;
        self.set_membership(&wallet, after);

        match attempt {
            Ok(receipt) => {
                self.record("ok");
                info!(wallet = %wallet, role = %role, tx = %receipt.tx_hash, "signer granted");
                if after != Membership::Granted {
                    warn!(wallet = %wallet, role = %role, "grant confirmed but membership not yet visible");
                }
                guard.complete();
                Ok(GrantOutcome::Granted(receipt))
            }
            Err(LedgerError::TransactionReverted(reason)) if after == Membership::Granted => {
                self.record("duplicate");
                warn!(wallet = %wallet, role = %role, reason = %reason, "grant raced an existing grant");
                guard.complete();
                Ok(GrantOutcome::AlreadyGranted)
            }
            Err(e) => {
                let err = ConsoleError::from(e);
                self.record(match &err {
                    ConsoleError::TransactionRejected(_) => "rejected",
                    ConsoleError::TransactionReverted(_) => "reverted",
                    _ => "error",
                });
                warn!(wallet = %wallet, role = %role, error = %err, "signer grant failed");
                Err(err)
            }
        }
    }
}
