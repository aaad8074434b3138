//! Registrar console core.
//!
//! Workflows behind the registrar UI: the admin session gate, KYC review,
//! department onboarding and per-role signer provisioning. Every component shares
//! one [`session::SessionContext`] handed out by [`Console`].
#![forbid(unsafe_code)]

pub mod clock;
pub mod config;
pub mod error;
pub mod inflight;
pub mod kyc_review;
pub mod logging;
pub mod metrics;
pub mod onboarding;
pub mod session;
pub mod signer_requests;

use anyhow::{Context, Result};
use clock::{SystemTimeSource, TimeSource};
use config::{ConsoleConfig, SessionConfig};
use kyc_review::KycReviewEngine;
use onboarding::DepartmentOnboarding;
use registry_core::directory::http_client::HttpDirectory;
use registry_core::directory::IdentityDirectory;
use registry_core::files::{FileResolver, HttpFileResolver};
use registry_core::ledger::{RoleGrantExecutor, RoleOracle};
use registry_core::DepartmentRole;
use session::{AdminSessionGate, FileTokenStore, SessionContext, TokenStore};
use signer_requests::SignerRequests;
use std::sync::Arc;

pub use error::ConsoleError;

/// External collaborators of the console.
#[derive(Clone)]
pub struct Collaborators {
    pub directory: Arc<dyn IdentityDirectory>,
    pub files: Arc<dyn FileResolver>,
    pub oracle: Arc<dyn RoleOracle>,
    pub executor: Arc<dyn RoleGrantExecutor>,
    pub tokens: Arc<dyn TokenStore>,
    pub clock: Arc<dyn TimeSource>,
}

/// Composition root. Owns the session context and wires it into every workflow.
pub struct Console {
    session: SessionContext,
    collaborators: Collaborators,
    pub gate: AdminSessionGate,
    pub kyc: KycReviewEngine,
    pub onboarding: DepartmentOnboarding,
}

impl Console {
    pub fn new(settings: &SessionConfig, collaborators: Collaborators) -> Self {
        let session = SessionContext::new(collaborators.clock.clone(), settings.max_age_secs);
        let gate = AdminSessionGate::new(
            collaborators.directory.clone(),
            collaborators.tokens.clone(),
            session.clone(),
            settings.otp_cooldown_secs,
        );
        let kyc = KycReviewEngine::new(
            collaborators.directory.clone(),
            collaborators.files.clone(),
            session.clone(),
        );
        let onboarding = DepartmentOnboarding::new(collaborators.directory.clone(), session.clone());
        Self {
            session,
            collaborators,
            gate,
            kyc,
            onboarding,
        }
    }

    /// Build the HTTP-backed console. The ledger adapter is supplied by the caller.
    pub fn from_config(
        cfg: &ConsoleConfig,
        oracle: Arc<dyn RoleOracle>,
        executor: Arc<dyn RoleGrantExecutor>,
    ) -> Result<Self> {
        let directory =
            HttpDirectory::new(cfg.backend.clone()).context("invalid [backend] config")?;
        let files = HttpFileResolver::new(cfg.files.clone()).context("invalid [files] config")?;
        Ok(Self::new(
            &cfg.session,
            Collaborators {
                directory: Arc::new(directory),
                files: Arc::new(files),
                oracle,
                executor,
                tokens: Arc::new(FileTokenStore::new(cfg.session.token_path.clone())),
                clock: Arc::new(SystemTimeSource),
            },
        ))
    }

    pub fn session(&self) -> SessionContext {
        self.session.clone()
    }

    /// A fresh signer view for `role`. In-flight flags are local to the view.
    pub fn signer_requests(&self, role: DepartmentRole) -> SignerRequests {
        SignerRequests::new(
            role,
            self.collaborators.directory.clone(),
            self.collaborators.oracle.clone(),
            self.collaborators.executor.clone(),
            self.session.clone(),
        )
    }
}
