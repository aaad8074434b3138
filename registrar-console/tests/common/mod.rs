#![allow(dead_code)]

use async_trait::async_trait;
use registrar_console::clock::ManualTimeSource;
use registrar_console::config::SessionConfig;
use registrar_console::session::{AdminSession, MemoryTokenStore};
use registrar_console::{Collaborators, Console};
use registry_core::directory::mock_client::{MockDirectory, MOCK_OTP};
use registry_core::files::{is_absolute_url, FileResolveError, FileResolver};
use registry_core::ledger::mock_ledger::MockLedger;
use registry_core::{KycStatus, Role, User, UserId, WalletAddress};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Mixed case on purpose; the console lowercases it.
pub const ADMIN_WALLET: &str = "0xAbC0000000000000000000000000000000000001";

pub fn wallet(raw: &str) -> WalletAddress {
    WalletAddress::parse(raw).expect("wallet")
}

/// Resolves `name` to `https://files.test/name`; references containing `missing`
/// fail.
#[derive(Debug, Default)]
pub struct StubFiles;

#[async_trait]
impl FileResolver for StubFiles {
    async fn resolve(&self, reference: &str) -> Result<String, FileResolveError> {
        if is_absolute_url(reference) {
            return Ok(reference.to_string());
        }
        if reference.contains("missing") {
            return Err(FileResolveError::HttpStatus(404));
        }
        Ok(format!("https://files.test/{reference}"))
    }

    fn fallback_url(&self, reference: &str) -> String {
        format!("https://fallback.test/{reference}")
    }
}

pub struct Harness {
    pub console: Console,
    pub directory: Arc<MockDirectory>,
    pub ledger: Arc<MockLedger>,
    pub tokens: Arc<MemoryTokenStore>,
    pub clock: Arc<ManualTimeSource>,
    pub collaborators: Collaborators,
}

pub fn harness() -> Harness {
    harness_with(Arc::new(MockDirectory::new()))
}

pub fn harness_with(directory: Arc<MockDirectory>) -> Harness {
    directory.add_admin(wallet(ADMIN_WALLET));
    let ledger = Arc::new(MockLedger::new());
    let tokens = Arc::new(MemoryTokenStore::new());
    let clock = Arc::new(ManualTimeSource::new(1_700_000_000_000));
    let collaborators = Collaborators {
        directory: directory.clone(),
        files: Arc::new(StubFiles),
        oracle: ledger.clone(),
        executor: ledger.clone(),
        tokens: tokens.clone(),
        clock: clock.clone(),
    };
    let console = Console::new(&SessionConfig::default(), collaborators.clone());
    Harness {
        console,
        directory,
        ledger,
        tokens,
        clock,
        collaborators,
    }
}

pub async fn login(h: &Harness) -> AdminSession {
    h.console
        .gate
        .connect_wallet(ADMIN_WALLET)
        .expect("connect wallet");
    h.console
        .gate
        .request_challenge(ADMIN_WALLET)
        .await
        .expect("request otp");
    h.console
        .gate
        .verify_challenge(ADMIN_WALLET, MOCK_OTP)
        .await
        .expect("verify otp")
}

pub fn person(
    id: &str,
    name: &str,
    role: Role,
    status: KycStatus,
    wallet_address: Option<&str>,
) -> User {
    User {
        id: UserId::new(id),
        name: name.to_string(),
        email: format!("{}@example.lk", name.to_lowercase().replace(' ', ".")),
        nic: "199012345678".to_string(),
        wallet_address: wallet_address.map(wallet),
        role,
        kyc_status: status,
        kyc_document_hash: None,
        kyc_documents: BTreeMap::new(),
        created_at: Some("2025-01-01T00:00:00Z".to_string()),
        updated_at: None,
    }
}
