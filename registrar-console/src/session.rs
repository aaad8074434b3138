//! Admin session gate.
//!
//! Binds a connected wallet to a backend-issued admin session in two steps: the
//! wallet establishes who is acting, the emailed OTP elevates the session. A session
//! is only ever valid for the wallet that requested the challenge.
//!
//! State machine:
//!
//! ```text
//! Disconnected -> WalletConnected -> OtpRequested -> Authenticated
//!                       ^                 |
//!                       +-----------------+  (cancel / not an admin)
//! ```
#![forbid(unsafe_code)]

use crate::clock::TimeSource;
use crate::error::ConsoleError;
use crate::metrics;
use registry_core::directory::{AdminOtpVerifyRequest, DirectoryError, IdentityDirectory};
use registry_core::{AuthToken, Role, User, WalletAddress};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};

pub const OTP_LEN: usize = 6;

/// `^\d{6}$`
pub fn is_valid_otp_format(code: &str) -> bool {
    code.len() == OTP_LEN && code.bytes().all(|b| b.is_ascii_digit())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminSession {
    pub wallet_address: WalletAddress,
    pub token: AuthToken,
    pub user: User,
    pub issued_at_ms: u64,
}

impl AdminSession {
    pub fn role(&self) -> Role {
        self.user.role
    }
}

/// Shared handle to the authenticated-session slot.
///
/// Cloned into every component that needs the bearer token. Only
/// [`AdminSessionGate`] writes it.
#[derive(Clone)]
pub struct SessionContext {
    slot: Arc<RwLock<Option<AdminSession>>>,
    clock: Arc<dyn TimeSource>,
    max_age_ms: u64,
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("authenticated", &self.current().is_some())
            .field("max_age_ms", &self.max_age_ms)
            .finish()
    }
}

impl SessionContext {
    pub fn new(clock: Arc<dyn TimeSource>, max_age_secs: u64) -> Self {
        Self {
            slot: Arc::new(RwLock::new(None)),
            clock,
            max_age_ms: max_age_secs.saturating_mul(1_000),
        }
    }

    pub(crate) fn now_ms(&self) -> u64 {
        self.clock.now_millis()
    }

    fn is_expired(&self, session: &AdminSession) -> bool {
        self.now_ms().saturating_sub(session.issued_at_ms) >= self.max_age_ms
    }

    /// The live session, if any. Expired sessions are reported as absent.
    pub fn current(&self) -> Option<AdminSession> {
        let slot = self.slot.read().unwrap_or_else(|e| e.into_inner());
        slot.as_ref().filter(|s| !self.is_expired(s)).cloned()
    }

    pub fn is_authenticated(&self) -> bool {
        self.current().is_some()
    }

    /// Session required by every mutating operation.
    pub fn require_admin(&self) -> Result<AdminSession, ConsoleError> {
        let slot = self.slot.read().unwrap_or_else(|e| e.into_inner());
        match slot.as_ref() {
            None => Err(ConsoleError::Unauthorized("no admin session".to_string())),
            Some(s) if self.is_expired(s) => {
                Err(ConsoleError::Unauthorized("admin session expired".to_string()))
            }
            Some(s) if s.role() != Role::Admin => Err(ConsoleError::Unauthorized(format!(
                "session role {} is not admin",
                s.role()
            ))),
            Some(s) => Ok(s.clone()),
        }
    }

    pub(crate) fn install(&self, session: AdminSession) {
        *self.slot.write().unwrap_or_else(|e| e.into_inner()) = Some(session);
    }

    pub(crate) fn clear(&self) {
        *self.slot.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

/// What survives a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredToken {
    pub token: AuthToken,
    pub wallet_address: WalletAddress,
    pub issued_at_ms: u64,
}

/// Durable storage for the admin token.
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Result<Option<StoredToken>, ConsoleError>;
    fn save(&self, token: &StoredToken) -> Result<(), ConsoleError>;
    fn clear(&self) -> Result<(), ConsoleError>;
}

/// JSON file store.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn storage_err(path: &Path, e: impl fmt::Display) -> ConsoleError {
    ConsoleError::Storage(format!("{}: {e}", path.display()))
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<StoredToken>, ConsoleError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage_err(&self.path, e)),
        };
        match serde_json::from_str::<StoredToken>(&raw) {
            Ok(stored) => Ok(Some(stored)),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring unreadable token file");
                Ok(None)
            }
        }
    }

    fn save(&self, token: &StoredToken) -> Result<(), ConsoleError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| storage_err(parent, e))?;
        }
        let bytes = serde_json::to_vec_pretty(token).map_err(|e| storage_err(&self.path, e))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes).map_err(|e| storage_err(&tmp, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| storage_err(&self.path, e))
    }

    fn clear(&self) -> Result<(), ConsoleError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_err(&self.path, e)),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    slot: Mutex<Option<StoredToken>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<StoredToken>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<StoredToken>, ConsoleError> {
        Ok(self.lock().clone())
    }

    fn save(&self, token: &StoredToken) -> Result<(), ConsoleError> {
        *self.lock() = Some(token.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), ConsoleError> {
        *self.lock() = None;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateState {
    Disconnected,
    WalletConnected {
        wallet: WalletAddress,
    },
    OtpRequested {
        wallet: WalletAddress,
        requested_at_ms: u64,
    },
    Authenticated {
        wallet: WalletAddress,
    },
}

impl GateState {
    pub fn wallet(&self) -> Option<&WalletAddress> {
        match self {
            GateState::Disconnected => None,
            GateState::WalletConnected { wallet }
            | GateState::OtpRequested { wallet, .. }
            | GateState::Authenticated { wallet } => Some(wallet),
        }
    }
}

pub struct AdminSessionGate {
    directory: Arc<dyn IdentityDirectory>,
    tokens: Arc<dyn TokenStore>,
    session: SessionContext,
    cooldown_ms: u64,
    state: Mutex<GateState>,
}

impl fmt::Debug for AdminSessionGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminSessionGate")
            .field("state", &self.state())
            .field("cooldown_ms", &self.cooldown_ms)
            .finish()
    }
}

fn parse_wallet(raw: &str) -> Result<WalletAddress, ConsoleError> {
    WalletAddress::parse(raw).map_err(|e| ConsoleError::Validation(e.to_string()))
}

impl AdminSessionGate {
    pub fn new(
        directory: Arc<dyn IdentityDirectory>,
        tokens: Arc<dyn TokenStore>,
        session: SessionContext,
        otp_cooldown_secs: u64,
    ) -> Self {
        Self {
            directory,
            tokens,
            session,
            cooldown_ms: otp_cooldown_secs.saturating_mul(1_000),
            state: Mutex::new(GateState::Disconnected),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn session(&self) -> SessionContext {
        self.session.clone()
    }

    /// Current state. An `Authenticated` gate whose session has expired reports
    /// `WalletConnected`.
    pub fn state(&self) -> GateState {
        let state = self.lock().clone();
        match state {
            GateState::Authenticated { wallet } if !self.session.is_authenticated() => {
                GateState::WalletConnected { wallet }
            }
            other => other,
        }
    }

    /// Seconds until a resend is allowed; zero outside `OtpRequested`.
    pub fn resend_cooldown_remaining(&self) -> u64 {
        match &*self.lock() {
            GateState::OtpRequested {
                requested_at_ms, ..
            } => {
                let elapsed = self.session.now_ms().saturating_sub(*requested_at_ms);
                self.cooldown_ms.saturating_sub(elapsed).div_ceil(1_000)
            }
            _ => 0,
        }
    }

    /// Bind `raw` as the connected wallet. Switching wallets drops any session bound
    /// to the previous one.
    pub fn connect_wallet(&self, raw: &str) -> Result<WalletAddress, ConsoleError> {
        let wallet = parse_wallet(raw)?;
        let previous = {
            let mut state = self.lock();
            if state.wallet() == Some(&wallet) {
                return Ok(wallet);
            }
            std::mem::replace(
                &mut *state,
                GateState::WalletConnected {
                    wallet: wallet.clone(),
                },
            )
        };
        if matches!(previous, GateState::Authenticated { .. }) {
            self.session.clear();
            if let Err(e) = self.tokens.clear() {
                warn!(error = %e, "failed clearing token of previous wallet");
            }
        }
        info!(wallet = %wallet, "wallet connected");
        Ok(wallet)
    }

    /// Ask the backend to email an OTP to the admin bound to `raw`.
    pub async fn request_challenge(&self, raw: &str) -> Result<(), ConsoleError> {
        let wallet = parse_wallet(raw)?;
        match self.state() {
            GateState::WalletConnected { wallet: connected } if connected == wallet => {}
            GateState::OtpRequested { wallet: connected, .. } if connected == wallet => {
                let remaining_secs = self.resend_cooldown_remaining();
                if remaining_secs > 0 {
                    return Err(ConsoleError::CooldownActive { remaining_secs });
                }
            }
            GateState::Disconnected => {
                return Err(ConsoleError::InvalidState(
                    "connect a wallet before requesting an otp".to_string(),
                ))
            }
            GateState::Authenticated { .. } => {
                return Err(ConsoleError::InvalidState(
                    "session is already authenticated".to_string(),
                ))
            }
            GateState::WalletConnected { .. } | GateState::OtpRequested { .. } => {
                return Err(ConsoleError::Validation(format!(
                    "{wallet} is not the connected wallet"
                )))
            }
        }
        self.send_challenge(wallet).await
    }

    /// Same contract as [`Self::request_challenge`] but only valid once a challenge
    /// is outstanding; refused while the cooldown runs.
    pub async fn resend_challenge(&self, raw: &str) -> Result<(), ConsoleError> {
        let wallet = parse_wallet(raw)?;
        match self.state() {
            GateState::OtpRequested { wallet: connected, .. } if connected == wallet => {}
            _ => {
                return Err(ConsoleError::InvalidState(
                    "no otp challenge outstanding for this wallet".to_string(),
                ))
            }
        }
        let remaining_secs = self.resend_cooldown_remaining();
        if remaining_secs > 0 {
            return Err(ConsoleError::CooldownActive { remaining_secs });
        }
        self.send_challenge(wallet).await
    }

    async fn send_challenge(&self, wallet: WalletAddress) -> Result<(), ConsoleError> {
        let outcome = self.directory.request_admin_otp(&wallet).await;
        let result = match outcome {
            Ok(status) if status.is_sent() => Ok(()),
            Ok(status) => {
                debug!(wallet = %wallet, status = %status.status, "otp not sent");
                Err(ConsoleError::NotRegisteredAdmin(wallet.to_string()))
            }
            Err(DirectoryError::HttpStatus {
                status: 403 | 404, ..
            }) => Err(ConsoleError::NotRegisteredAdmin(wallet.to_string())),
            Err(e) => Err(e.into()),
        };

        let mut state = self.lock();
        if state.wallet() != Some(&wallet) {
            // Wallet switched while the request was outstanding.
            return result.and(Err(ConsoleError::InvalidState(
                "wallet changed during otp request".to_string(),
            )));
        }
        match &result {
            Ok(()) => {
                metrics::OTP_REQUESTS_TOTAL.with_label_values(&["sent"]).inc();
                *state = GateState::OtpRequested {
                    wallet: wallet.clone(),
                    requested_at_ms: self.session.now_ms(),
                };
                info!(wallet = %wallet, "otp challenge issued");
            }
            Err(ConsoleError::NotRegisteredAdmin(_)) => {
                metrics::OTP_REQUESTS_TOTAL
                    .with_label_values(&["not_admin"])
                    .inc();
                *state = GateState::WalletConnected {
                    wallet: wallet.clone(),
                };
                warn!(wallet = %wallet, "otp requested for non-admin wallet");
            }
            Err(e) => {
                metrics::OTP_REQUESTS_TOTAL.with_label_values(&["error"]).inc();
                warn!(wallet = %wallet, error = %e, "otp request failed");
            }
        }
        result
    }

    /// Abandon an outstanding challenge.
    pub fn cancel_challenge(&self) {
        let mut state = self.lock();
        if let GateState::OtpRequested { wallet, .. } = &*state {
            *state = GateState::WalletConnected {
                wallet: wallet.clone(),
            };
        }
    }

    /// Submit the emailed code. The format is checked locally before any request.
    pub async fn verify_challenge(&self, raw: &str, code: &str) -> Result<AdminSession, ConsoleError> {
        if !is_valid_otp_format(code) {
            return Err(ConsoleError::Validation(
                "otp must be exactly 6 digits".to_string(),
            ));
        }
        let wallet = parse_wallet(raw)?;
        match self.state() {
            GateState::OtpRequested { wallet: w, .. } if w == wallet => {}
            GateState::OtpRequested { .. } => {
                return Err(ConsoleError::Validation(format!(
                    "{wallet} did not request the outstanding otp"
                )))
            }
            _ => {
                return Err(ConsoleError::InvalidState(
                    "no otp challenge outstanding".to_string(),
                ))
            }
        }

        let request = AdminOtpVerifyRequest {
            wallet_address: wallet.clone(),
            otp: code.to_string(),
        };
        let resp = match self.directory.verify_admin_otp(&request).await {
            Ok(resp) => resp,
            Err(DirectoryError::HttpStatus {
                status: 400 | 401,
                message,
            }) => {
                return Err(ConsoleError::InvalidOtp(
                    message.unwrap_or_else(|| "Invalid OTP. Try again.".to_string()),
                ))
            }
            Err(DirectoryError::HttpStatus {
                status: 403 | 404, ..
            }) => return Err(ConsoleError::NotRegisteredAdmin(wallet.to_string())),
            Err(e) => return Err(e.into()),
        };

        if resp.user.role != Role::Admin {
            self.cancel_challenge();
            return Err(ConsoleError::NotRegisteredAdmin(wallet.to_string()));
        }
        if resp.user.wallet_address.as_ref().is_some_and(|w| w != &wallet) {
            return Err(ConsoleError::InvalidState(
                "backend bound the session to a different wallet".to_string(),
            ));
        }
        if resp.token.is_blank() {
            return Err(ConsoleError::Transport(
                "backend returned an empty token".to_string(),
            ));
        }

        let session = AdminSession {
            wallet_address: wallet.clone(),
            token: resp.token,
            user: resp.user,
            issued_at_ms: self.session.now_ms(),
        };
        self.tokens.save(&StoredToken {
            token: session.token.clone(),
            wallet_address: wallet.clone(),
            issued_at_ms: session.issued_at_ms,
        })?;

        let mut state = self.lock();
        if state.wallet() != Some(&wallet) {
            drop(state);
            if let Err(e) = self.tokens.clear() {
                warn!(error = %e, "failed clearing token after wallet switch");
            }
            return Err(ConsoleError::InvalidState(
                "wallet changed during otp verification".to_string(),
            ));
        }
        self.session.install(session.clone());
        *state = GateState::Authenticated {
            wallet: wallet.clone(),
        };
        info!(wallet = %wallet, "admin session authenticated");
        Ok(session)
    }

    /// Re-validate a stored token for the connected wallet. `Ok(false)` means the
    /// registrar has to go through the OTP flow.
    pub async fn restore(&self, raw: &str) -> Result<bool, ConsoleError> {
        let wallet = parse_wallet(raw)?;
        match self.state() {
            GateState::WalletConnected { wallet: w } if w == wallet => {}
            GateState::Authenticated { wallet: w } if w == wallet => return Ok(true),
            _ => {
                return Err(ConsoleError::InvalidState(format!(
                    "{wallet} is not the connected wallet"
                )))
            }
        }

        let Some(stored) = self.tokens.load()? else {
            return Ok(false);
        };
        let now = self.session.now_ms();
        let expired = now.saturating_sub(stored.issued_at_ms) >= self.session.max_age_ms;
        if stored.wallet_address != wallet || expired || stored.token.is_blank() {
            debug!(wallet = %wallet, expired, "stored token not usable");
            self.tokens.clear()?;
            return Ok(false);
        }

        let user = match self.directory.profile(&stored.token).await {
            Ok(user) => user,
            Err(DirectoryError::HttpStatus {
                status: 401 | 403, ..
            }) => {
                self.tokens.clear()?;
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };
        if user.role != Role::Admin || user.wallet_address.as_ref() != Some(&wallet) {
            warn!(wallet = %wallet, "stored token belongs to a different identity");
            self.tokens.clear()?;
            return Ok(false);
        }

        let mut state = self.lock();
        if state.wallet() != Some(&wallet) {
            return Ok(false);
        }
        self.session.install(AdminSession {
            wallet_address: wallet.clone(),
            token: stored.token,
            user,
            issued_at_ms: stored.issued_at_ms,
        });
        *state = GateState::Authenticated {
            wallet: wallet.clone(),
        };
        info!(wallet = %wallet, "admin session restored");
        Ok(true)
    }

    /// Clear the session and the stored token unconditionally.
    pub fn disconnect_session(&self) -> Result<(), ConsoleError> {
        self.session.clear();
        *self.lock() = GateState::Disconnected;
        info!("admin session disconnected");
        self.tokens.clear()
    }
}
