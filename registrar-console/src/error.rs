#![forbid(unsafe_code)]

use registry_core::directory::DirectoryError;
use registry_core::ledger::LedgerError;
use registry_core::{InvalidTransition, LedgerRole, WalletAddress};

/// Errors surfaced to the console UI.
///
/// Nothing here is fatal to the process; every variant is rendered as a message and
/// every in-flight flag is cleared before one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsoleError {
    /// Local input check failed; no network call was made.
    #[error("validation error: {0}")]
    Validation(String),
    #[error("wallet {0} is not registered as an admin")]
    NotRegisteredAdmin(String),
    #[error("invalid otp: {0}")]
    InvalidOtp(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("transaction rejected: {0}")]
    TransactionRejected(String),
    #[error("transaction reverted: {0}")]
    TransactionReverted(String),
    #[error("{wallet} already holds {role}")]
    DuplicateGrant { wallet: WalletAddress, role: LedgerRole },
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("otp resend available in {remaining_secs}s")]
    CooldownActive { remaining_secs: u64 },
    #[error("a decision for {0} is already in flight")]
    AlreadyProcessing(String),
    #[error("unknown subject: {0}")]
    UnknownSubject(String),
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
    #[error("token storage error: {0}")]
    Storage(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl ConsoleError {
    /// Whether offering the registrar a retry action makes sense.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConsoleError::Transport(_)
                | ConsoleError::InvalidOtp(_)
                | ConsoleError::TransactionRejected(_)
                | ConsoleError::TransactionReverted(_)
                | ConsoleError::CooldownActive { .. }
                | ConsoleError::AlreadyProcessing(_)
                | ConsoleError::Storage(_)
        )
    }
}

impl From<DirectoryError> for ConsoleError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::Config(msg) => ConsoleError::Config(msg),
            DirectoryError::HttpStatus { status: 401, message } => ConsoleError::Unauthorized(
                message.unwrap_or_else(|| "backend rejected the session token".to_string()),
            ),
            DirectoryError::HttpStatus {
                status: 400 | 409 | 422,
                message,
            } => ConsoleError::Validation(
                message.unwrap_or_else(|| "backend rejected the request".to_string()),
            ),
            other @ (DirectoryError::Network(_)
            | DirectoryError::HttpStatus { .. }
            | DirectoryError::Decode(_)) => ConsoleError::Transport(other.to_string()),
        }
    }
}

impl From<LedgerError> for ConsoleError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Config(msg) => ConsoleError::Config(msg),
            LedgerError::TransactionRejected(msg) => ConsoleError::TransactionRejected(msg),
            LedgerError::TransactionReverted(msg) => ConsoleError::TransactionReverted(msg),
            LedgerError::Transport(msg) => ConsoleError::Transport(msg),
        }
    }
}
