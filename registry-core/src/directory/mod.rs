//! Identity directory contract.
//!
//! The REST backend owns user records, KYC documents and admin OTP issuance. This
//! module defines the wire types and a transport-agnostic [`IdentityDirectory`]
//! trait; runtime transports are adapters ([`http_client::HttpDirectory`]) and tests
//! use [`mock_client::MockDirectory`].
#![forbid(unsafe_code)]

pub mod http_client;
pub mod mock_client;

use crate::{AuthToken, DepartmentRole, KycOutcome, Role, User, UserId, WalletAddress};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Status string returned by `GET /admin/{wallet}` when an OTP was dispatched.
pub const OTP_SENT: &str = "otp_sent";

/// Body of `PATCH /{id}/verify-kyc`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyKycRequest {
    pub status: KycOutcome,
    /// Rejection reason. Sent only for rejections; backends that do not know the
    /// field ignore it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyKycResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub user: User,
}

/// Response of `GET /admin/{wallet}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminOtpStatus {
    #[serde(default)]
    pub wallet_address: String,
    pub status: String,
}

impl AdminOtpStatus {
    pub fn is_sent(&self) -> bool {
        self.status == OTP_SENT
    }
}

/// Body of `POST /admin/verify`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminOtpVerifyRequest {
    pub wallet_address: WalletAddress,
    pub otp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminOtpVerifyResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub token: AuthToken,
    pub user: User,
}

/// Body of `POST /register-department-user`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDepartmentUserRequest {
    pub name: String,
    pub email: String,
    pub nic: String,
    pub wallet_address: WalletAddress,
    pub role: DepartmentRole,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterDepartmentUserResponse {
    pub user: User,
}

/// Backend capabilities required by the console.
///
/// Protected operations take the bearer token explicitly; the caller obtains it from
/// an authenticated admin session.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    /// `GET /profile`
    async fn profile(&self, token: &AuthToken) -> Result<User, DirectoryError>;

    /// `GET /pending-kyc`
    async fn pending_kyc(&self, token: &AuthToken) -> Result<Vec<User>, DirectoryError>;

    /// `GET /`
    async fn list_users(&self, token: &AuthToken) -> Result<Vec<User>, DirectoryError>;

    /// `GET /search-user?query=`
    async fn search_users(&self, query: &str) -> Result<Vec<User>, DirectoryError>;

    /// `PATCH /{id}/verify-kyc`
    async fn verify_kyc(
        &self,
        token: &AuthToken,
        id: &UserId,
        request: &VerifyKycRequest,
    ) -> Result<VerifyKycResponse, DirectoryError>;

    /// `GET /admin/{walletAddress}`
    async fn request_admin_otp(
        &self,
        wallet: &WalletAddress,
    ) -> Result<AdminOtpStatus, DirectoryError>;

    /// `POST /admin/verify`
    async fn verify_admin_otp(
        &self,
        request: &AdminOtpVerifyRequest,
    ) -> Result<AdminOtpVerifyResponse, DirectoryError>;

    /// `POST /register-department-user`
    async fn register_department_user(
        &self,
        token: &AuthToken,
        request: &RegisterDepartmentUserRequest,
    ) -> Result<User, DirectoryError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("http status {status}: {}", .message.as_deref().unwrap_or("<no message>"))]
    HttpStatus {
        status: u16,
        /// `message` field of a JSON error body, when present.
        message: Option<String>,
    },
    #[error("decode error: {0}")]
    Decode(String),
}

impl DirectoryError {
    pub fn http_status(&self) -> Option<u16> {
        match self {
            DirectoryError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn backend_message(&self) -> Option<&str> {
        match self {
            DirectoryError::HttpStatus { message, .. } => message.as_deref(),
            _ => None,
        }
    }
}

/// Order-preserving subset of `users` holding `role`.
pub fn users_with_role(users: &[User], role: Role) -> Vec<User> {
    users.iter().filter(|u| u.role == role).cloned().collect()
}
