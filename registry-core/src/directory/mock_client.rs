//! Deterministic in-memory directory for tests and offline smoke paths.
#![forbid(unsafe_code)]

use super::{
    AdminOtpStatus, AdminOtpVerifyRequest, AdminOtpVerifyResponse, DirectoryError,
    IdentityDirectory, RegisterDepartmentUserRequest, VerifyKycRequest, VerifyKycResponse, OTP_SENT,
};
use crate::{AuthToken, KycStatus, Role, User, UserId, WalletAddress};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

/// Default OTP accepted by [`MockDirectory`].
pub const MOCK_OTP: &str = "123456";

#[derive(Debug, Default)]
struct State {
    users: Vec<User>,
    admins: HashSet<WalletAddress>,
    otp_issued: HashSet<WalletAddress>,
    tokens: HashMap<String, UserId>,
    calls: HashMap<&'static str, usize>,
    failures: HashMap<&'static str, VecDeque<DirectoryError>>,
    verify_requests: Vec<(UserId, VerifyKycRequest)>,
    next_id: u64,
}

#[derive(Debug, Default)]
pub struct MockDirectory {
    state: Mutex<State>,
    verify_gate: Mutex<Option<Arc<Notify>>>,
    otp: Mutex<Option<String>>,
}

impl MockDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with_users(users: Vec<User>) -> Self {
        let dir = Self::new();
        dir.lock().users = users;
        dir
    }

    pub fn insert_user(&self, user: User) {
        self.lock().users.push(user);
    }

    /// Register `wallet` as an admin wallet and create its directory record.
    pub fn add_admin(&self, wallet: WalletAddress) -> User {
        let mut st = self.lock();
        st.next_id += 1;
        let admin = User {
            id: UserId::new(format!("admin-{}", st.next_id)),
            name: "Registry Admin".to_string(),
            email: "admin@registry.example".to_string(),
            nic: String::new(),
            wallet_address: Some(wallet.clone()),
            role: Role::Admin,
            kyc_status: KycStatus::Verified,
            kyc_document_hash: None,
            kyc_documents: Default::default(),
            created_at: None,
            updated_at: None,
        };
        st.admins.insert(wallet);
        st.users.push(admin.clone());
        admin
    }

    /// Override the accepted OTP (defaults to [`MOCK_OTP`]).
    pub fn set_otp(&self, code: impl Into<String>) {
        *self.otp.lock().unwrap_or_else(|e| e.into_inner()) = Some(code.into());
    }

    /// Issue a token for an existing user without going through the OTP flow.
    pub fn issue_token(&self, user_id: &UserId) -> AuthToken {
        let mut st = self.lock();
        st.next_id += 1;
        let token = format!("mock-token-{}", st.next_id);
        st.tokens.insert(token.clone(), user_id.clone());
        AuthToken::new(token)
    }

    pub fn user(&self, id: &UserId) -> Option<User> {
        self.lock().users.iter().find(|u| &u.id == id).cloned()
    }

    pub fn users(&self) -> Vec<User> {
        self.lock().users.clone()
    }

    /// Number of calls observed for `op` (trait method name).
    pub fn calls(&self, op: &str) -> usize {
        self.lock().calls.get(op).copied().unwrap_or(0)
    }

    /// Make the next call to `op` fail with `err`.
    pub fn fail_next(&self, op: &'static str, err: DirectoryError) {
        self.lock().failures.entry(op).or_default().push_back(err);
    }

    pub fn verify_requests(&self) -> Vec<(UserId, VerifyKycRequest)> {
        self.lock().verify_requests.clone()
    }

    /// Hold every `verify_kyc` call until the returned handle is notified.
    pub fn hold_verify_kyc(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.verify_gate.lock().unwrap_or_else(|e| e.into_inner()) = Some(gate.clone());
        gate
    }

    fn enter(&self, op: &'static str) -> Result<(), DirectoryError> {
        let mut st = self.lock();
        *st.calls.entry(op).or_insert(0) += 1;
        match st.failures.get_mut(op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn authorize(st: &State, token: &AuthToken) -> Result<UserId, DirectoryError> {
        st.tokens
            .get(token.expose())
            .cloned()
            .ok_or(DirectoryError::HttpStatus {
                status: 401,
                message: Some("Not authorized, token failed".to_string()),
            })
    }
}

fn status_error(status: u16, message: &str) -> DirectoryError {
    DirectoryError::HttpStatus {
        status,
        message: Some(message.to_string()),
    }
}

#[async_trait]
impl IdentityDirectory for MockDirectory {
    async fn profile(&self, token: &AuthToken) -> Result<User, DirectoryError> {
        self.enter("profile")?;
        let st = self.lock();
        let id = Self::authorize(&st, token)?;
        st.users
            .iter()
            .find(|u| u.id == id)
            .cloned()
            .ok_or_else(|| status_error(404, "User not found"))
    }

    async fn pending_kyc(&self, token: &AuthToken) -> Result<Vec<User>, DirectoryError> {
        self.enter("pending_kyc")?;
        let st = self.lock();
        Self::authorize(&st, token)?;
        Ok(st
            .users
            .iter()
            .filter(|u| u.role != Role::Admin)
            .cloned()
            .collect())
    }

    async fn list_users(&self, token: &AuthToken) -> Result<Vec<User>, DirectoryError> {
        self.enter("list_users")?;
        let st = self.lock();
        Self::authorize(&st, token)?;
        Ok(st.users.clone())
    }

    async fn search_users(&self, query: &str) -> Result<Vec<User>, DirectoryError> {
        self.enter("search_users")?;
        let needle = query.to_lowercase();
        let st = self.lock();
        Ok(st
            .users
            .iter()
            .filter(|u| {
                u.name.to_lowercase().contains(&needle)
                    || u.email.to_lowercase().contains(&needle)
                    || u
                        .wallet_address
                        .as_ref()
                        .is_some_and(|w| w.as_str().contains(&needle))
            })
            .cloned()
            .collect())
    }

    async fn verify_kyc(
        &self,
        token: &AuthToken,
        id: &UserId,
        request: &VerifyKycRequest,
    ) -> Result<VerifyKycResponse, DirectoryError> {
        self.enter("verify_kyc")?;
        let gate = self
            .verify_gate
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let mut st = self.lock();
        Self::authorize(&st, token)?;
        st.verify_requests.push((id.clone(), request.clone()));
        let user = st
            .users
            .iter_mut()
            .find(|u| &u.id == id)
            .ok_or_else(|| status_error(404, "User not found"))?;
        user.kyc_status = user
            .kyc_status
            .transition(request.status)
            .map_err(|e| status_error(409, &e.to_string()))?;
        Ok(VerifyKycResponse {
            message: Some(format!("KYC {}", request.status.as_str())),
            user: user.clone(),
        })
    }

    async fn request_admin_otp(
        &self,
        wallet: &WalletAddress,
    ) -> Result<AdminOtpStatus, DirectoryError> {
        self.enter("request_admin_otp")?;
        let mut st = self.lock();
        if !st.admins.contains(wallet) {
            return Err(status_error(404, "Admin not found"));
        }
        st.otp_issued.insert(wallet.clone());
        Ok(AdminOtpStatus {
            wallet_address: wallet.to_string(),
            status: OTP_SENT.to_string(),
        })
    }

    async fn verify_admin_otp(
        &self,
        request: &AdminOtpVerifyRequest,
    ) -> Result<AdminOtpVerifyResponse, DirectoryError> {
        self.enter("verify_admin_otp")?;
        let expected = self
            .otp
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .unwrap_or_else(|| MOCK_OTP.to_string());

        let mut st = self.lock();
        if !st.otp_issued.contains(&request.wallet_address) || request.otp != expected {
            return Err(status_error(401, "Invalid or expired OTP"));
        }
        st.otp_issued.remove(&request.wallet_address);
        let user = st
            .users
            .iter()
            .find(|u| u.wallet_address.as_ref() == Some(&request.wallet_address))
            .cloned()
            .ok_or_else(|| status_error(404, "Admin not found"))?;
        st.next_id += 1;
        let token = format!("mock-token-{}", st.next_id);
        st.tokens.insert(token.clone(), user.id.clone());
        Ok(AdminOtpVerifyResponse {
            message: Some("OTP verified".to_string()),
            token: AuthToken::new(token),
            user,
        })
    }

    async fn register_department_user(
        &self,
        token: &AuthToken,
        request: &RegisterDepartmentUserRequest,
    ) -> Result<User, DirectoryError> {
        self.enter("register_department_user")?;
        let mut st = self.lock();
        Self::authorize(&st, token)?;
        if st
            .users
            .iter()
            .any(|u| u.wallet_address.as_ref() == Some(&request.wallet_address))
        {
            return Err(status_error(409, "Wallet address already registered"));
        }
        st.next_id += 1;
        let user = User {
            id: UserId::new(format!("mock-user-{}", st.next_id)),
            name: request.name.clone(),
            email: request.email.clone(),
            nic: request.nic.clone(),
            wallet_address: Some(request.wallet_address.clone()),
            role: request.role.role(),
            kyc_status: KycStatus::Pending,
            kyc_document_hash: None,
            kyc_documents: Default::default(),
            created_at: Some(format!("2025-01-01T00:00:{:02}Z", st.next_id % 60)),
            updated_at: None,
        };
        st.users.push(user.clone());
        Ok(user)
    }
}
