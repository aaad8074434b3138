//! HTTP transport adapter for the identity directory.
//!
//! Reads retry on connect/timeout failures and 5xx responses with capped exponential
//! backoff. Mutations (KYC decisions, OTP verification, registrations) are sent
//! exactly once: retrying them is the registrar's decision, never the transport's.
#![forbid(unsafe_code)]

use super::{
    AdminOtpStatus, AdminOtpVerifyRequest, AdminOtpVerifyResponse, DirectoryError,
    IdentityDirectory, RegisterDepartmentUserRequest, RegisterDepartmentUserResponse,
    VerifyKycRequest, VerifyKycResponse,
};
use crate::{AuthToken, User, UserId, WalletAddress};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// HTTP binding configuration for the directory backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryHttpConfig {
    /// Base URL of the users API, e.g. `http://localhost:5000/api/users`.
    pub base_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Attempts for read operations (>= 1).
    #[serde(default = "default_retry_max")]
    pub retry_max: u32,
}

fn default_timeout_ms() -> u64 {
    DirectoryHttpConfig::DEFAULT_TIMEOUT_MS
}

fn default_retry_max() -> u32 {
    DirectoryHttpConfig::DEFAULT_RETRY_MAX
}

impl DirectoryHttpConfig {
    pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
    pub const DEFAULT_RETRY_MAX: u32 = 3;

    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_ms: Self::DEFAULT_TIMEOUT_MS,
            retry_max: Self::DEFAULT_RETRY_MAX,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpDirectory {
    cfg: DirectoryHttpConfig,
    client: reqwest::Client,
}

impl HttpDirectory {
    pub fn new(cfg: DirectoryHttpConfig) -> Result<Self, DirectoryError> {
        if cfg.base_url.trim().is_empty() {
            return Err(DirectoryError::Config("base_url is empty".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| DirectoryError::Config(format!("failed to build http client: {e}")))?;
        Ok(Self { cfg, client })
    }

    fn join(&self, path: &str) -> String {
        let base = self.cfg.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/{path}")
    }

    fn authorized(builder: reqwest::RequestBuilder, token: &AuthToken) -> reqwest::RequestBuilder {
        builder.bearer_auth(token.expose())
    }

    async fn read_with_retry<T, F>(&self, op: &'static str, make_req: F) -> Result<T, DirectoryError>
    where
        T: for<'de> Deserialize<'de>,
        F: Fn() -> reqwest::RequestBuilder,
    {
        let attempts = self.cfg.retry_max.max(1);
        for attempt in 1..=attempts {
            debug!(operation = op, attempt, "sending directory request");
            let resp = match make_req().send().await {
                Ok(resp) => resp,
                Err(err) => {
                    warn!(operation = op, attempt, error = %err, "directory request error");
                    if attempt == attempts || !is_retryable(&err) {
                        return Err(map_reqwest_error(err));
                    }
                    backoff(op, attempt).await;
                    continue;
                }
            };

            match Self::map_response(op, resp).await {
                Ok(parsed) => return Ok(parsed),
                Err(err) => {
                    let server_side = matches!(err, DirectoryError::HttpStatus { status, .. } if status >= 500);
                    if attempt == attempts || !server_side {
                        return Err(err);
                    }
                    backoff(op, attempt).await;
                }
            }
        }

        Err(DirectoryError::Config(
            "retry loop exhausted unexpectedly".to_string(),
        ))
    }

    async fn send_once<T>(
        &self,
        op: &'static str,
        builder: reqwest::RequestBuilder,
    ) -> Result<T, DirectoryError>
    where
        T: for<'de> Deserialize<'de>,
    {
        info!(operation = op, "sending directory mutation");
        let resp = builder.send().await.map_err(|err| {
            warn!(operation = op, error = %err, "directory mutation error");
            map_reqwest_error(err)
        })?;
        Self::map_response(op, resp).await
    }

    async fn map_response<T>(op: &'static str, resp: reqwest::Response) -> Result<T, DirectoryError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| DirectoryError::Network(e.to_string()))?;
        if !status.is_success() {
            warn!(operation = op, status = status.as_u16(), "non-success status");
            return Err(DirectoryError::HttpStatus {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }
        serde_json::from_str(&body)
            .map_err(|e| DirectoryError::Decode(e.to_string()))
            .inspect(|_parsed| {
                debug!(operation = op, "response decoded");
            })
    }
}

#[async_trait]
impl IdentityDirectory for HttpDirectory {
    async fn profile(&self, token: &AuthToken) -> Result<User, DirectoryError> {
        let url = self.join("/profile");
        self.read_with_retry("profile", || Self::authorized(self.client.get(&url), token))
            .await
    }

    async fn pending_kyc(&self, token: &AuthToken) -> Result<Vec<User>, DirectoryError> {
        let url = self.join("/pending-kyc");
        self.read_with_retry("pending_kyc", || {
            Self::authorized(self.client.get(&url), token)
        })
        .await
    }

    async fn list_users(&self, token: &AuthToken) -> Result<Vec<User>, DirectoryError> {
        let url = self.join("/");
        self.read_with_retry("list_users", || Self::authorized(self.client.get(&url), token))
            .await
    }

    async fn search_users(&self, query: &str) -> Result<Vec<User>, DirectoryError> {
        let url = self.join("/search-user");
        self.read_with_retry("search_users", || {
            self.client.get(&url).query(&[("query", query)])
        })
        .await
    }

    async fn verify_kyc(
        &self,
        token: &AuthToken,
        id: &UserId,
        request: &VerifyKycRequest,
    ) -> Result<VerifyKycResponse, DirectoryError> {
        let url = self.join(&format!("/{}/verify-kyc", id.as_str()));
        let builder = Self::authorized(self.client.patch(url), token).json(request);
        self.send_once("verify_kyc", builder).await
    }

    async fn request_admin_otp(
        &self,
        wallet: &WalletAddress,
    ) -> Result<AdminOtpStatus, DirectoryError> {
        let url = self.join(&format!("/admin/{}", wallet.as_str()));
        // Issues an email as a side effect; not retried.
        self.send_once("request_admin_otp", self.client.get(url)).await
    }

    async fn verify_admin_otp(
        &self,
        request: &AdminOtpVerifyRequest,
    ) -> Result<AdminOtpVerifyResponse, DirectoryError> {
        let url = self.join("/admin/verify");
        self.send_once("verify_admin_otp", self.client.post(url).json(request))
            .await
    }

    async fn register_department_user(
        &self,
        token: &AuthToken,
        request: &RegisterDepartmentUserRequest,
    ) -> Result<User, DirectoryError> {
        let url = self.join("/register-department-user");
        let builder = Self::authorized(self.client.post(url), token).json(request);
        let resp: RegisterDepartmentUserResponse =
            self.send_once("register_department_user", builder).await?;
        Ok(resp.user)
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

fn error_message(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message)
        .filter(|m| !m.trim().is_empty())
}

fn is_retryable(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

fn map_reqwest_error(err: reqwest::Error) -> DirectoryError {
    if err.is_body() || err.is_decode() {
        return DirectoryError::Decode(err.to_string());
    }
    DirectoryError::Network(err.to_string())
}

async fn backoff(op: &str, attempt: u32) {
    let delay_ms = backoff_delay_ms(attempt);
    warn!(operation = op, attempt, delay_ms, "retrying after backoff");
    sleep(Duration::from_millis(delay_ms)).await;
}

fn backoff_delay_ms(attempt: u32) -> u64 {
    // Exponential, capped at 2s, no jitter.
    let exp = attempt.saturating_sub(1);
    let base = 100u64.saturating_mul(2u64.saturating_pow(exp));
    base.min(2_000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{KycOutcome, KycStatus, Role};
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: String) -> DirectoryHttpConfig {
        DirectoryHttpConfig {
            base_url,
            timeout_ms: 1_000,
            retry_max: 3,
        }
    }

    fn user_json(id: &str, status: &str) -> serde_json::Value {
        serde_json::json!({
            "_id": id,
            "name": "Alice",
            "email": "alice@example.com",
            "nic": "901234567V",
            "walletAddress": "0xAbC0000000000000000000000000000000000001",
            "role": "user",
            "kycStatus": status
        })
    }

    #[tokio::test]
    async fn pending_kyc_attaches_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pending-kyc"))
            .and(header("authorization", "Bearer t1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!([user_json("u1", "pending")])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = HttpDirectory::new(test_config(server.uri())).unwrap();
        let users = dir.pending_kyc(&AuthToken::new("t1")).await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].kyc_status, KycStatus::Pending);
        assert_eq!(users[0].role, Role::PublicUser);
    }

    #[tokio::test]
    async fn reads_retry_on_500() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let dir = HttpDirectory::new(test_config(server.uri())).unwrap();
        let users = dir.list_users(&AuthToken::new("t")).await.unwrap();
        assert!(users.is_empty());
    }

    #[tokio::test]
    async fn verify_kyc_is_sent_once_even_on_500() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/u1/verify-kyc"))
            .and(body_json(serde_json::json!({"status": "verified"})))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({"message": "db down"})))
            .expect(1)
            .mount(&server)
            .await;

        let dir = HttpDirectory::new(test_config(server.uri())).unwrap();
        let err = dir
            .verify_kyc(
                &AuthToken::new("t"),
                &UserId::new("u1"),
                &VerifyKycRequest {
                    status: KycOutcome::Verified,
                    reason: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), Some(500));
        assert_eq!(err.backend_message(), Some("db down"));
    }

    #[tokio::test]
    async fn search_encodes_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search-user"))
            .and(query_param("query", "a b&c"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([user_json("u9", "verified")])))
            .expect(1)
            .mount(&server)
            .await;

        let dir = HttpDirectory::new(test_config(server.uri())).unwrap();
        let users = dir.search_users("a b&c").await.unwrap();
        assert_eq!(users[0].id, UserId::new("u9"));
    }

    #[tokio::test]
    async fn admin_otp_round_trip_shapes() {
        let server = MockServer::start().await;
        let wallet = WalletAddress::parse("0xabc0000000000000000000000000000000000001").unwrap();
        Mock::given(method("GET"))
            .and(path(format!("/admin/{}", wallet.as_str())))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "walletAddress": wallet.as_str(),
                "status": "otp_sent"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/admin/verify"))
            .and(body_json(serde_json::json!({"walletAddress": wallet.as_str(), "otp": "123456"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "message": "ok",
                "token": "t1",
                "user": {"_id": "a1", "role": "admin", "walletAddress": wallet.as_str()}
            })))
            .mount(&server)
            .await;

        let dir = HttpDirectory::new(test_config(server.uri())).unwrap();
        assert!(dir.request_admin_otp(&wallet).await.unwrap().is_sent());
        let resp = dir
            .verify_admin_otp(&AdminOtpVerifyRequest {
                wallet_address: wallet.clone(),
                otp: "123456".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(resp.token.expose(), "t1");
        assert_eq!(resp.user.role, Role::Admin);
    }

    #[tokio::test]
    async fn malformed_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/profile"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let dir = HttpDirectory::new(test_config(server.uri())).unwrap();
        let result = dir.profile(&AuthToken::new("t")).await;
        assert!(matches!(result, Err(DirectoryError::Decode(_))));
    }

    #[test]
    fn config_rejects_empty_url() {
        let result = HttpDirectory::new(DirectoryHttpConfig::new("  "));
        assert!(matches!(result, Err(DirectoryError::Config(_))));
    }

    #[test]
    fn backoff_delay_is_bounded() {
        assert_eq!(backoff_delay_ms(1), 100);
        assert_eq!(backoff_delay_ms(3), 400);
        assert_eq!(backoff_delay_ms(6), 2_000);
        assert_eq!(backoff_delay_ms(50), 2_000);
    }
}
