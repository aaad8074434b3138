//! Document reference resolution against the file-serving service.
#![forbid(unsafe_code)]

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FileResolveError {
    #[error("file service configuration error: {0}")]
    Config(String),
    #[error("file service network error: {0}")]
    Network(String),
    #[error("file service returned http status {0}")]
    HttpStatus(u16),
    #[error("file service decode error: {0}")]
    Decode(String),
}

/// Turns an opaque storage reference into a fetchable URL.
#[async_trait]
pub trait FileResolver: Send + Sync {
    async fn resolve(&self, reference: &str) -> Result<String, FileResolveError>;

    /// URL to hand out when [`FileResolver::resolve`] fails.
    fn fallback_url(&self, reference: &str) -> String;
}

/// `true` for references that are already absolute HTTP(S) URLs.
pub fn is_absolute_url(reference: &str) -> bool {
    let lower = reference.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileServiceConfig {
    pub base_url: String,
    /// Base for best-effort URLs when resolution fails; defaults to `base_url`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_base_url: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    5_000
}

impl FileServiceConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            fallback_base_url: None,
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Deserialize)]
struct ResolveResponse {
    url: String,
}

/// `GET {base_url}/{reference}` -> `{ "url": ... }`.
#[derive(Debug, Clone)]
pub struct HttpFileResolver {
    cfg: FileServiceConfig,
    client: reqwest::Client,
}

impl HttpFileResolver {
    pub fn new(cfg: FileServiceConfig) -> Result<Self, FileResolveError> {
        if cfg.base_url.trim().is_empty() {
            return Err(FileResolveError::Config("files.base_url is empty".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| FileResolveError::Config(format!("failed to build http client: {e}")))?;
        Ok(Self { cfg, client })
    }
}

fn join(base: &str, reference: &str) -> String {
    let base = base.trim_end_matches('/');
    let reference = reference.trim().trim_start_matches('/');
    format!("{base}/{reference}")
}

#[async_trait]
impl FileResolver for HttpFileResolver {
    async fn resolve(&self, reference: &str) -> Result<String, FileResolveError> {
        if is_absolute_url(reference) {
            return Ok(reference.trim().to_string());
        }
        let url = join(&self.cfg.base_url, reference);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FileResolveError::Network(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "file service non-success status");
            return Err(FileResolveError::HttpStatus(status.as_u16()));
        }
        let parsed: ResolveResponse = resp
            .json()
            .await
            .map_err(|e| FileResolveError::Decode(e.to_string()))?;
        debug!(reference, "document reference resolved");
        Ok(parsed.url)
    }

    fn fallback_url(&self, reference: &str) -> String {
        if is_absolute_url(reference) {
            return reference.trim().to_string();
        }
        let base = self
            .cfg
            .fallback_base_url
            .as_deref()
            .unwrap_or(&self.cfg.base_url);
        join(base, reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn absolute_url_detection() {
        assert!(is_absolute_url("https://cdn.example/doc.png"));
        assert!(is_absolute_url("HTTP://cdn.example/doc.png"));
        assert!(!is_absolute_url("bafybeigdyrzt/doc.png"));
        assert!(!is_absolute_url("ipfs://bafy"));
    }

    #[tokio::test]
    async fn absolute_reference_passes_through_without_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let r = HttpFileResolver::new(FileServiceConfig::new(server.uri())).unwrap();
        let url = r.resolve("https://cdn.example/nic.png").await.unwrap();
        assert_eq!(url, "https://cdn.example/nic.png");
    }

    #[tokio::test]
    async fn relative_reference_is_resolved_by_service() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/nic-front.png"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "url": "https://signed.example/nic-front.png?sig=abc"
            })))
            .mount(&server)
            .await;

        let r = HttpFileResolver::new(FileServiceConfig::new(server.uri())).unwrap();
        let url = r.resolve("nic-front.png").await.unwrap();
        assert_eq!(url, "https://signed.example/nic-front.png?sig=abc");
    }

    #[test]
    fn fallback_prefers_dedicated_base() {
        let mut cfg = FileServiceConfig::new("http://files.local/api/files/");
        let r = HttpFileResolver::new(cfg.clone()).unwrap();
        assert_eq!(r.fallback_url("a.pdf"), "http://files.local/api/files/a.pdf");

        cfg.fallback_base_url = Some("https://gateway.example/ipfs".to_string());
        let r = HttpFileResolver::new(cfg).unwrap();
        assert_eq!(r.fallback_url("/a.pdf"), "https://gateway.example/ipfs/a.pdf");
    }
}
