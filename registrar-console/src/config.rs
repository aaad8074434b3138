#![forbid(unsafe_code)]

use anyhow::{anyhow, bail, Context, Result};
use registry_core::directory::http_client::DirectoryHttpConfig;
use registry_core::files::FileServiceConfig;
use registry_core::ledger::LedgerRpcConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const BACKEND_URL_ENV: &str = "REGISTRAR_BACKEND_URL";
pub const FILE_SERVICE_URL_ENV: &str = "REGISTRAR_FILE_SERVICE_URL";

#[derive(Debug, Clone, Deserialize)]
pub struct ConsoleConfig {
    pub backend: DirectoryHttpConfig,
    pub files: FileServiceConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub ledger: Option<LedgerRpcConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_otp_cooldown_secs")]
    pub otp_cooldown_secs: u64,
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
    #[serde(default = "default_token_path")]
    pub token_path: PathBuf,
}

fn default_otp_cooldown_secs() -> u64 {
    60
}

fn default_max_age_secs() -> u64 {
    8 * 60 * 60
}

fn default_token_path() -> PathBuf {
    PathBuf::from(".registrar/token.json")
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            otp_cooldown_secs: default_otp_cooldown_secs(),
            max_age_secs: default_max_age_secs(),
            token_path: default_token_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn resolve_env_refs(mut v: toml::Value) -> Result<toml::Value> {
    fn walk(v: &mut toml::Value) -> Result<()> {
        match v {
            toml::Value::String(s) => {
                if let Some(var) = s.strip_prefix("env:") {
                    let var = var.trim();
                    if var.is_empty() {
                        bail!("invalid env: reference (empty var name)");
                    }
                    let val = std::env::var(var)
                        .with_context(|| format!("missing required environment variable: {var}"))?;
                    *s = val;
                }
            }
            toml::Value::Array(arr) => {
                for x in arr {
                    walk(x)?;
                }
            }
            toml::Value::Table(map) => {
                for (_, x) in map.iter_mut() {
                    walk(x)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    walk(&mut v)?;
    Ok(v)
}

fn apply_overrides(cfg: &mut ConsoleConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup(BACKEND_URL_ENV).filter(|v| !v.trim().is_empty()) {
        cfg.backend.base_url = v;
    }
    if let Some(v) = lookup(FILE_SERVICE_URL_ENV).filter(|v| !v.trim().is_empty()) {
        cfg.files.base_url = v;
    }
}

impl ConsoleConfig {
    pub fn validate(&self) -> Result<()> {
        if self.backend.base_url.trim().is_empty() {
            bail!("backend.base_url must not be empty");
        }
        if self.backend.retry_max == 0 {
            bail!("backend.retry_max must be >= 1");
        }
        if self.files.base_url.trim().is_empty() {
            bail!("files.base_url must not be empty");
        }
        if self.session.otp_cooldown_secs == 0 {
            bail!("session.otp_cooldown_secs must be >= 1");
        }
        if self.session.max_age_secs == 0 {
            bail!("session.max_age_secs must be >= 1");
        }
        if let Some(ledger) = &self.ledger {
            if ledger.rpc_url.trim().is_empty() {
                bail!("ledger.rpc_url must not be empty");
            }
            if ledger.contract_address.trim().is_empty() {
                bail!("ledger.contract_address must not be empty");
            }
        }
        Ok(())
    }
}

pub fn parse_config(raw: &str) -> Result<ConsoleConfig> {
    let parsed: toml::Value = toml::from_str(raw).context("failed parsing config toml")?;
    let resolved = resolve_env_refs(parsed)?;
    let mut cfg = resolved
        .try_into::<ConsoleConfig>()
        .map_err(|e| anyhow!("failed to decode config: {e}"))?;
    apply_overrides(&mut cfg, |k| std::env::var(k).ok());
    cfg.validate()?;
    Ok(cfg)
}

pub fn load_config(path: &Path) -> Result<ConsoleConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed reading config file: {}", path.display()))?;
    parse_config(&raw).with_context(|| format!("invalid config {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
[backend]
base_url = "http://localhost:5000/api/users"

[files]
base_url = "http://localhost:5000/api/files"
"#;

    #[test]
    fn defaults_fill_optional_sections() {
        let cfg: ConsoleConfig = toml::from_str(MINIMAL).unwrap();
        assert_eq!(cfg.backend.timeout_ms, 10_000);
        assert_eq!(cfg.backend.retry_max, 3);
        assert_eq!(cfg.session.otp_cooldown_secs, 60);
        assert_eq!(cfg.session.max_age_secs, 28_800);
        assert_eq!(cfg.session.token_path, PathBuf::from(".registrar/token.json"));
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.logging.format, "json");
        assert!(cfg.ledger.is_none());
        cfg.validate().unwrap();
    }

    #[test]
    fn load_config_resolves_env_refs() {
        std::env::set_var("REGISTRAR_TEST_RPC_URL", "https://rpc.sepolia.example");
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            r#"
[backend]
base_url = "http://localhost:5000/api/users"
retry_max = 5

[files]
base_url = "http://localhost:5000/api/files"
fallback_base_url = "https://gateway.example/ipfs"

[session]
otp_cooldown_secs = 30

[ledger]
rpc_url = "env:REGISTRAR_TEST_RPC_URL"
chain_id = 11155111
contract_address = "0x0000000000000000000000000000000000000001"

[logging]
format = "plain"
"#
        )
        .unwrap();

        let cfg = load_config(f.path()).unwrap();
        let ledger = cfg.ledger.unwrap();
        assert_eq!(ledger.rpc_url, "https://rpc.sepolia.example");
        assert_eq!(ledger.chain_id, 11_155_111);
        assert_eq!(ledger.signer_key_env, "REGISTRAR_SIGNER_KEY");
        assert_eq!(cfg.backend.retry_max, 5);
        assert_eq!(cfg.session.otp_cooldown_secs, 30);
        assert_eq!(cfg.logging.format, "plain");
    }

    #[test]
    fn missing_env_ref_is_an_error() {
        let raw = MINIMAL.replace(
            "http://localhost:5000/api/files",
            "env:REGISTRAR_TEST_DEFINITELY_UNSET",
        );
        let err = parse_config(&raw).unwrap_err();
        assert!(format!("{err:#}").contains("REGISTRAR_TEST_DEFINITELY_UNSET"));
    }

    #[test]
    fn explicit_overrides_win_over_file() {
        let mut cfg: ConsoleConfig = toml::from_str(MINIMAL).unwrap();
        apply_overrides(&mut cfg, |k| match k {
            BACKEND_URL_ENV => Some("https://registry.example/api/users".to_string()),
            FILE_SERVICE_URL_ENV => Some("  ".to_string()),
            _ => None,
        });
        assert_eq!(cfg.backend.base_url, "https://registry.example/api/users");
        assert_eq!(cfg.files.base_url, "http://localhost:5000/api/files");
    }

    #[test]
    fn validation_rejects_zero_cooldown() {
        let raw = format!("{MINIMAL}\n[session]\notp_cooldown_secs = 0\n");
        let cfg: ConsoleConfig = toml::from_str(&raw).unwrap();
        assert!(cfg.validate().is_err());
    }
}
