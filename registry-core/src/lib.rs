#![forbid(unsafe_code)]
#![deny(clippy::float_arithmetic)]
#![deny(clippy::float_cmp)]

//! Core types and collaborator contracts for the land-registry registrar console.
//!
//! This crate defines the records owned by the identity directory, the closed role
//! enumerations shared by directory filtering and ledger authorization, and the
//! transport-agnostic traits the console composes:
//! - [`directory::IdentityDirectory`] (REST backend),
//! - [`ledger::RoleOracle`] / [`ledger::RoleGrantExecutor`] (access-control contract),
//! - [`files::FileResolver`] (document storage).

pub mod directory;
pub mod files;
pub mod ledger;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Opaque, backend-assigned user identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Blockchain wallet address, always stored lowercase.
///
/// The backend and the ledger store addresses case-sensitively but treat them as
/// case-insensitive identities, so every value entering the console goes through
/// [`WalletAddress::normalize`] or [`WalletAddress::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WalletAddress(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("wallet address is empty")]
    Empty,
    #[error("wallet address must be 0x followed by 40 hex characters: {0}")]
    Malformed(String),
}

impl WalletAddress {
    /// Strict parse for operator input: `0x` + 40 hex digits, any case.
    pub fn parse(raw: &str) -> Result<Self, AddressError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AddressError::Empty);
        }
        let lower = trimmed.to_ascii_lowercase();
        let hex = lower
            .strip_prefix("0x")
            .ok_or_else(|| AddressError::Malformed(trimmed.to_string()))?;
        if hex.len() != 40 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(AddressError::Malformed(trimmed.to_string()));
        }
        Ok(Self(lower))
    }

    /// Lenient normalization for values read back from collaborators.
    ///
    /// Returns `None` for blank input.
    pub fn normalize(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self(trimmed.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for WalletAddress {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for WalletAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        WalletAddress::normalize(&s).ok_or_else(|| serde::de::Error::custom("empty wallet address"))
    }
}

fn deserialize_optional_wallet<'de, D>(deserializer: D) -> Result<Option<WalletAddress>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(WalletAddress::normalize))
}

/// Bearer token issued by the backend after admin OTP verification.
///
/// `Debug` is redacted so tokens never reach logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(<redacted>)")
    }
}

/// Directory role of a user. Closed set; unknown wire values are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    PublicUser,
    Registrar,
    Admin,
    Surveyor,
    Notary,
    ValuationInstitution,
}

impl Role {
    /// Wire representation used by the backend.
    pub const fn as_wire(self) -> &'static str {
        match self {
            Role::PublicUser => "user",
            Role::Registrar => "registrar",
            Role::Admin => "admin",
            Role::Surveyor => "surveyor",
            Role::Notary => "notary",
            Role::ValuationInstitution => "IVSL",
        }
    }

    pub const fn department(self) -> Option<DepartmentRole> {
        match self {
            Role::Notary => Some(DepartmentRole::Notary),
            Role::Surveyor => Some(DepartmentRole::Surveyor),
            Role::ValuationInstitution => Some(DepartmentRole::Ivsl),
            Role::PublicUser | Role::Registrar | Role::Admin => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" | "public-user" | "public_user" => Ok(Role::PublicUser),
            "registrar" => Ok(Role::Registrar),
            "admin" => Ok(Role::Admin),
            "surveyor" => Ok(Role::Surveyor),
            "notary" => Ok(Role::Notary),
            "ivsl" | "valuation-institution" | "valuation_institution" => {
                Ok(Role::ValuationInstitution)
            }
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

impl Serialize for Role {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_wire())
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Roles that can be registered through department onboarding and granted signer
/// authority on chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "Role", try_from = "Role")]
pub enum DepartmentRole {
    Notary,
    Surveyor,
    Ivsl,
}

impl DepartmentRole {
    pub const ALL: [DepartmentRole; 3] = [
        DepartmentRole::Notary,
        DepartmentRole::Surveyor,
        DepartmentRole::Ivsl,
    ];

    pub const fn role(self) -> Role {
        match self {
            DepartmentRole::Notary => Role::Notary,
            DepartmentRole::Surveyor => Role::Surveyor,
            DepartmentRole::Ivsl => Role::ValuationInstitution,
        }
    }

    /// Mapping table from directory role to ledger role constant.
    pub const fn ledger_role(self) -> LedgerRole {
        match self {
            DepartmentRole::Notary => LedgerRole::Notary,
            DepartmentRole::Surveyor => LedgerRole::Surveyor,
            DepartmentRole::Ivsl => LedgerRole::Ivsl,
        }
    }
}

impl From<DepartmentRole> for Role {
    fn from(value: DepartmentRole) -> Self {
        value.role()
    }
}

impl TryFrom<Role> for DepartmentRole {
    type Error = String;

    fn try_from(value: Role) -> Result<Self, Self::Error> {
        value
            .department()
            .ok_or_else(|| format!("role {value} is not a department role"))
    }
}

impl fmt::Display for DepartmentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.role().as_wire())
    }
}

/// Signer role constants understood by the access-control contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LedgerRole {
    Notary,
    Surveyor,
    Ivsl,
}

impl LedgerRole {
    /// Selector passed to the contract (the on-chain id is derived from it).
    pub const fn selector(self) -> &'static str {
        match self {
            LedgerRole::Notary => "NOTARY",
            LedgerRole::Surveyor => "SURVEYOR",
            LedgerRole::Ivsl => "IVSL",
        }
    }
}

impl fmt::Display for LedgerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.selector())
    }
}

/// KYC status of a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KycStatus {
    #[default]
    Pending,
    Verified,
    Rejected,
}

impl KycStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            KycStatus::Pending => "pending",
            KycStatus::Verified => "verified",
            KycStatus::Rejected => "rejected",
        }
    }

    pub const fn is_terminal(self) -> bool {
        !matches!(self, KycStatus::Pending)
    }

    /// Apply a decision. Only `pending -> verified` and `pending -> rejected` exist.
    pub fn transition(self, outcome: KycOutcome) -> Result<KycStatus, InvalidTransition> {
        match self {
            KycStatus::Pending => Ok(outcome.status()),
            from => Err(InvalidTransition {
                from,
                to: outcome.status(),
            }),
        }
    }
}

impl fmt::Display for KycStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("kyc status cannot move from {from} to {to}")]
pub struct InvalidTransition {
    pub from: KycStatus,
    pub to: KycStatus,
}

/// Registrar decision on a KYC submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KycOutcome {
    Verified,
    Rejected,
}

impl KycOutcome {
    pub const fn status(self) -> KycStatus {
        match self {
            KycOutcome::Verified => KycStatus::Verified,
            KycOutcome::Rejected => KycStatus::Rejected,
        }
    }

    pub const fn as_str(self) -> &'static str {
        self.status().as_str()
    }
}

/// User record as owned by the identity directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id", alias = "id")]
    pub id: UserId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub nic: String,
    #[serde(
        default,
        deserialize_with = "deserialize_optional_wallet",
        skip_serializing_if = "Option::is_none"
    )]
    pub wallet_address: Option<WalletAddress>,
    pub role: Role,
    #[serde(default)]
    pub kyc_status: KycStatus,
    /// Legacy single-document reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kyc_document_hash: Option<String>,
    /// Document kind -> storage key.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub kyc_documents: BTreeMap<String, String>,
    /// RFC 3339 timestamps assigned by the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl User {
    /// All document references of this subject, keyed by document kind.
    ///
    /// The legacy `kycDocumentHash` is exposed under the `document` key unless the
    /// map already carries one.
    pub fn documents(&self) -> BTreeMap<String, String> {
        let mut docs = self.kyc_documents.clone();
        if let Some(hash) = self.kyc_document_hash.as_deref().filter(|h| !h.trim().is_empty()) {
            docs.entry("document".to_string())
                .or_insert_with(|| hash.to_string());
        }
        docs
    }

    pub fn department_role(&self) -> Option<DepartmentRole> {
        self.role.department()
    }
}
