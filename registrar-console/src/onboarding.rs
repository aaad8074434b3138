#![forbid(unsafe_code)]

use crate::error::ConsoleError;
use crate::metrics;
use crate::session::SessionContext;
use registry_core::directory::{IdentityDirectory, RegisterDepartmentUserRequest};
use registry_core::{DepartmentRole, KycStatus, User, WalletAddress};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Number of entries in the "recent registrations" panel.
pub const RECENT_REGISTRATIONS: usize = 6;

/// Registration input as typed by the registrar. Never cleared by a failed submit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationForm {
    pub name: String,
    pub email: String,
    pub nic: String,
    pub wallet_address: String,
    pub role: DepartmentRole,
}

impl RegistrationForm {
    /// Check required fields and normalize the wallet.
    pub fn validate(&self) -> Result<RegisterDepartmentUserRequest, ConsoleError> {
        let missing: Vec<&str> = [
            ("name", &self.name),
            ("email", &self.email),
            ("nic", &self.nic),
            ("walletAddress", &self.wallet_address),
        ]
        .into_iter()
        .filter(|(_, v)| v.trim().is_empty())
        .map(|(k, _)| k)
        .collect();
        if !missing.is_empty() {
            return Err(ConsoleError::Validation(format!(
                "missing required fields: {}",
                missing.join(", ")
            )));
        }

        let email = self.email.trim();
        match email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {}
            _ => {
                return Err(ConsoleError::Validation(format!(
                    "invalid email address: {email}"
                )))
            }
        }
        let wallet_address = WalletAddress::parse(&self.wallet_address)
            .map_err(|e| ConsoleError::Validation(e.to_string()))?;

        Ok(RegisterDepartmentUserRequest {
            name: self.name.trim().to_string(),
            email: email.to_string(),
            nic: self.nic.trim().to_string(),
            wallet_address,
            role: self.role,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleCounts {
    pub verified: usize,
    pub pending: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepartmentStats {
    pub notary: RoleCounts,
    pub surveyor: RoleCounts,
    pub ivsl: RoleCounts,
}

impl DepartmentStats {
    pub fn get(&self, role: DepartmentRole) -> RoleCounts {
        match role {
            DepartmentRole::Notary => self.notary,
            DepartmentRole::Surveyor => self.surveyor,
            DepartmentRole::Ivsl => self.ivsl,
        }
    }

    fn get_mut(&mut self, role: DepartmentRole) -> &mut RoleCounts {
        match role {
            DepartmentRole::Notary => &mut self.notary,
            DepartmentRole::Surveyor => &mut self.surveyor,
            DepartmentRole::Ivsl => &mut self.ivsl,
        }
    }
}

pub fn compute_department_stats(users: &[User]) -> DepartmentStats {
    let mut stats = DepartmentStats::default();
    for user in users {
        let Some(role) = user.department_role() else {
            continue;
        };
        let counts = stats.get_mut(role);
        match user.kyc_status {
            KycStatus::Verified => counts.verified += 1,
            KycStatus::Pending => counts.pending += 1,
            KycStatus::Rejected => {}
        }
    }
    stats
}

/// Newest department users first. Records without `createdAt` sort last; ties keep
/// input order.
pub fn recent_department_users(users: &[User], limit: usize) -> Vec<User> {
    let mut department: Vec<&User> = users
        .iter()
        .filter(|u| u.department_role().is_some())
        .collect();
    // RFC 3339 UTC timestamps order lexicographically.
    department.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    department.into_iter().take(limit).cloned().collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepartmentOverview {
    pub stats: DepartmentStats,
    pub recent: Vec<User>,
}

pub struct DepartmentOnboarding {
    directory: Arc<dyn IdentityDirectory>,
    session: SessionContext,
}

impl DepartmentOnboarding {
    pub fn new(directory: Arc<dyn IdentityDirectory>, session: SessionContext) -> Self {
        Self { directory, session }
    }

    /// Create a department user. Statistics are not cached here; callers re-fetch
    /// them after a successful registration.
    pub async fn register_department_user(
        &self,
        form: &RegistrationForm,
    ) -> Result<User, ConsoleError> {
        let request = form.validate()?;
        let session = self.session.require_admin()?;
        match self
            .directory
            .register_department_user(&session.token, &request)
            .await
        {
            Ok(user) => {
                info!(
                    user = %user.id,
                    role = %request.role,
                    wallet = %request.wallet_address,
                    "department user registered"
                );
                Ok(user)
            }
            Err(e) => {
                let err = ConsoleError::from(e);
                warn!(role = %request.role, error = %err, "department registration failed");
                Err(err)
            }
        }
    }

    async fn department_users(&self) -> Result<Vec<User>, ConsoleError> {
        let session = self.session.require_admin()?;
        self.directory.list_users(&session.token).await.map_err(|e| {
            metrics::DIRECTORY_LOAD_FAILURES_TOTAL
                .with_label_values(&["onboarding"])
                .inc();
            ConsoleError::from(e)
        })
    }

    pub async fn department_stats(&self) -> Result<DepartmentStats, ConsoleError> {
        Ok(compute_department_stats(&self.department_users().await?))
    }

    pub async fn recent_registrations(&self) -> Result<Vec<User>, ConsoleError> {
        Ok(recent_department_users(
            &self.department_users().await?,
            RECENT_REGISTRATIONS,
        ))
    }

    /// Stats and recent registrations from a single directory read.
    pub async fn overview(&self) -> Result<DepartmentOverview, ConsoleError> {
        let users = self.department_users().await?;
        Ok(DepartmentOverview {
            stats: compute_department_stats(&users),
            recent: recent_department_users(&users, RECENT_REGISTRATIONS),
        })
    }
}
