//! KYC review: list, filter and adjudicate submissions with at most one decision in
//! flight per subject.
#![forbid(unsafe_code)]

use crate::error::ConsoleError;
use crate::inflight::{Busy, InFlight, SubjectState};
use crate::metrics;
use crate::session::SessionContext;
use futures::future::join_all;
use registry_core::directory::{IdentityDirectory, VerifyKycRequest};
use registry_core::files::FileResolver;
use registry_core::{KycOutcome, KycStatus, User, UserId};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum StatusFilter {
    All,
    #[default]
    Pending,
    Verified,
    Rejected,
}

impl StatusFilter {
    pub fn matches(self, status: KycStatus) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Pending => status == KycStatus::Pending,
            StatusFilter::Verified => status == KycStatus::Verified,
            StatusFilter::Rejected => status == KycStatus::Rejected,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionFilter {
    pub query: String,
    pub status: StatusFilter,
}

impl SubmissionFilter {
    pub fn new(query: impl Into<String>, status: StatusFilter) -> Self {
        Self {
            query: query.into(),
            status,
        }
    }
}

/// Order-preserving subsequence of `submissions` matching both predicates.
///
/// The query is a case-insensitive substring match against name, email and wallet,
/// taken as typed (whitespace is not trimmed).
pub fn filter_submissions(submissions: &[User], filter: &SubmissionFilter) -> Vec<User> {
    let needle = filter.query.to_lowercase();
    submissions
        .iter()
        .filter(|u| filter.status.matches(u.kyc_status))
        .filter(|u| {
            needle.is_empty()
                || u.name.to_lowercase().contains(&needle)
                || u.email.to_lowercase().contains(&needle)
                || u
                    .wallet_address
                    .as_ref()
                    .is_some_and(|w| w.as_str().contains(&needle))
        })
        .cloned()
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ReviewView {
    #[default]
    Unloaded,
    /// `last_error` is set when a later refresh failed; the list is the last good one.
    Ready {
        submissions: Vec<User>,
        last_error: Option<String>,
    },
    /// The initial load failed.
    Failed { error: String },
}

impl ReviewView {
    pub fn submissions(&self) -> &[User] {
        match self {
            ReviewView::Ready { submissions, .. } => submissions,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionReceipt {
    pub user: User,
    pub message: Option<String>,
    /// `false` when the follow-up refresh failed; the view then carries the
    /// backend's returned record for this subject instead.
    pub refreshed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDocument {
    pub reference: String,
    pub url: String,
    /// `true` when resolution failed and `url` is a best-effort guess.
    pub fallback: bool,
}

pub struct KycReviewEngine {
    directory: Arc<dyn IdentityDirectory>,
    files: Arc<dyn FileResolver>,
    session: SessionContext,
    view: Mutex<ReviewView>,
    load_seq: AtomicU64,
    inflight: InFlight<UserId>,
}

impl std::fmt::Debug for KycReviewEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KycReviewEngine")
            .field("view", &*self.lock_view())
            .finish_non_exhaustive()
    }
}

impl KycReviewEngine {
    pub fn new(
        directory: Arc<dyn IdentityDirectory>,
        files: Arc<dyn FileResolver>,
        session: SessionContext,
    ) -> Self {
        Self {
            directory,
            files,
            session,
            view: Mutex::new(ReviewView::Unloaded),
            load_seq: AtomicU64::new(0),
            inflight: InFlight::new(),
        }
    }

    fn lock_view(&self) -> MutexGuard<'_, ReviewView> {
        self.view.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn view(&self) -> ReviewView {
        self.lock_view().clone()
    }

    pub fn filtered(&self, filter: &SubmissionFilter) -> Vec<User> {
        filter_submissions(self.lock_view().submissions(), filter)
    }

    pub fn subject_state(&self, id: &UserId) -> SubjectState {
        self.inflight.state(id)
    }

    /// Fetch the submissions needing attention.
    ///
    /// A failed refresh keeps the previously loaded list; only a failed initial load
    /// moves the view to `Failed`. Results of a load overtaken by a newer one are
    /// returned but not applied.
    pub async fn list_submissions(&self) -> Result<Vec<User>, ConsoleError> {
        let session = self.session.require_admin()?;
        let seq = self.load_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let result = self.directory.pending_kyc(&session.token).await;

        let mut view = self.lock_view();
        let latest = self.load_seq.load(Ordering::SeqCst) == seq;
        match result {
            Ok(submissions) => {
                if latest {
                    warn_on_regressions(view.submissions(), &submissions);
                    debug!(count = submissions.len(), "kyc submissions loaded");
                    *view = ReviewView::Ready {
                        submissions: submissions.clone(),
                        last_error: None,
                    };
                }
                Ok(submissions)
            }
            Err(e) => {
                let err = ConsoleError::from(e);
                metrics::DIRECTORY_LOAD_FAILURES_TOTAL
                    .with_label_values(&["kyc"])
                    .inc();
                warn!(error = %err, "kyc submission load failed");
                if latest {
                    match &mut *view {
                        ReviewView::Ready { last_error, .. } => {
                            *last_error = Some(err.to_string());
                        }
                        other => {
                            *other = ReviewView::Failed {
                                error: err.to_string(),
                            }
                        }
                    }
                }
                Err(err)
            }
        }
    }

    /// Submit a verify/reject decision for a pending subject.
    ///
    /// `reason` is required for rejections and ignored for verifications. A second
    /// call for the same subject while the first is outstanding is refused without
    /// a backend request.
    pub async fn decide(
        &self,
        id: &UserId,
        outcome: KycOutcome,
        reason: Option<&str>,
    ) -> Result<DecisionReceipt, ConsoleError> {
        let reason = match outcome {
            KycOutcome::Verified => None,
            KycOutcome::Rejected => {
                let reason = reason.map(str::trim).unwrap_or_default();
                if reason.is_empty() {
                    return Err(ConsoleError::Validation(
                        "a rejection reason is required".to_string(),
                    ));
                }
                Some(reason.to_string())
            }
        };

        let current = self
            .lock_view()
            .submissions()
            .iter()
            .find(|u| &u.id == id)
            .map(|u| u.kyc_status)
            .ok_or_else(|| ConsoleError::UnknownSubject(id.to_string()))?;
        current.transition(outcome)?;

        let session = self.session.require_admin()?;
        let guard = self.inflight.begin(id.clone()).map_err(|busy| match busy {
            Busy::Processing => ConsoleError::AlreadyProcessing(id.to_string()),
            Busy::Done => ConsoleError::InvalidState(format!("{id} was already decided")),
        })?;

        let request = VerifyKycRequest {
            status: outcome,
            reason,
        };
        let resp = match self
            .directory
            .verify_kyc(&session.token, id, &request)
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                metrics::KYC_DECISIONS_TOTAL
                    .with_label_values(&[outcome.as_str(), "error"])
                    .inc();
                let err = ConsoleError::from(e);
                warn!(subject = %id, outcome = outcome.as_str(), error = %err, "kyc decision failed");
                return Err(err);
            }
        };
        metrics::KYC_DECISIONS_TOTAL
            .with_label_values(&[outcome.as_str(), "ok"])
            .inc();
        info!(subject = %id, outcome = outcome.as_str(), "kyc decision recorded");
        if resp.user.kyc_status != outcome.status() {
            warn!(
                subject = %id,
                returned = %resp.user.kyc_status,
                "backend returned unexpected status after decision"
            );
        }

        let refreshed = match self.list_submissions().await {
            Ok(_) => true,
            Err(_) => {
                self.apply_decided(&resp.user);
                false
            }
        };
        guard.complete();

        Ok(DecisionReceipt {
            user: resp.user,
            message: resp.message,
            refreshed,
        })
    }

    fn apply_decided(&self, user: &User) {
        let mut view = self.lock_view();
        if let ReviewView::Ready { submissions, .. } = &mut *view {
            if let Some(slot) = submissions.iter_mut().find(|u| u.id == user.id) {
                *slot = user.clone();
            }
        }
    }

    /// Resolve every document reference to a fetchable URL, concurrently.
    ///
    /// Failures degrade to the resolver's fallback URL.
    pub async fn resolve_document_urls(
        &self,
        documents: &BTreeMap<String, String>,
    ) -> BTreeMap<String, ResolvedDocument> {
        let lookups = documents.iter().map(|(kind, reference)| async move {
            let resolved = match self.files.resolve(reference).await {
                Ok(url) => ResolvedDocument {
                    reference: reference.clone(),
                    url,
                    fallback: false,
                },
                Err(e) => {
                    warn!(kind = %kind, error = %e, "document resolution failed; using fallback");
                    ResolvedDocument {
                        reference: reference.clone(),
                        url: self.files.fallback_url(reference),
                        fallback: true,
                    }
                }
            };
            (kind.clone(), resolved)
        });
        join_all(lookups).await.into_iter().collect()
    }

    pub async fn resolve_subject_documents(
        &self,
        user: &User,
    ) -> BTreeMap<String, ResolvedDocument> {
        self.resolve_document_urls(&user.documents()).await
    }
}

/// Terminal statuses never change. Report any backend record that does.
fn warn_on_regressions(previous: &[User], next: &[User]) {
    for old in previous.iter().filter(|u| u.kyc_status.is_terminal()) {
        if let Some(new) = next.iter().find(|u| u.id == old.id) {
            if new.kyc_status != old.kyc_status {
                warn!(
                    subject = %old.id,
                    from = %old.kyc_status,
                    to = %new.kyc_status,
                    "terminal kyc status changed on backend"
                );
            }
        }
    }
}
