mod common;

use common::{harness_with, login, person, Harness};
use registrar_console::inflight::SubjectState;
use registrar_console::kyc_review::{ReviewView, StatusFilter, SubmissionFilter};
use registrar_console::ConsoleError;
use registry_core::directory::mock_client::MockDirectory;
use registry_core::directory::DirectoryError;
use registry_core::{KycOutcome, KycStatus, Role, UserId};
use std::sync::Arc;

fn seeded() -> Harness {
    let dir = MockDirectory::with_users(vec![
        person(
            "s1",
            "Nimal Perera",
            Role::PublicUser,
            KycStatus::Pending,
            Some("0x00000000000000000000000000000000000000a1"),
        ),
        person(
            "s2",
            "Kamala Silva",
            Role::PublicUser,
            KycStatus::Pending,
            Some("0x00000000000000000000000000000000000000b2"),
        ),
        person("s3", "Ruwan Dias", Role::PublicUser, KycStatus::Verified, None),
    ]);
    harness_with(Arc::new(dir))
}

fn id(s: &str) -> UserId {
    UserId::new(s)
}

#[tokio::test]
async fn rejection_moves_subject_out_of_pending_view() {
    let h = seeded();
    login(&h).await;
    let kyc = &h.console.kyc;
    kyc.list_submissions().await.expect("list");

    let pending = SubmissionFilter::new("", StatusFilter::Pending);
    let rejected = SubmissionFilter::new("", StatusFilter::Rejected);
    assert_eq!(kyc.filtered(&pending).len(), 2);

    let receipt = kyc
        .decide(&id("s1"), KycOutcome::Rejected, Some("NIC mismatch"))
        .await
        .expect("reject");
    assert_eq!(receipt.user.kyc_status, KycStatus::Rejected);
    assert!(receipt.refreshed);

    let requests = h.directory.verify_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].0, id("s1"));
    assert_eq!(requests[0].1.status, KycOutcome::Rejected);
    assert_eq!(requests[0].1.reason.as_deref(), Some("NIC mismatch"));

    let still_pending: Vec<_> = kyc.filtered(&pending).into_iter().map(|u| u.id).collect();
    assert_eq!(still_pending, vec![id("s2")]);
    let now_rejected: Vec<_> = kyc.filtered(&rejected).into_iter().map(|u| u.id).collect();
    assert_eq!(now_rejected, vec![id("s1")]);
    let s1 = id("s1");
    assert_eq!(kyc.subject_state(&s1), SubjectState::Done);
}

#[tokio::test]
async fn rejection_without_reason_is_local_error() {
    let h = seeded();
    login(&h).await;
    let kyc = &h.console.kyc;
    kyc.list_submissions().await.expect("list");

    for reason in [None, Some(""), Some("   ")] {
        let err = kyc
            .decide(&id("s1"), KycOutcome::Rejected, reason)
            .await
            .unwrap_err();
        assert!(matches!(err, ConsoleError::Validation(_)), "{reason:?}");
    }
    assert_eq!(h.directory.calls("verify_kyc"), 0);

    kyc.decide(&id("s1"), KycOutcome::Rejected, Some("Document illegible"))
        .await
        .expect("reject with reason");
    assert_eq!(h.directory.calls("verify_kyc"), 1);
}

#[tokio::test]
async fn verification_ignores_reason() {
    let h = seeded();
    login(&h).await;
    let kyc = &h.console.kyc;
    kyc.list_submissions().await.expect("list");

    kyc.decide(&id("s2"), KycOutcome::Verified, Some("looks fine"))
        .await
        .expect("verify");
    let requests = h.directory.verify_requests();
    assert_eq!(requests[0].1.reason, None);
    assert_eq!(
        h.directory.user(&id("s2")).expect("s2").kyc_status,
        KycStatus::Verified
    );
}

#[tokio::test]
async fn rapid_double_decide_issues_one_request() {
    let h = seeded();
    login(&h).await;
    let kyc = &h.console.kyc;
    kyc.list_submissions().await.expect("list");

    let s1 = id("s1");
    let release = h.directory.hold_verify_kyc();
    let (first, second, ()) = tokio::join!(
        kyc.decide(&s1, KycOutcome::Verified, None),
        kyc.decide(&s1, KycOutcome::Verified, None),
        async {
            tokio::task::yield_now().await;
            release.notify_one();
        }
    );

    first.expect("first decision");
    assert!(matches!(second, Err(ConsoleError::AlreadyProcessing(_))));
    assert_eq!(h.directory.calls("verify_kyc"), 1);
    assert_eq!(kyc.subject_state(&s1), SubjectState::Done);
}

#[tokio::test]
async fn decided_subjects_never_transition_again() {
    let h = seeded();
    login(&h).await;
    let kyc = &h.console.kyc;
    kyc.list_submissions().await.expect("list");

    let err = kyc
        .decide(&id("s3"), KycOutcome::Rejected, Some("changed my mind"))
        .await
        .unwrap_err();
    assert!(matches!(err, ConsoleError::InvalidTransition(_)));

    kyc.decide(&id("s1"), KycOutcome::Verified, None)
        .await
        .expect("verify");
    let err = kyc
        .decide(&id("s1"), KycOutcome::Rejected, Some("late"))
        .await
        .unwrap_err();
    assert!(matches!(err, ConsoleError::InvalidTransition(_)));
    assert_eq!(h.directory.calls("verify_kyc"), 1);
}

#[tokio::test]
async fn backend_failure_returns_subject_to_idle() {
    let h = seeded();
    login(&h).await;
    let kyc = &h.console.kyc;
    kyc.list_submissions().await.expect("list");

    h.directory.fail_next(
        "verify_kyc",
        DirectoryError::HttpStatus {
            status: 502,
            message: None,
        },
    );
    let err = kyc
        .decide(&id("s1"), KycOutcome::Verified, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ConsoleError::Transport(_)));
    assert_eq!(kyc.subject_state(&id("s1")), SubjectState::Idle);
    assert_eq!(
        h.directory.user(&id("s1")).expect("s1").kyc_status,
        KycStatus::Pending
    );

    kyc.decide(&id("s1"), KycOutcome::Verified, None)
        .await
        .expect("registrar retry");
    assert_eq!(h.directory.calls("verify_kyc"), 2);
}

#[tokio::test]
async fn unknown_subject_is_refused() {
    let h = seeded();
    login(&h).await;
    let err = h
        .console
        .kyc
        .decide(&id("s1"), KycOutcome::Verified, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ConsoleError::UnknownSubject(_)));
    assert_eq!(h.directory.calls("verify_kyc"), 0);
}

#[tokio::test]
async fn failed_refresh_keeps_previous_list() {
    let h = seeded();
    login(&h).await;
    let kyc = &h.console.kyc;
    let first = kyc.list_submissions().await.expect("list");

    h.directory.fail_next(
        "pending_kyc",
        DirectoryError::Network("connection reset".to_string()),
    );
    assert!(kyc.list_submissions().await.is_err());
    match kyc.view() {
        ReviewView::Ready {
            submissions,
            last_error,
        } => {
            assert_eq!(submissions, first);
            assert!(last_error.is_some());
        }
        other => panic!("unexpected view {other:?}"),
    }

    kyc.list_submissions().await.expect("recovered");
    assert!(matches!(
        kyc.view(),
        ReviewView::Ready {
            last_error: None,
            ..
        }
    ));
}

#[tokio::test]
async fn failed_initial_load_shows_error_state() {
    let h = seeded();
    login(&h).await;
    h.directory.fail_next(
        "pending_kyc",
        DirectoryError::Network("connection refused".to_string()),
    );
    assert!(h.console.kyc.list_submissions().await.is_err());
    assert!(matches!(h.console.kyc.view(), ReviewView::Failed { .. }));
    assert!(h.console.kyc.view().submissions().is_empty());
}

#[tokio::test]
async fn failed_refresh_after_decision_still_applies_result() {
    let h = seeded();
    login(&h).await;
    let kyc = &h.console.kyc;
    kyc.list_submissions().await.expect("list");

    h.directory.fail_next(
        "pending_kyc",
        DirectoryError::Network("connection reset".to_string()),
    );
    let receipt = kyc
        .decide(&id("s2"), KycOutcome::Verified, None)
        .await
        .expect("decision succeeded");
    assert!(!receipt.refreshed);

    let verified = kyc.filtered(&SubmissionFilter::new("kamala", StatusFilter::Verified));
    assert_eq!(verified.len(), 1);
    assert_eq!(kyc.subject_state(&id("s2")), SubjectState::Done);
}

#[tokio::test]
async fn documents_resolve_with_fallback() {
    let mut subject = person("d1", "Doc Owner", Role::PublicUser, KycStatus::Pending, None);
    subject.kyc_document_hash = Some("legacy.pdf".to_string());
    subject
        .kyc_documents
        .insert("nicFront".to_string(), "nic-front.png".to_string());
    subject.kyc_documents.insert(
        "selfie".to_string(),
        "https://cdn.example/selfie.jpg".to_string(),
    );
    subject
        .kyc_documents
        .insert("utilityBill".to_string(), "missing-bill.pdf".to_string());

    let h = harness_with(Arc::new(MockDirectory::new()));
    let resolved = h.console.kyc.resolve_subject_documents(&subject).await;
    assert_eq!(resolved.len(), 4);

    let nic = &resolved["nicFront"];
    assert_eq!(nic.url, "https://files.test/nic-front.png");
    assert!(!nic.fallback);

    let selfie = &resolved["selfie"];
    assert_eq!(selfie.url, "https://cdn.example/selfie.jpg");
    assert!(!selfie.fallback);

    let bill = &resolved["utilityBill"];
    assert_eq!(bill.url, "https://fallback.test/missing-bill.pdf");
    assert!(bill.fallback);

    assert_eq!(resolved["document"].url, "https://files.test/legacy.pdf");
}
