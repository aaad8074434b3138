mod common;

use common::{harness, login, person, wallet};
use registrar_console::onboarding::{RegistrationForm, RoleCounts};
use registrar_console::ConsoleError;
use registry_core::{DepartmentRole, KycStatus, Role};

fn surveyor_form() -> RegistrationForm {
    RegistrationForm {
        name: "Priyanka Jayawardena".to_string(),
        email: "priyanka@survey.gov.lk".to_string(),
        nic: "199245678901".to_string(),
        wallet_address: "0xDEF0000000000000000000000000000000000aBc".to_string(),
        role: DepartmentRole::Surveyor,
    }
}

#[tokio::test]
async fn registration_lowercases_wallet() {
    let h = harness();
    login(&h).await;

    let user = h
        .console
        .onboarding
        .register_department_user(&surveyor_form())
        .await
        .expect("register");
    assert_eq!(
        user.wallet_address.as_ref().map(|w| w.as_str()),
        Some("0xdef0000000000000000000000000000000000abc")
    );
    assert_eq!(user.role, Role::Surveyor);
    assert_eq!(user.kyc_status, KycStatus::Pending);

    let stored = h
        .directory
        .users()
        .into_iter()
        .find(|u| u.id == user.id)
        .expect("stored user");
    assert_eq!(stored.wallet_address, Some(wallet("0xdef0000000000000000000000000000000000abc")));
}

#[tokio::test]
async fn missing_fields_fail_locally() {
    let h = harness();
    login(&h).await;
    let mut form = surveyor_form();
    form.email = "  ".to_string();

    let err = h
        .console
        .onboarding
        .register_department_user(&form)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ConsoleError::Validation("missing required fields: email".to_string())
    );
    assert_eq!(h.directory.calls("register_department_user"), 0);
    assert_eq!(form.name, "Priyanka Jayawardena");
}

#[tokio::test]
async fn duplicate_wallet_is_reported_and_nothing_changes() {
    let h = harness();
    login(&h).await;
    let onboarding = &h.console.onboarding;
    onboarding
        .register_department_user(&surveyor_form())
        .await
        .expect("first");
    let before = h.directory.users().len();

    let mut again = surveyor_form();
    again.name = "Someone Else".to_string();
    again.wallet_address = again.wallet_address.to_lowercase();
    let err = onboarding
        .register_department_user(&again)
        .await
        .unwrap_err();
    assert!(matches!(err, ConsoleError::Validation(ref m) if m.contains("already registered")));
    assert_eq!(h.directory.users().len(), before);
}

#[tokio::test]
async fn registration_requires_admin_session() {
    let h = harness();
    let err = h
        .console
        .onboarding
        .register_department_user(&surveyor_form())
        .await
        .unwrap_err();
    assert!(matches!(err, ConsoleError::Unauthorized(_)));
    assert_eq!(h.directory.calls("register_department_user"), 0);
}

#[tokio::test]
async fn stats_reflect_new_registration_after_refetch() {
    let h = harness();
    h.directory.insert_user(person(
        "n1",
        "Verified Notary",
        Role::Notary,
        KycStatus::Verified,
        Some("0x00000000000000000000000000000000000000a1"),
    ));
    login(&h).await;
    let onboarding = &h.console.onboarding;

    let before = onboarding.department_stats().await.expect("stats");
    assert_eq!(before.get(DepartmentRole::Notary), RoleCounts { verified: 1, pending: 0 });
    assert_eq!(before.get(DepartmentRole::Surveyor), RoleCounts::default());

    let created = onboarding
        .register_department_user(&surveyor_form())
        .await
        .expect("register");

    let after = onboarding.department_stats().await.expect("stats");
    assert_eq!(after.get(DepartmentRole::Surveyor), RoleCounts { verified: 0, pending: 1 });

    let recent = onboarding.recent_registrations().await.expect("recent");
    assert_eq!(recent.first().map(|u| &u.id), Some(&created.id));
    assert!(recent.iter().all(|u| u.role != Role::Admin));

    let overview = onboarding.overview().await.expect("overview");
    assert_eq!(overview.stats, after);
    assert_eq!(overview.recent, recent);
}
