//! Integration tests for account provisioning.
//!
//! Covers the username availability probe as the sign-up form drives it,
//! identity + profile creation, and recovery from orphaned accounts.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use packup_client::ClientError;
use packup_client::providers::IdentityError;
use packup_client::services::availability::Availability;
use packup_client::services::provisioning::ProvisioningError;
use packup_client::testing::ScriptedPrompt;
use packup_core::{DisplayName, Email, Username};
use packup_integration_tests::TestContext;

const USERS_INDEX: &str = "Users";

// =============================================================================
// Username Probe Tests
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_typing_queries_only_the_settled_input() {
    let ctx = TestContext::new();
    let prober = ctx.client.prober();

    for typed in ["a", "ad", "Ada", "Ada_", "Ada_L"] {
        prober.input_changed(typed);
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(ctx.search.queries(), vec!["adal".to_string()]);
    assert_eq!(prober.status(), Availability::Available);
    assert_eq!(prober.current_input(), "adal");
}

#[tokio::test(start_paused = true)]
async fn test_slow_probe_for_old_input_never_lands() {
    let ctx = TestContext::new();
    ctx.search.add_username(USERS_INDEX, "ada");
    ctx.search.set_latency("ada", Duration::from_secs(2));
    let prober = ctx.client.prober();

    prober.input_changed("ada");
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(prober.status(), Availability::Checking);

    prober.input_changed("adam");
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(ctx.search.queries(), vec!["ada".to_string(), "adam".to_string()]);
    assert_eq!(prober.status(), Availability::Available);
}

#[tokio::test(start_paused = true)]
async fn test_short_input_never_reaches_the_index() {
    let ctx = TestContext::new();

    ctx.client.prober().input_changed("a-b");
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(ctx.search.queries().is_empty());
    assert_eq!(ctx.client.prober().status(), Availability::Idle);
}

// =============================================================================
// Provisioning Tests
// =============================================================================

#[tokio::test]
async fn test_signup_then_sign_in_with_the_emailed_link() {
    let ctx = TestContext::new();
    ctx.client.start().unwrap();

    assert_eq!(
        ctx.client.check_username("Ada").await,
        Availability::Available
    );
    let account = ctx
        .client
        .sign_up("ada@example.com", "Ada Lovelace", "Ada")
        .await
        .unwrap();

    let uid = account.identity.uid.clone();
    let stored = ctx.store.document("users", uid.as_str()).unwrap();
    assert_eq!(
        stored.get("username").and_then(|v| v.as_str()),
        Some("ada")
    );
    assert_eq!(
        stored.get("displayName").and_then(|v| v.as_str()),
        Some("Ada Lovelace")
    );

    let link = ctx.identity.last_link_for("ada@example.com").unwrap();
    let outcome = ctx
        .client
        .complete_link(&link, &ScriptedPrompt::declining())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.session.identity_id, uid);

    ctx.session().await;
    let profile = ctx.client.profile().await.unwrap().unwrap();
    assert_eq!(profile.username, "ada");
}

#[tokio::test]
async fn test_taken_username_cannot_be_submitted() {
    let ctx = TestContext::new();
    ctx.search.add_username(USERS_INDEX, "grace");

    assert_eq!(ctx.client.check_username("Grace").await, Availability::Taken);
    let err = ctx
        .client
        .sign_up("grace@example.com", "Grace Hopper", "grace")
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::UsernameUnavailable(_)));
    assert!(err.is_validation());
    assert!(ctx.identity.account("grace@example.com").is_none());
}

#[tokio::test]
async fn test_probe_for_another_name_does_not_count() {
    let ctx = TestContext::new();

    ctx.client.check_username("adal").await;
    let err = ctx
        .client
        .sign_up("ada@example.com", "Ada Lovelace", "ada")
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::UsernameUnavailable(ref name) if name == "ada"));
}

#[tokio::test]
async fn test_invalid_fields_fail_validation() {
    let ctx = TestContext::new();

    let err = ctx
        .client
        .sign_up("ada@example.com", "Al", "ada")
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::InvalidDisplayName(_)));

    let err = ctx
        .client
        .sign_up("ada@example.com", "Ada Lovelace", "a!")
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::InvalidUsername(_)));
    assert_eq!(err.user_message(), "Username must be at least 3 characters");
}

#[tokio::test]
async fn test_existing_email_is_refused() {
    let ctx = TestContext::new();
    ctx.identity.register("ada@example.com");
    ctx.client.check_username("ada").await;

    let err = ctx
        .client
        .sign_up("ada@example.com", "Ada Lovelace", "ada")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ClientError::Provisioning(ProvisioningError::Identity(
            IdentityError::EmailAlreadyInUse
        ))
    ));
    assert_eq!(err.user_message(), "An account with this email already exists");
}

#[tokio::test]
async fn test_orphaned_account_can_be_repaired() {
    let ctx = TestContext::new();
    ctx.store.fail_writes_to("users");
    ctx.client.check_username("ada").await;

    let err = ctx
        .client
        .sign_up("ada@example.com", "Ada Lovelace", "ada")
        .await
        .unwrap_err();

    let ClientError::Provisioning(ProvisioningError::OrphanedAccount { identity_id, .. }) = &err
    else {
        panic!("expected an orphaned account, got {err:?}");
    };
    let identity_id = identity_id.clone();
    assert!(!err.is_reportable());
    assert!(ctx.identity.account("ada@example.com").is_some());
    assert!(ctx.store.document("users", identity_id.as_str()).is_none());
    assert!(ctx.identity.outbox().is_empty());

    ctx.store.clear_write_failures();
    let profile = ctx
        .client
        .provisioner()
        .repair_profile(
            &identity_id,
            &Email::parse("ada@example.com").unwrap(),
            &DisplayName::parse("Ada Lovelace").unwrap(),
            &Username::parse("ada").unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(profile.uid, identity_id);
    assert!(ctx.store.document("users", identity_id.as_str()).is_some());
}

#[tokio::test]
async fn test_resubmitting_signup_finishes_an_orphaned_account() {
    let ctx = TestContext::new();
    ctx.store.fail_writes_to("users");
    ctx.client.check_username("ada").await;

    let err = ctx
        .client
        .sign_up("ada@example.com", "Ada Lovelace", "ada")
        .await
        .unwrap_err();
    assert!(err.user_message().contains("same email"));

    ctx.store.clear_write_failures();
    let account = ctx
        .client
        .sign_up("ada@example.com", "Ada Lovelace", "ada")
        .await
        .unwrap();

    let orphan = ctx.identity.account("ada@example.com").unwrap();
    assert_eq!(account.identity.uid, orphan.uid);
    assert!(ctx.store.document("users", orphan.uid.as_str()).is_some());
    assert_eq!(ctx.identity.outbox().len(), 1);
}

#[tokio::test]
async fn test_link_failure_after_provisioning_keeps_the_account() {
    let ctx = TestContext::new();
    ctx.identity.fail_link_requests(true);
    ctx.client.check_username("ada").await;

    let err = ctx
        .client
        .sign_up("ada@example.com", "Ada Lovelace", "ada")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ClientError::Provisioning(ProvisioningError::LinkDispatch(_))
    ));
    let account = ctx.identity.account("ada@example.com").unwrap();
    assert!(ctx.store.document("users", account.uid.as_str()).is_some());

    ctx.identity.fail_link_requests(false);
    ctx.client.request_link("ada@example.com").await.unwrap();
    assert_eq!(ctx.identity.outbox().len(), 1);
}
