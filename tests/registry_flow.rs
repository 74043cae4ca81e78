//! End-to-end registry flows: credential lifecycle against a pinned clock,
//! and persistence round trips through the file-backed store.

mod helpers;

use dustbox::clock::Clock;
use dustbox::errors::DustboxError;
use dustbox::models::Transport;
use dustbox::registry::Registry;
use dustbox::store::JsonFileStore;
use helpers::{jan1_2024, seed_user_with_device, test_registry, TestClock};
use std::sync::Arc;

#[tokio::test]
async fn login_flow_issue_then_validate() {
    let (clock, registry) = test_registry();
    registry.register_user("tester@example.com").await.unwrap();

    let cred = registry.issue_credential("tester@example.com").await.unwrap();
    let user = registry
        .validate_credential(&cred.access_token, clock.now())
        .await
        .unwrap();
    assert_eq!(user.userid, "tester@example.com");

    // valid right up to, but not at, the expiry instant
    clock.advance_days(29);
    assert!(registry
        .validate_credential(&cred.access_token, clock.now())
        .await
        .is_ok());
    clock.advance_days(1);
    assert!(matches!(
        registry
            .validate_credential(&cred.access_token, clock.now())
            .await,
        Err(DustboxError::Expired(_))
    ));
}

#[tokio::test]
async fn expired_credential_never_yields_a_user() {
    let (clock, registry) = test_registry();
    registry.register_user("tester@example.com").await.unwrap();
    let cred = registry.issue_credential("tester@example.com").await.unwrap();

    for days_past in [0, 1, 365] {
        let now = cred.expire_at + chrono::Duration::days(days_past);
        let result = registry.validate_credential(&cred.access_token, now).await;
        assert!(matches!(result, Err(DustboxError::Expired(_))));
    }
    assert!(matches!(
        registry.validate_credential("never-issued", clock.now()).await,
        Err(DustboxError::NotFound(_))
    ));
}

#[tokio::test]
async fn device_lifecycle_register_toggle_list_remove() {
    let (_, registry) = test_registry();
    seed_user_with_device(&registry, "tester@example.com", "E0001234567890").await;

    registry
        .set_device_transport("E0001234567890", Transport::Mqtt, true)
        .await
        .unwrap();
    let devices = registry.user_devices("tester@example.com").await.unwrap();
    assert_eq!(devices.len(), 1);
    assert!(devices[0].mqtt_connection);
    assert!(!devices[0].xmpp_connection);

    // unknown device id is a NotFound, flags untouched elsewhere
    assert!(matches!(
        registry
            .set_device_transport("ghost", Transport::Mqtt, true)
            .await,
        Err(DustboxError::NotFound(_))
    ));

    registry.remove_device("E0001234567890").await.unwrap();
    assert!(registry
        .user_devices("tester@example.com")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn unlink_of_never_linked_device_is_a_noop() {
    let (_, registry) = test_registry();
    registry.register_user("tester@example.com").await.unwrap();
    let user = registry
        .unlink_device("tester@example.com", "never-linked")
        .await
        .unwrap();
    assert!(user.devices.is_empty());
}

#[tokio::test]
async fn full_state_survives_restart_via_file_store() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("dustbox.json");
    let clock = Arc::new(TestClock::at(jan1_2024()));

    let cred = {
        let store = Arc::new(JsonFileStore::open(&path).await.unwrap());
        let registry = Registry::new(clock.clone(), store, 30);
        seed_user_with_device(&registry, "tester@example.com", "E0001234567890").await;
        registry
            .register_client("tester@example.com", "ecouser.net", "app-resource-1")
            .await
            .unwrap();
        registry
            .set_device_transport("E0001234567890", Transport::Xmpp, true)
            .await
            .unwrap();
        registry.issue_credential("tester@example.com").await.unwrap()
    };

    // fresh process: reopen the file, hydrate, everything is still there
    let store = Arc::new(JsonFileStore::open(&path).await.unwrap());
    let registry = Registry::new(clock.clone(), store, 30);
    registry.hydrate().await.unwrap();

    let user = registry
        .validate_credential(&cred.access_token, clock.now())
        .await
        .unwrap();
    assert_eq!(user.userid, "tester@example.com");
    assert_eq!(user.devices, vec!["E0001234567890"]);
    assert_eq!(user.bots, vec!["app-resource-1"]);

    let device = registry.get_device("E0001234567890").await.unwrap();
    assert!(device.xmpp_connection);
    assert!(!device.mqtt_connection);

    // revocation also survives a restart
    registry.revoke_credential(&cred.access_token).await.unwrap();
    let registry2 = {
        let store = Arc::new(JsonFileStore::open(&path).await.unwrap());
        let r = Registry::new(clock.clone(), store, 30);
        r.hydrate().await.unwrap();
        r
    };
    assert!(matches!(
        registry2
            .validate_credential(&cred.access_token, clock.now())
            .await,
        Err(DustboxError::Revoked(_))
    ));
}

#[tokio::test]
async fn prune_job_policy_removes_expired_grants_from_store() {
    let (clock, registry) = test_registry();
    registry.register_user("tester@example.com").await.unwrap();
    let first = registry.issue_credential("tester@example.com").await.unwrap();
    let second = registry.issue_credential("tester@example.com").await.unwrap();

    clock.advance_days(31);
    let removed = registry
        .prune_expired_credentials(clock.now())
        .await
        .unwrap();
    assert_eq!(removed, 2);

    // pruned grants now read as never-issued
    for token in [&first.access_token, &second.access_token] {
        assert!(matches!(
            registry.validate_credential(token, clock.now()).await,
            Err(DustboxError::NotFound(_))
        ));
    }
}

#[tokio::test]
async fn concurrent_logins_are_serialized_per_user() {
    let (clock, registry) = test_registry();
    registry.register_user("tester@example.com").await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move {
            registry.issue_credential("tester@example.com").await
        }));
    }
    let mut tokens = Vec::new();
    for handle in handles {
        let cred = handle.await.unwrap().unwrap();
        tokens.push((cred.access_token, cred.refresh_token));
    }
    // no token value is ever handed out twice
    let mut access: Vec<_> = tokens.iter().map(|(a, _)| a.clone()).collect();
    access.sort();
    access.dedup();
    assert_eq!(access.len(), 8);

    // all eight grants are concurrently valid
    for (token, _) in &tokens {
        assert!(registry.validate_credential(token, clock.now()).await.is_ok());
    }
}
