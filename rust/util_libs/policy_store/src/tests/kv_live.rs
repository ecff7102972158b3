use crate::kv::{KvPolicyStore, KvWriteError};
use mock_utils::fixtures::{binding, policy, statement};
use mock_utils::test_nats_server::{check_nats_server, TestNatsServer};
use policy_engine::store::{PolicyStore, StoreError};
use serial_test::serial;
use std::time::Duration;

async fn store_on(server: &TestNatsServer, cache_ttl: Duration) -> KvPolicyStore {
    let bucket = server
        .create_policy_bucket("policies_under_test")
        .await
        .expect("create bucket");
    KvPolicyStore::new(bucket, cache_ttl)
}

#[tokio::test]
#[serial]
async fn reads_through_and_caches() -> anyhow::Result<()> {
    if !check_nats_server() {
        log::debug!("Skipping test: nats-server not available");
        return Ok(());
    }
    let server = TestNatsServer::new().await?;
    let store = store_on(&server, Duration::from_secs(30)).await;

    let inbox = policy(
        "APP",
        "per-user-inbox",
        vec![statement(&["nats.pub"], &["nats:user.{{ user.id }}.>"])],
    );
    store.create_policy(&inbox).await?;
    store
        .create_binding(&binding("APP", "user", &["per-user-inbox"]))
        .await?;

    let fetched = store.get_policy("APP", "per-user-inbox").await?;
    assert_eq!(fetched, inbox);
    let fetched = store.get_binding("APP", "user").await?;
    assert_eq!(fetched.policies, vec!["per-user-inbox".to_string()]);

    assert!(matches!(
        store.get_policy("APP", "missing").await,
        Err(StoreError::PolicyNotFound { .. })
    ));

    store.shutdown().await;
    let _ = server.shutdown().await;
    Ok(())
}

#[tokio::test]
#[serial]
async fn watcher_invalidates_updated_policies() -> anyhow::Result<()> {
    if !check_nats_server() {
        log::debug!("Skipping test: nats-server not available");
        return Ok(());
    }
    let server = TestNatsServer::new().await?;
    // A deliberately long TTL so only watcher invalidation can explain a
    // fresh read below.
    let store = store_on(&server, Duration::from_secs(120)).await;

    let v1 = policy("APP", "subjects", vec![statement(&["nats.pub"], &["nats:a"])]);
    let revision = store.create_policy(&v1).await?;
    // Warm the cache.
    assert_eq!(store.get_policy("APP", "subjects").await?, v1);

    let v2 = policy("APP", "subjects", vec![statement(&["nats.pub"], &["nats:b"])]);
    store.update_policy(&v2, revision).await?;

    // The watcher observes the put and drops the entry; poll briefly.
    let mut fresh = None;
    for _ in 0..50 {
        let current = store.get_policy("APP", "subjects").await?;
        if current == v2 {
            fresh = Some(current);
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(fresh, Some(v2));

    store.shutdown().await;
    let _ = server.shutdown().await;
    Ok(())
}

#[tokio::test]
#[serial]
async fn creates_are_exclusive_and_updates_compare_and_set() -> anyhow::Result<()> {
    if !check_nats_server() {
        log::debug!("Skipping test: nats-server not available");
        return Ok(());
    }
    let server = TestNatsServer::new().await?;
    let store = store_on(&server, Duration::from_secs(30)).await;

    let p = policy("APP", "p", vec![statement(&["nats.pub"], &["nats:a"])]);
    let revision = store.create_policy(&p).await?;
    assert!(matches!(
        store.create_policy(&p).await,
        Err(KvWriteError::AlreadyExists { .. })
    ));

    assert!(matches!(
        store.update_policy(&p, revision + 7).await,
        Err(KvWriteError::RevisionMismatch { .. })
    ));
    assert!(store.update_policy(&p, revision).await.is_ok());

    assert!(matches!(
        store
            .create_binding(&binding("*", "admin", &["p"]))
            .await,
        Err(KvWriteError::GlobalBinding)
    ));

    store.shutdown().await;
    let _ = server.shutdown().await;
    Ok(())
}

#[tokio::test]
#[serial]
async fn deletes_remove_records() -> anyhow::Result<()> {
    if !check_nats_server() {
        log::debug!("Skipping test: nats-server not available");
        return Ok(());
    }
    let server = TestNatsServer::new().await?;
    let store = store_on(&server, Duration::from_millis(50)).await;

    let p = policy("APP", "p", vec![statement(&["nats.pub"], &["nats:a"])]);
    store.create_policy(&p).await?;
    assert!(store.get_policy("APP", "p").await.is_ok());

    store.delete_policy("APP", "p").await?;
    // Past the short TTL even a stale cache cannot mask the delete.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(matches!(
        store.get_policy("APP", "p").await,
        Err(StoreError::PolicyNotFound { .. })
    ));

    store.shutdown().await;
    let _ = server.shutdown().await;
    Ok(())
}
