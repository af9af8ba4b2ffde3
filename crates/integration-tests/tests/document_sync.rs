//! Integration tests for the document cache as the views use it.
//!
//! Covers shared fetches, list invalidation after writes, optimistic
//! updates, realtime pushes and clearing on sign-out.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use packup_client::services::cache::{DocumentKey, EntryStatus};
use packup_client::services::session::RouteGuard;
use packup_client::{ClientError, Route};
use packup_core::DocumentId;
use packup_integration_tests::TestContext;
use serde_json::{Map, Value, json};

fn trip(name: &str, start: &str, member: &str) -> Value {
    json!({
        "owner": member,
        "name": name,
        "startDate": start,
        "endDate": "2030-01-01T00:00:00Z",
        "archived": false,
        "tripMembers": {
            member: {"uid": member, "status": "Owner", "invitedAt": "2025-01-01T00:00:00Z"}
        }
    })
}

fn fields(value: Value) -> Map<String, Value> {
    let Value::Object(map) = value else {
        panic!("expected an object");
    };
    map
}

#[tokio::test(start_paused = true)]
async fn test_views_opening_together_share_one_fetch() {
    let ctx = TestContext::new();
    ctx.store.insert("trips", "t1", trip("Coast", "2025-06-01T00:00:00Z", "u1"));
    ctx.store.set_latency(Duration::from_millis(200));
    let cache = ctx.client.cache();
    let id = DocumentId::new("t1");

    let (a, b, c) = tokio::join!(
        cache.read_one("trips", &id),
        cache.read_one("trips", &id),
        cache.read_one("trips", &id),
    );

    assert_eq!(ctx.store.get_calls(), 1);
    assert_eq!(a.unwrap(), b.unwrap());
    assert!(c.unwrap().is_some());
}

#[tokio::test]
async fn test_trip_list_refreshes_after_a_new_trip() {
    let ctx = TestContext::new();
    ctx.client.start().unwrap();
    let session = ctx.sign_in("ada@example.com").await;
    let uid = session.identity_id.as_str();
    ctx.store.insert("trips", "t1", trip("Coast", "2025-06-01T00:00:00Z", uid));

    assert_eq!(ctx.client.trips().await.unwrap().len(), 1);
    assert_eq!(ctx.client.trips().await.unwrap().len(), 1);
    assert_eq!(ctx.store.list_calls(), 1);

    ctx.client
        .cache()
        .create(
            "trips",
            &DocumentId::new("t2"),
            &fields(trip("Alps", "2025-09-01T00:00:00Z", uid)),
        )
        .await
        .unwrap();

    let trips = ctx.client.trips().await.unwrap();
    assert_eq!(ctx.store.list_calls(), 2);
    let names: Vec<&str> = trips.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["Alps", "Coast"]);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_rename_shows_then_rolls_back() {
    let ctx = TestContext::new();
    ctx.store.insert("trips", "t1", trip("Coast", "2025-06-01T00:00:00Z", "u1"));
    let cache = ctx.client.cache().clone();
    let id = DocumentId::new("t1");
    let key = DocumentKey::new("trips", id.clone());
    cache.read_one("trips", &id).await.unwrap();

    ctx.store.set_latency(Duration::from_millis(100));
    ctx.store.fail_patches(true);
    let update = tokio::spawn({
        let cache = cache.clone();
        let id = id.clone();
        async move {
            cache
                .update("trips", &id, &fields(json!({"name": "Coastal walk"})))
                .await
        }
    });

    tokio::time::sleep(Duration::from_millis(10)).await;
    let during = cache.snapshot(&key).unwrap().value.flatten().unwrap();
    assert_eq!(during.get("name"), Some(&json!("Coastal walk")));

    assert!(update.await.unwrap().is_err());
    let after = cache.snapshot(&key).unwrap().value.flatten().unwrap();
    assert_eq!(after.get("name"), Some(&json!("Coast")));
    assert_eq!(
        ctx.store.document("trips", "t1").unwrap().get("name"),
        Some(&json!("Coast"))
    );
}

#[tokio::test(start_paused = true)]
async fn test_realtime_push_reaches_every_view() {
    let ctx = TestContext::new();
    ctx.store.insert("trips", "t1", trip("Coast", "2025-06-01T00:00:00Z", "u1"));
    let cache = ctx.client.cache();
    let id = DocumentId::new("t1");

    let mut list_view = cache.subscribe_realtime("trips", &id);
    let mut detail_view = cache.subscribe_realtime("trips", &id);
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(ctx.store.open_channels("trips", "t1"), 1);

    ctx.store.push(
        "trips",
        "t1",
        Some(trip("Coast (moved)", "2025-06-02T00:00:00Z", "u1")),
    );
    tokio::time::sleep(Duration::from_millis(1)).await;

    for view in [&mut list_view, &mut detail_view] {
        let snapshot = view.snapshot();
        assert_eq!(snapshot.status, EntryStatus::Fresh);
        let document = snapshot.value.flatten().unwrap();
        assert_eq!(document.get("name"), Some(&json!("Coast (moved)")));
    }

    list_view.release();
    detail_view.release();
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(ctx.store.open_channels("trips", "t1"), 0);
}

#[tokio::test]
async fn test_sign_out_drops_cached_documents() {
    let ctx = TestContext::new();
    ctx.client.start().unwrap();
    let session = ctx.sign_in("ada@example.com").await;
    ctx.store.insert(
        "trips",
        "t1",
        trip("Coast", "2025-06-01T00:00:00Z", session.identity_id.as_str()),
    );
    ctx.client.trips().await.unwrap();
    assert!(!ctx.client.cache().is_empty());
    let mut guard = RouteGuard::enter(ctx.client.session()).await.unwrap();

    ctx.client.sign_out().await.unwrap();

    assert!(ctx.client.cache().is_empty());
    assert_eq!(guard.revoked().await, Route::Home);
    assert!(matches!(
        ctx.client.trips().await,
        Err(ClientError::NotSignedIn)
    ));
}
