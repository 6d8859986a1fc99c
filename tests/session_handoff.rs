//! Reconnection, takeover and expiry of logical sessions.

mod common;

use common::{fast_config, layer_over, MockConnection, ProbeMode, ScriptedStore};
use resilient_session::observability::metrics::SessionEvent;
use resilient_session::session::SessionStatus;
use resilient_session::store::{session_key, snapshot_key};
use resilient_session::{Connection, RestoreOutcome, SessionError, StoreError};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_hung_incumbent_is_superseded_after_probe_timeout() {
    let store = ScriptedStore::new();
    let layer = layer_over(store, &fast_config());

    let a = MockConnection::new(ProbeMode::Alive);
    layer.register("p1", a.clone()).await.unwrap();
    a.set_mode(ProbeMode::Hang);

    let b = MockConnection::new(ProbeMode::Alive);
    let started = tokio::time::Instant::now();
    let registration = layer.register("p1", b.clone()).await.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(2));

    assert_eq!(registration.record.connection_id, b.id());
    assert_eq!(registration.record.status, SessionStatus::Active);
    let superseded = registration.superseded.unwrap();
    assert_eq!(superseded.connection_id, a.id());
    assert_eq!(superseded.status, SessionStatus::Disconnected);
    assert!(registration.resumed);
    assert!(a.was_closed());
    assert_eq!(layer.metrics().session_count(SessionEvent::Takeover), 1);
}

#[tokio::test(start_paused = true)]
async fn test_live_incumbent_rejects_newcomer() {
    let layer = layer_over(ScriptedStore::new(), &fast_config());

    let a = MockConnection::new(ProbeMode::Alive);
    layer.register("p1", a.clone()).await.unwrap();

    let b = MockConnection::new(ProbeMode::Alive);
    let err = layer.register("p1", b.clone()).await.unwrap_err();
    assert_eq!(
        err,
        SessionError::AlreadyConnected {
            logical_id: "p1".into()
        }
    );
    assert_eq!(a.probes(), 1);
    assert!(!a.was_closed());

    let record = layer.get_session("p1").await.unwrap();
    assert_eq!(record.connection_id, a.id());
}

#[tokio::test(start_paused = true)]
async fn test_simultaneous_registrations_admit_one() {
    let layer = layer_over(ScriptedStore::new(), &fast_config());

    let b = MockConnection::new(ProbeMode::Alive);
    let c = MockConnection::new(ProbeMode::Alive);
    let (first, second) = tokio::join!(
        layer.register("p1", b.clone()),
        layer.register("p1", c.clone())
    );

    let outcomes = [first.is_ok(), second.is_ok()];
    assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
    let err = first.err().or(second.err()).unwrap();
    assert!(matches!(err, SessionError::AlreadyConnected { .. }));

    let owner = layer.get_session("p1").await.unwrap().connection_id;
    assert!(owner == b.id() || owner == c.id());
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_within_grace_resumes() {
    let layer = layer_over(ScriptedStore::new(), &fast_config());

    let a = MockConnection::new(ProbeMode::Alive);
    layer.register("p1", a.clone()).await.unwrap();
    layer
        .snapshot("p1", "betting", json!({ "chips": 500 }))
        .await
        .unwrap();
    layer.mark_disconnected("p1").await.unwrap();
    a.set_mode(ProbeMode::Dead);

    tokio::time::advance(Duration::from_secs(10)).await;
    assert!(layer.reap().await.is_empty());

    let b = MockConnection::new(ProbeMode::Alive);
    let registration = layer.register("p1", b.clone()).await.unwrap();
    assert!(registration.resumed);
    assert!(registration.superseded.is_none());
    assert_eq!(registration.record.snapshot_version, 1);
    // a Disconnected incumbent is never probed
    assert_eq!(a.probes(), 0);

    let snapshot = layer.restore("p1").await.unwrap().into_snapshot().unwrap();
    assert_eq!(snapshot.version, 1);
    assert_eq!(snapshot.phase, "betting");
    assert_eq!(snapshot.payload, json!({ "chips": 500 }));
}

#[tokio::test(start_paused = true)]
async fn test_reap_after_grace_purges_snapshot() {
    let store = ScriptedStore::new();
    let layer = layer_over(store.clone(), &fast_config());

    let a = MockConnection::new(ProbeMode::Alive);
    layer.register("p1", a).await.unwrap();
    layer.snapshot("p1", "dealing", json!([1, 2, 3])).await.unwrap();
    layer.mark_disconnected("p1").await.unwrap();

    tokio::time::advance(Duration::from_secs(31)).await;
    assert_eq!(layer.reap().await, vec!["p1".to_string()]);

    assert!(layer.get_session("p1").await.is_none());
    assert!(!store.memory().contains(&snapshot_key("p1")));
    assert_eq!(layer.restore("p1").await.unwrap(), RestoreOutcome::NotFound);
    assert_eq!(layer.metrics().session_count(SessionEvent::Expired), 1);

    // a later registration starts over
    let b = MockConnection::new(ProbeMode::Alive);
    let registration = layer.register("p1", b).await.unwrap();
    assert!(!registration.resumed);
    assert_eq!(registration.record.snapshot_version, 0);
}

#[tokio::test(start_paused = true)]
async fn test_active_sessions_are_never_reaped() {
    let layer = layer_over(ScriptedStore::new(), &fast_config());
    layer
        .register("p1", MockConnection::new(ProbeMode::Alive))
        .await
        .unwrap();

    tokio::time::advance(Duration::from_secs(600)).await;
    assert!(layer.reap().await.is_empty());
    assert!(layer.get_session("p1").await.unwrap().is_active());
}

#[tokio::test(start_paused = true)]
async fn test_terminate_closes_and_purges() {
    let store = ScriptedStore::new();
    let layer = layer_over(store.clone(), &fast_config());

    let a = MockConnection::new(ProbeMode::Alive);
    layer.register("p1", a.clone()).await.unwrap();
    layer.snapshot("p1", "showdown", json!({})).await.unwrap();

    let record = layer.terminate("p1").await.unwrap();
    assert_eq!(record.connection_id, a.id());
    assert_eq!(record.status, SessionStatus::Expired);
    assert!(a.was_closed());

    assert!(layer.get_session("p1").await.is_none());
    assert_eq!(layer.restore("p1").await.unwrap(), RestoreOutcome::NotFound);
    assert!(store.memory().is_empty());
    assert!(layer.terminate("p1").await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_stale_close_is_ignored() {
    let layer = layer_over(ScriptedStore::new(), &fast_config());

    let a = MockConnection::new(ProbeMode::Dead);
    layer.register("p1", a.clone()).await.unwrap();
    let b = MockConnection::new(ProbeMode::Alive);
    layer.register("p1", b.clone()).await.unwrap();

    // the superseded socket reports its close late
    assert!(!layer.mark_connection_closed("p1", a.id()).await);
    let record = layer.get_session("p1").await.unwrap();
    assert!(record.is_active());
    assert_eq!(record.connection_id, b.id());

    assert!(layer.mark_connection_closed("p1", b.id()).await);
    assert_eq!(
        layer.get_session("p1").await.unwrap().status,
        SessionStatus::Disconnected
    );
}

#[tokio::test(start_paused = true)]
async fn test_unknown_session_operations() {
    let layer = layer_over(ScriptedStore::new(), &fast_config());

    assert_eq!(
        layer.mark_disconnected("ghost").await.unwrap_err(),
        SessionError::NotRegistered {
            logical_id: "ghost".into()
        }
    );
    assert!(!layer.touch("ghost").await);
    assert!(layer.get_session("ghost").await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_registration_survives_store_outage() {
    let store = ScriptedStore::new();
    let layer = layer_over(store.clone(), &fast_config());
    store.fail_always(StoreError::Connection("refused".into()));

    let a = MockConnection::new(ProbeMode::Alive);
    let registration = layer.register("p1", a).await.unwrap();
    assert!(registration.record.is_active());
    assert!(layer.metrics().session_count(SessionEvent::PersistFailed) >= 1);

    let counts = layer.health().sessions;
    assert_eq!(counts.active, 1);
}

#[tokio::test(start_paused = true)]
async fn test_registration_racing_the_reaper_starts_fresh() {
    let store = ScriptedStore::new();
    let layer = layer_over(store.clone(), &fast_config());

    layer
        .register("p1", MockConnection::new(ProbeMode::Alive))
        .await
        .unwrap();
    layer.snapshot("p1", "river", json!({ "pot": 75 })).await.unwrap();
    layer.mark_disconnected("p1").await.unwrap();
    tokio::time::advance(Duration::from_secs(31)).await;

    // the reaper's deletes are slow; the player comes back mid-reap
    store.set_delay(Some(Duration::from_millis(200)));
    let reaper = {
        let layer = Arc::clone(&layer);
        tokio::spawn(async move { layer.reap().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    store.set_delay(None);

    let b = MockConnection::new(ProbeMode::Alive);
    let registration = layer.register("p1", b.clone()).await.unwrap();
    assert!(!registration.resumed);

    assert_eq!(reaper.await.unwrap(), vec!["p1".to_string()]);

    let record = layer.get_session("p1").await.unwrap();
    assert!(record.is_active());
    assert_eq!(record.connection_id, b.id());
    assert!(store.memory().contains(&session_key("p1")));
    assert!(!store.memory().contains(&snapshot_key("p1")));

    // a checkpoint after the return survives
    assert_eq!(layer.snapshot("p1", "flop", json!({})).await.unwrap(), 1);
    assert!(store.memory().contains(&snapshot_key("p1")));
}
