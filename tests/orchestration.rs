mod common;

use chrono::Duration as ChronoDuration;
use common::{epoch, manual_clock, price, FlakyStore, ScriptedAdapter};
use price_tracker::config::TrackingConfig;
use price_tracker::error::{Error, SourceError};
use price_tracker::interfaces::{ManualClock, PersistenceStore};
use price_tracker::price_infra::{CredentialState, SourceAdapter, SourceRegistry};
use price_tracker::storage::MemoryStore;
use price_tracker::tracking::{PriceTracker, RetentionPolicy};
use price_tracker::types::{EntityId, PriceQuote, SourceId};
use std::sync::Arc;

fn tracker_with(
    store: Arc<dyn PersistenceStore>,
    adapters: &[Arc<ScriptedAdapter>],
    clock: Arc<ManualClock>,
) -> PriceTracker {
    let adapters: Vec<Arc<dyn SourceAdapter>> = adapters
        .iter()
        .map(|adapter| adapter.clone() as Arc<dyn SourceAdapter>)
        .collect();
    PriceTracker::new(
        store,
        Arc::new(SourceRegistry::new(adapters)),
        clock,
        TrackingConfig { chunk_size: 2, ..TrackingConfig::default() },
        RetentionPolicy::default(),
    )
}

#[tokio::test]
async fn register_then_trigger_writes_exactly_one_snapshot() {
    let clock = manual_clock();
    let store = Arc::new(MemoryStore::new());
    let steam = Arc::new(ScriptedAdapter::new("steam"));
    let tracker = tracker_with(store.clone(), &[steam.clone()], clock.clone());

    assert!(tracker.register_entity(EntityId::from("620"), "Portal 2", None).await.unwrap());
    let added_at = store.get_entity(&EntityId::from("620")).await.unwrap().unwrap().added_at;

    clock.advance(ChronoDuration::seconds(5));
    let summary = tracker.trigger_cycle_now(None).await.unwrap();
    assert_eq!(summary.succeeded, 1);
    assert!(summary.failed.is_empty());

    let history = tracker.get_history(&EntityId::from("620"), epoch()).await.unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].timestamp >= added_at);
    assert_eq!(history[0].best_price, Some(price(999)));
}

#[tokio::test]
async fn data_error_for_one_entity_keeps_the_others() {
    let clock = manual_clock();
    let store = Arc::new(MemoryStore::new());
    let steam = Arc::new(ScriptedAdapter::new("steam"));
    steam.respond("2", Err(SourceError::Data("unexpected payload".into())));
    let tracker = tracker_with(store.clone(), &[steam.clone()], clock);

    for id in ["1", "2", "3"] {
        tracker.register_entity(EntityId::from(id), id, None).await.unwrap();
    }

    let summary = tracker.trigger_cycle_now(None).await.unwrap();
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, vec![EntityId::from("2")]);

    for (id, expected) in [("1", 1), ("2", 0), ("3", 1)] {
        let history = tracker.get_history(&EntityId::from(id), epoch()).await.unwrap();
        assert_eq!(history.len(), expected, "entity {}", id);
    }
}

#[tokio::test]
async fn failed_entity_stays_stale_for_next_cycle() {
    let clock = manual_clock();
    let store = Arc::new(MemoryStore::new());
    let steam = Arc::new(ScriptedAdapter::new("steam"));
    steam.respond("1", Err(SourceError::Timeout));
    let tracker = tracker_with(store.clone(), &[steam.clone()], clock.clone());
    tracker.register_entity(EntityId::from("1"), "one", None).await.unwrap();

    assert_eq!(tracker.trigger_cycle_now(None).await.unwrap().failed.len(), 1);

    steam.respond("1", Ok(steam.quote(500, 50)));
    clock.advance(ChronoDuration::minutes(1));
    let summary = tracker.trigger_cycle_now(None).await.unwrap();
    assert_eq!(summary.succeeded, 1);
}

#[tokio::test]
async fn best_quote_across_sources() {
    let clock = manual_clock();
    let store = Arc::new(MemoryStore::new());
    let a = Arc::new(ScriptedAdapter::new("A"));
    let b = Arc::new(ScriptedAdapter::new("B"));
    let c = Arc::new(ScriptedAdapter::new("C"));
    a.respond("x", Ok(PriceQuote::available(SourceId::from("A"), price(1000), price(1000), 0)));
    b.respond("x", Ok(PriceQuote::available(SourceId::from("B"), price(1000), price(1250), 20)));
    c.respond("x", Ok(PriceQuote::unavailable(SourceId::from("C"))));

    let tracker = tracker_with(store, &[a, b, c], clock);
    tracker.register_entity(EntityId::from("x"), "X", None).await.unwrap();
    tracker.trigger_cycle_now(None).await.unwrap();

    let snapshot = tracker.get_history(&EntityId::from("x"), epoch()).await.unwrap().remove(0);
    assert_eq!(snapshot.best_price, Some(price(1000)));
    assert_eq!(snapshot.best_source_id, Some(SourceId::from("B")));
    assert_eq!(snapshot.max_discount, 20);
    assert_eq!(snapshot.per_source.len(), 3);
}

#[tokio::test]
async fn max_batch_size_caps_selection() {
    let clock = manual_clock();
    let store = Arc::new(MemoryStore::new());
    let steam = Arc::new(ScriptedAdapter::new("steam"));
    let tracker = tracker_with(store, &[steam.clone()], clock);
    for i in 0..5 {
        tracker.register_entity(EntityId::new(format!("e{}", i)), "e", None).await.unwrap();
    }

    let summary = tracker.trigger_cycle_now(Some(3)).await.unwrap();
    assert_eq!(summary.attempted, 3);
    assert_eq!(summary.batches, 2);

    let summary = tracker.trigger_cycle_now(Some(10)).await.unwrap();
    assert_eq!(summary.attempted, 2);
}

#[tokio::test]
async fn unreachable_store_aborts_cycle() {
    let clock = manual_clock();
    let store = Arc::new(FlakyStore::new(MemoryStore::new()));
    let steam = Arc::new(ScriptedAdapter::new("steam"));
    let tracker = tracker_with(store.clone(), &[steam.clone()], clock);
    tracker.register_entity(EntityId::from("1"), "one", None).await.unwrap();

    store.set_offline(true);
    let err = tracker.trigger_cycle_now(None).await.unwrap_err();
    assert!(matches!(err, Error::StoreUnavailable(_)));
    assert_eq!(steam.fetches(), 0);
}

#[tokio::test]
async fn commit_failure_is_local_to_the_entity() {
    let clock = manual_clock();
    let store = Arc::new(FlakyStore::new(MemoryStore::new()));
    store.fail_commits_for("2");
    let steam = Arc::new(ScriptedAdapter::new("steam"));
    let tracker = tracker_with(store.clone(), &[steam], clock);
    for id in ["1", "2"] {
        tracker.register_entity(EntityId::from(id), id, None).await.unwrap();
    }

    let summary = tracker.trigger_cycle_now(None).await.unwrap();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, vec![EntityId::from("2")]);
}

#[tokio::test]
async fn rejected_credentials_abort_and_can_be_reinstated() {
    let clock = manual_clock();
    let store = Arc::new(MemoryStore::new());
    let steam = Arc::new(ScriptedAdapter::new("steam"));
    steam.reject_credentials();
    let tracker = tracker_with(store.clone(), &[steam.clone()], clock);
    tracker.register_entity(EntityId::from("1"), "one", None).await.unwrap();

    let err = tracker.trigger_cycle_now(None).await.unwrap_err();
    assert!(matches!(err, Error::CredentialRejected { .. }));
    assert!(matches!(tracker.trigger_cycle_now(None).await, Err(Error::NoActiveSources)));
    assert_eq!(steam.fetches(), 0);

    let previous = tracker.reinstate_source(&SourceId::from("steam")).unwrap();
    assert!(matches!(previous, CredentialState::Revoked { .. }));
    assert_eq!(tracker.source_statuses()[0].credential, CredentialState::Unvalidated);
}

#[tokio::test]
async fn cleanup_older_than_keeps_registry() {
    let clock = manual_clock();
    let store = Arc::new(MemoryStore::new());
    let steam = Arc::new(ScriptedAdapter::new("steam"));
    let tracker = tracker_with(store.clone(), &[steam], clock.clone());
    tracker.register_entity(EntityId::from("1"), "one", None).await.unwrap();

    tracker.trigger_cycle_now(None).await.unwrap();
    clock.advance(ChronoDuration::days(100));
    tracker.trigger_cycle_now(None).await.unwrap();
    assert_eq!(store.snapshot_count(), 2);

    assert_eq!(tracker.cleanup_older_than(90).await.unwrap(), 1);
    assert_eq!(store.snapshot_count(), 1);
    assert_eq!(tracker.list_entities(true).await.unwrap().len(), 1);

    let stats = tracker.statistics().await.unwrap();
    assert_eq!(stats.total_snapshots, 1);
    assert_eq!(stats.snapshots_last_24h, 1);
}

#[tokio::test]
async fn deactivated_entities_leave_selection_and_deals() {
    let clock = manual_clock();
    let store = Arc::new(MemoryStore::new());
    let steam = Arc::new(ScriptedAdapter::new("steam"));
    steam.respond("1", Ok(steam.quote(500, 50)));
    steam.respond("2", Ok(steam.quote(300, 70)));
    let tracker = tracker_with(store.clone(), &[steam.clone()], clock.clone());
    tracker.register_entity(EntityId::from("1"), "one", Some(price(600))).await.unwrap();
    tracker.register_entity(EntityId::from("2"), "two", None).await.unwrap();
    tracker.trigger_cycle_now(None).await.unwrap();

    let deals = tracker.get_best_deals(10, None, 10).await.unwrap();
    assert_eq!(deals.iter().map(|d| d.entity_id.as_str()).collect::<Vec<_>>(), vec!["2", "1"]);
    assert_eq!(tracker.price_alerts().await.unwrap().len(), 1);

    assert!(tracker.deactivate_entity(&EntityId::from("2")).await.unwrap());
    let deals = tracker.get_best_deals(10, None, 10).await.unwrap();
    assert_eq!(deals.len(), 1);

    clock.advance(ChronoDuration::days(1));
    let summary = tracker.trigger_cycle_now(None).await.unwrap();
    assert_eq!(summary.attempted, 1);

    assert!(matches!(
        tracker.deactivate_entity(&EntityId::from("404")).await,
        Err(Error::EntityNotFound(_))
    ));
    // Reactivation keeps history.
    assert!(tracker.register_entity(EntityId::from("2"), "two", None).await.unwrap());
    assert_eq!(tracker.get_history(&EntityId::from("2"), epoch()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn targeted_refresh_ignores_staleness() {
    let clock = manual_clock();
    let store = Arc::new(MemoryStore::new());
    let steam = Arc::new(ScriptedAdapter::new("steam"));
    let tracker = tracker_with(store.clone(), &[steam], clock.clone());
    tracker.register_entity(EntityId::from("1"), "one", None).await.unwrap();
    tracker.trigger_cycle_now(None).await.unwrap();

    clock.advance(ChronoDuration::minutes(1));
    assert_eq!(tracker.trigger_cycle_now(None).await.unwrap().attempted, 0);

    let targets = [EntityId::from("1"), EntityId::from("nope")];
    let summary = tracker.refresh_entities(&targets).await.unwrap();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(store.snapshot_count(), 2);
}

#[tokio::test]
async fn negative_target_price_is_rejected() {
    let tracker = tracker_with(
        Arc::new(MemoryStore::new()),
        &[Arc::new(ScriptedAdapter::new("steam"))],
        manual_clock(),
    );
    let err = tracker
        .register_entity(EntityId::from("1"), "one", Some("-1".parse().unwrap()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}
