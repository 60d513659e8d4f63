mod common;

use chrono::{Duration, Utc};
use common::{epoch, price, ScriptedAdapter};
use price_tracker::config::TrackingConfig;
use price_tracker::error::StorageError;
use price_tracker::interfaces::{PersistenceStore, SystemClock};
use price_tracker::price_infra::{SourceAdapter, SourceRegistry};
use price_tracker::storage::SqliteStore;
use price_tracker::tracking::{PriceTracker, RetentionPolicy};
use price_tracker::types::{EntityId, PriceQuote, PriceSnapshot, SourceId, TrackedEntity};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use uuid::Uuid;

fn snapshot(id: &str, minutes: i64, cents: Option<i64>, discount: u8) -> PriceSnapshot {
    let source = SourceId::from("steam");
    let quote = match cents {
        Some(cents) => {
            PriceQuote::available(source.clone(), price(cents), price(cents * 2), discount)
        }
        None => PriceQuote::unavailable(source.clone()),
    };
    PriceSnapshot {
        entity_id: EntityId::from(id),
        timestamp: epoch() + Duration::minutes(minutes),
        per_source: BTreeMap::from([(source.clone(), quote)]),
        best_price: cents.map(price),
        best_source_id: cents.map(|_| source),
        max_discount: discount,
    }
}

async fn seeded(ids: &[&str]) -> SqliteStore {
    let store = SqliteStore::open_in_memory().unwrap();
    for id in ids {
        store
            .register_entity(TrackedEntity::new(EntityId::from(*id), *id, epoch()))
            .await
            .unwrap();
    }
    store
}

struct TempDb(PathBuf);

impl TempDb {
    fn new() -> Self {
        TempDb(std::env::temp_dir().join(format!("price-tracker-{}.db", Uuid::new_v4())))
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", self.0.display(), suffix));
        }
    }
}

#[tokio::test]
async fn register_is_idempotent_and_reactivates() {
    let store = seeded(&["620"]).await;
    let again = TrackedEntity::new(EntityId::from("620"), "Portal 2", epoch() + Duration::days(1));
    assert!(!store.register_entity(again.clone()).await.unwrap());

    assert!(store.set_active(&EntityId::from("620"), false).await.unwrap());
    assert!(!store.set_active(&EntityId::from("620"), false).await.unwrap());
    assert!(store.list_entities(false).await.unwrap().is_empty());

    assert!(store.register_entity(again).await.unwrap());
    let entity = store.get_entity(&EntityId::from("620")).await.unwrap().unwrap();
    assert!(entity.active);
    assert_eq!(entity.name, "Portal 2");
    // Reactivation keeps the original registration time.
    assert_eq!(entity.added_at, epoch());
}

#[tokio::test]
async fn commit_moves_last_update_and_history_is_ascending() {
    let store = seeded(&["a"]).await;
    store.commit_snapshot(&snapshot("a", 30, Some(500), 10)).await.unwrap();
    store.commit_snapshot(&snapshot("a", 10, Some(700), 0)).await.unwrap();
    store.commit_snapshot(&snapshot("a", 20, None, 0)).await.unwrap();

    let entity = store.get_entity(&EntityId::from("a")).await.unwrap().unwrap();
    assert_eq!(entity.last_update_at, Some(epoch() + Duration::minutes(30)));

    let history = store.history(&EntityId::from("a"), epoch()).await.unwrap();
    let minutes: Vec<i64> = history.iter().map(|s| (s.timestamp - epoch()).num_minutes()).collect();
    assert_eq!(minutes, vec![10, 20, 30]);
    assert_eq!(history[1].best_price, None);
    assert_eq!(history[2], snapshot("a", 30, Some(500), 10));

    let since = epoch() + Duration::minutes(20);
    let recent = store.history(&EntityId::from("a"), since).await.unwrap();
    assert_eq!(recent.len(), 2);
}

#[tokio::test]
async fn latest_snapshots_cover_active_entities_only() {
    let store = seeded(&["a", "b", "c"]).await;
    store.commit_snapshot(&snapshot("a", 1, Some(900), 0)).await.unwrap();
    store.commit_snapshot(&snapshot("a", 2, Some(450), 50)).await.unwrap();
    store.commit_snapshot(&snapshot("b", 1, Some(100), 90)).await.unwrap();
    store.set_active(&EntityId::from("b"), false).await.unwrap();

    let latest = store.latest_snapshots().await.unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].entity_id, EntityId::from("a"));
    assert_eq!(latest[0].max_discount, 50);

    let candidates = store.refresh_candidates().await.unwrap();
    let mut by_id: Vec<_> =
        candidates.iter().map(|c| (c.id.as_str(), c.last_max_discount)).collect();
    by_id.sort();
    assert_eq!(by_id, vec![("a", Some(50)), ("c", None)]);
}

#[tokio::test]
async fn retention_deletes_only_old_snapshots() {
    let store = seeded(&["a", "b"]).await;
    store.commit_snapshot(&snapshot("a", 0, Some(100), 0)).await.unwrap();
    store.commit_snapshot(&snapshot("a", 60, Some(100), 0)).await.unwrap();
    store.commit_snapshot(&snapshot("b", 120, Some(100), 0)).await.unwrap();

    let deleted = store.delete_snapshots_before(epoch() + Duration::minutes(60)).await.unwrap();
    assert_eq!(deleted, 1);

    let stats = store.stats(epoch() + Duration::minutes(100)).await.unwrap();
    assert_eq!(stats.tracked_entities, 2);
    assert_eq!(stats.total_snapshots, 2);
    assert_eq!(stats.snapshots_since, 1);
    assert_eq!(stats.oldest_snapshot, Some(epoch() + Duration::minutes(60)));
    assert_eq!(stats.newest_snapshot, Some(epoch() + Duration::minutes(120)));
}

#[tokio::test]
async fn file_store_survives_reopen() {
    let db = TempDb::new();
    {
        let store = SqliteStore::open(&db.0).unwrap();
        store
            .register_entity(
                TrackedEntity::new(EntityId::from("620"), "Portal 2", epoch())
                    .with_target_price(Some("4.99".parse().unwrap())),
            )
            .await
            .unwrap();
        store.commit_snapshot(&snapshot("620", 5, Some(399), 60)).await.unwrap();
    }

    let store = SqliteStore::open(&db.0).unwrap();
    let entity = store.get_entity(&EntityId::from("620")).await.unwrap().unwrap();
    assert_eq!(entity.target_price, Some(price(499)));
    assert_eq!(entity.last_update_at, Some(epoch() + Duration::minutes(5)));
    assert_eq!(store.history(&entity.id, epoch()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn tracker_runs_against_sqlite() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let steam = Arc::new(ScriptedAdapter::new("steam"));
    steam.respond("2", Err(price_tracker::error::SourceError::Timeout));
    let tracker = PriceTracker::new(
        store.clone(),
        Arc::new(SourceRegistry::new(vec![steam as Arc<dyn SourceAdapter>])),
        common::manual_clock(),
        TrackingConfig::default(),
        RetentionPolicy::default(),
    );
    for id in ["1", "2"] {
        tracker.register_entity(EntityId::from(id), id, None).await.unwrap();
    }

    let summary = tracker.trigger_cycle_now(None).await.unwrap();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, vec![EntityId::from("2")]);

    let failed = store.get_entity(&EntityId::from("2")).await.unwrap().unwrap();
    assert_eq!(failed.last_update_at, None);
    assert_eq!(tracker.statistics().await.unwrap().total_snapshots, 1);
}

#[tokio::test]
async fn backup_is_a_readable_copy() {
    let source = TempDb::new();
    let copy = TempDb::new();
    let store = SqliteStore::open(&source.0).unwrap();
    store
        .register_entity(TrackedEntity::new(EntityId::from("620"), "Portal 2", epoch()))
        .await
        .unwrap();
    store.commit_snapshot(&snapshot("620", 5, Some(399), 60)).await.unwrap();

    store.backup(&copy.0).await.unwrap();
    // Later writes do not leak into the copy.
    store.commit_snapshot(&snapshot("620", 10, Some(299), 70)).await.unwrap();

    let restored = SqliteStore::open(&copy.0).unwrap();
    let entity = restored.get_entity(&EntityId::from("620")).await.unwrap().unwrap();
    assert_eq!(entity.last_update_at, Some(epoch() + Duration::minutes(5)));
    let history = restored.history(&entity.id, epoch()).await.unwrap();
    assert_eq!(history, vec![snapshot("620", 5, Some(399), 60)]);

    let err = store.backup(&copy.0).await.unwrap_err();
    assert!(matches!(err, StorageError::Query(_)));
}

#[tokio::test]
async fn cleanup_compacts_the_file_store() {
    let db = TempDb::new();
    let store = Arc::new(SqliteStore::open(&db.0).unwrap());
    let clock = common::manual_clock();
    let tracker = PriceTracker::new(
        store.clone(),
        Arc::new(SourceRegistry::new(Vec::new())),
        clock.clone(),
        TrackingConfig::default(),
        RetentionPolicy::default(),
    );
    let ids: Vec<String> = (0..50).map(|i| i.to_string()).collect();
    for id in &ids {
        tracker.register_entity(EntityId::from(id.as_str()), id, None).await.unwrap();
        store.commit_snapshot(&snapshot(id, 0, Some(1999), 25)).await.unwrap();
    }
    store.commit_snapshot(&snapshot("0", 60 * 24 * 10, Some(999), 50)).await.unwrap();

    clock.advance(Duration::days(11));
    assert_eq!(tracker.cleanup_older_than(5).await.unwrap(), 50);

    // The vacuum ran on the same connection and left a consistent store behind.
    store.compact().await.unwrap();
    let stats = store.stats(epoch()).await.unwrap();
    assert_eq!(stats.tracked_entities, 50);
    assert_eq!(stats.total_snapshots, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn foreground_and_scheduled_cycles_commit_consistently() {
    let db = TempDb::new();
    let store = Arc::new(SqliteStore::open(&db.0).unwrap());
    let steam = Arc::new(ScriptedAdapter::new("steam").with_delay(StdDuration::from_millis(20)));
    steam.respond("3", Err(price_tracker::error::SourceError::Timeout));
    let tracker = PriceTracker::new(
        store.clone(),
        Arc::new(SourceRegistry::new(vec![steam as Arc<dyn SourceAdapter>])),
        Arc::new(SystemClock),
        TrackingConfig { chunk_size: 2, ..TrackingConfig::default() },
        RetentionPolicy::default(),
    );
    let ids: Vec<EntityId> = (1..=8).map(|i| EntityId::new(i.to_string())).collect();
    for id in &ids {
        tracker.register_entity(id.clone(), id.as_str(), None).await.unwrap();
    }

    tracker.start_scheduler(StdDuration::from_secs(3600)).unwrap();
    let foreground = tracker.trigger_cycle_now(None).await.unwrap();
    tokio::time::timeout(StdDuration::from_secs(10), async {
        while tracker.scheduler_status().cycles_completed == 0 {
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    let scheduled = tracker.stop_scheduler().await.last_run_summary.unwrap();

    let committed = foreground.succeeded + scheduled.succeeded;
    assert!(committed > 0);
    assert_eq!(tracker.statistics().await.unwrap().total_snapshots, committed);

    let since = Utc::now() - Duration::days(1);
    for id in &ids {
        let entity = store.get_entity(id).await.unwrap().unwrap();
        let newest = store.history(id, since).await.unwrap().last().map(|s| s.timestamp);
        assert_eq!(entity.last_update_at, newest, "entity {}", id);
    }
    let failed = store.get_entity(&EntityId::from("3")).await.unwrap().unwrap();
    assert_eq!(failed.last_update_at, None);
}
