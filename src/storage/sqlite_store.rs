//! SQLite persistence. Connection access is serialized behind a mutex and every call runs
//! on the blocking pool.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use crate::error::{StorageError, StorageResult};
use crate::interfaces::{PersistenceStore, StoreStats};
use crate::types::{
    EntityId, EntitySource, Price, PriceQuote, PriceSnapshot, RefreshCandidate, SourceId,
    TrackedEntity,
};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS tracked_entities (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        added_at INTEGER NOT NULL,
        last_update_at INTEGER,
        target_price TEXT,
        active INTEGER NOT NULL DEFAULT 1,
        source TEXT NOT NULL DEFAULT 'manual'
    );

    CREATE TABLE IF NOT EXISTS price_snapshots (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        entity_id TEXT NOT NULL REFERENCES tracked_entities(id),
        timestamp INTEGER NOT NULL,
        per_source TEXT NOT NULL,
        best_price TEXT,
        best_source_id TEXT,
        max_discount INTEGER NOT NULL DEFAULT 0
    );

    CREATE INDEX IF NOT EXISTS idx_snapshots_entity_time ON price_snapshots(entity_id, timestamp);
    CREATE INDEX IF NOT EXISTS idx_snapshots_time ON price_snapshots(timestamp);
    CREATE INDEX IF NOT EXISTS idx_entities_active_update
        ON tracked_entities(active, last_update_at);
";

const SNAPSHOT_COLUMNS: &str =
    "s.entity_id, s.timestamp, s.per_source, s.best_price, s.best_source_id, s.max_discount";

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(map_sqlite_error)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;",
        )
        .map_err(map_sqlite_error)?;
        let store = Self::with_connection(conn)?;
        info!(path = %path.display(), "Opened SQLite price store");
        Ok(store)
    }

    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory().map_err(map_sqlite_error)?;
        conn.execute_batch("PRAGMA foreign_keys=ON;").map_err(map_sqlite_error)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> StorageResult<Self> {
        conn.execute_batch(SCHEMA).map_err(map_sqlite_error)?;
        Ok(SqliteStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<F, T>(&self, op: F) -> StorageResult<T>
    where
        F: FnOnce(&mut Connection) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StorageError::Unavailable("connection mutex poisoned".to_string()))?;
            op(&mut guard)
        })
        .await
        .map_err(|e| StorageError::Unavailable(format!("blocking task failed: {}", e)))?
    }
}

fn backup_target(dest: &Path) -> StorageResult<String> {
    if dest.exists() {
        return Err(StorageError::Query(format!(
            "backup target {} already exists",
            dest.display()
        )));
    }
    dest.to_str()
        .map(str::to_string)
        .ok_or_else(|| StorageError::Query(format!("backup path {} is not UTF-8", dest.display())))
}

#[async_trait]
impl PersistenceStore for SqliteStore {
    async fn health_check(&self) -> StorageResult<()> {
        self.run(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map_err(|e| StorageError::Unavailable(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn register_entity(&self, entity: TrackedEntity) -> StorageResult<bool> {
        self.run(move |conn| {
            let tx = conn.transaction().map_err(map_sqlite_error)?;
            let existing: Option<bool> = tx
                .query_row(
                    "SELECT active FROM tracked_entities WHERE id = ?1",
                    params![entity.id.as_str()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(map_sqlite_error)?;

            let changed = match existing {
                Some(true) => false,
                Some(false) => {
                    tx.execute(
                        "UPDATE tracked_entities
                         SET active = 1, name = ?2, target_price = COALESCE(?3, target_price)
                         WHERE id = ?1",
                        params![
                            entity.id.as_str(),
                            entity.name,
                            entity.target_price.map(|p| p.to_string()),
                        ],
                    )
                    .map_err(map_sqlite_error)?;
                    true
                }
                None => {
                    tx.execute(
                        "INSERT INTO tracked_entities
                         (id, name, added_at, last_update_at, target_price, active, source)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                        params![
                            entity.id.as_str(),
                            entity.name,
                            entity.added_at.timestamp_millis(),
                            entity.last_update_at.map(|t| t.timestamp_millis()),
                            entity.target_price.map(|p| p.to_string()),
                            entity.active,
                            entity.source.as_str(),
                        ],
                    )
                    .map_err(map_sqlite_error)?;
                    true
                }
            };
            tx.commit().map_err(map_sqlite_error)?;
            Ok(changed)
        })
        .await
    }

    async fn get_entity(&self, id: &EntityId) -> StorageResult<Option<TrackedEntity>> {
        let id = id.clone();
        self.run(move |conn| {
            conn.query_row(
                "SELECT id, name, added_at, last_update_at, target_price, active, source
                 FROM tracked_entities WHERE id = ?1",
                params![id.as_str()],
                EntityRow::from_row,
            )
            .optional()
            .map_err(map_sqlite_error)?
            .map(EntityRow::into_entity)
            .transpose()
        })
        .await
    }

    async fn list_entities(&self, include_inactive: bool) -> StorageResult<Vec<TrackedEntity>> {
        self.run(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, name, added_at, last_update_at, target_price, active, source
                     FROM tracked_entities WHERE active = 1 OR ?1 ORDER BY id",
                )
                .map_err(map_sqlite_error)?;
            let rows = stmt
                .query_map(params![include_inactive], EntityRow::from_row)
                .map_err(map_sqlite_error)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(map_sqlite_error)?;
            rows.into_iter().map(EntityRow::into_entity).collect()
        })
        .await
    }

    async fn set_active(&self, id: &EntityId, active: bool) -> StorageResult<bool> {
        let id = id.clone();
        self.run(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE tracked_entities SET active = ?2 WHERE id = ?1 AND active != ?2",
                    params![id.as_str(), active],
                )
                .map_err(map_sqlite_error)?;
            Ok(changed > 0)
        })
        .await
    }

    async fn set_target_price(
        &self,
        id: &EntityId,
        target_price: Option<Price>,
    ) -> StorageResult<bool> {
        let id = id.clone();
        self.run(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE tracked_entities SET target_price = ?2 WHERE id = ?1",
                    params![id.as_str(), target_price.map(|p| p.to_string())],
                )
                .map_err(map_sqlite_error)?;
            Ok(changed > 0)
        })
        .await
    }

    async fn refresh_candidates(&self) -> StorageResult<Vec<RefreshCandidate>> {
        self.run(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT e.id, e.active, e.last_update_at, e.target_price,
                            (SELECT s.max_discount FROM price_snapshots s
                             WHERE s.entity_id = e.id
                             ORDER BY s.timestamp DESC, s.id DESC LIMIT 1)
                     FROM tracked_entities e
                     WHERE e.active = 1",
                )
                .map_err(map_sqlite_error)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, bool>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<i64>>(4)?,
                    ))
                })
                .map_err(map_sqlite_error)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(map_sqlite_error)?;

            rows.into_iter()
                .map(|(id, active, last_update_at, target_price, last_discount)| {
                    Ok(RefreshCandidate {
                        id: EntityId::new(id),
                        active,
                        last_update_at: last_update_at.map(from_millis).transpose()?,
                        target_price: target_price.as_deref().map(parse_price).transpose()?,
                        last_max_discount: last_discount.map(|d| d.clamp(0, 100) as u8),
                    })
                })
                .collect()
        })
        .await
    }

    async fn commit_snapshot(&self, snapshot: &PriceSnapshot) -> StorageResult<()> {
        let snapshot = snapshot.clone();
        self.run(move |conn| {
            let per_source = serde_json::to_string(&snapshot.per_source)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            let timestamp = snapshot.timestamp.timestamp_millis();

            let tx = conn.transaction().map_err(map_sqlite_error)?;
            let updated = tx
                .execute(
                    "UPDATE tracked_entities
                     SET last_update_at = MAX(COALESCE(last_update_at, ?2), ?2)
                     WHERE id = ?1",
                    params![snapshot.entity_id.as_str(), timestamp],
                )
                .map_err(map_sqlite_error)?;
            if updated == 0 {
                return Err(StorageError::EntityNotFound(snapshot.entity_id.clone()));
            }

            tx.execute(
                "INSERT INTO price_snapshots
                 (entity_id, timestamp, per_source, best_price, best_source_id, max_discount)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    snapshot.entity_id.as_str(),
                    timestamp,
                    per_source,
                    snapshot.best_price.map(|p| p.to_string()),
                    snapshot.best_source_id.as_ref().map(|s| s.as_str().to_string()),
                    snapshot.max_discount,
                ],
            )
            .map_err(map_sqlite_error)?;
            tx.commit().map_err(map_sqlite_error)?;

            debug!(entity_id = %snapshot.entity_id, "Snapshot committed");
            Ok(())
        })
        .await
    }

    async fn history(
        &self,
        id: &EntityId,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<PriceSnapshot>> {
        let id = id.clone();
        self.run(move |conn| {
            let sql = format!(
                "SELECT {} FROM price_snapshots s
                 WHERE s.entity_id = ?1 AND s.timestamp >= ?2
                 ORDER BY s.timestamp ASC, s.id ASC",
                SNAPSHOT_COLUMNS
            );
            query_snapshots(conn, &sql, params![id.as_str(), since.timestamp_millis()])
        })
        .await
    }

    async fn latest_snapshots(&self) -> StorageResult<Vec<PriceSnapshot>> {
        self.run(|conn| {
            let sql = format!(
                "SELECT {} FROM price_snapshots s
                 JOIN tracked_entities e ON e.id = s.entity_id
                 WHERE e.active = 1
                   AND s.id = (SELECT s2.id FROM price_snapshots s2
                               WHERE s2.entity_id = s.entity_id
                               ORDER BY s2.timestamp DESC, s2.id DESC LIMIT 1)
                 ORDER BY s.entity_id",
                SNAPSHOT_COLUMNS
            );
            query_snapshots(conn, &sql, [])
        })
        .await
    }

    async fn delete_snapshots_before(&self, cutoff: DateTime<Utc>) -> StorageResult<usize> {
        self.run(move |conn| {
            conn.execute(
                "DELETE FROM price_snapshots WHERE timestamp < ?1",
                params![cutoff.timestamp_millis()],
            )
            .map_err(map_sqlite_error)
        })
        .await
    }

    async fn stats(&self, since: DateTime<Utc>) -> StorageResult<StoreStats> {
        self.run(move |conn| {
            let (tracked, inactive): (i64, i64) = conn
                .query_row(
                    "SELECT COALESCE(SUM(active = 1), 0), COALESCE(SUM(active = 0), 0)
                     FROM tracked_entities",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map_err(map_sqlite_error)?;
            let (total, recent, oldest, newest): (i64, i64, Option<i64>, Option<i64>) = conn
                .query_row(
                    "SELECT COUNT(*), COALESCE(SUM(timestamp >= ?1), 0),
                            MIN(timestamp), MAX(timestamp)
                     FROM price_snapshots",
                    params![since.timestamp_millis()],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .map_err(map_sqlite_error)?;

            Ok(StoreStats {
                tracked_entities: tracked as usize,
                inactive_entities: inactive as usize,
                total_snapshots: total as usize,
                snapshots_since: recent as usize,
                oldest_snapshot: oldest.map(from_millis).transpose()?,
                newest_snapshot: newest.map(from_millis).transpose()?,
            })
        })
        .await
    }

    async fn compact(&self) -> StorageResult<()> {
        self.run(|conn| {
            conn.execute_batch("VACUUM").map_err(map_sqlite_error)?;
            debug!("SQLite price store vacuumed");
            Ok(())
        })
        .await
    }

    async fn backup(&self, dest: &Path) -> StorageResult<()> {
        let target = backup_target(dest)?;
        self.run(move |conn| {
            conn.execute("VACUUM INTO ?1", params![target]).map_err(map_sqlite_error)?;
            info!(path = %target, "SQLite price store backed up");
            Ok(())
        })
        .await
    }
}

struct EntityRow {
    id: String,
    name: String,
    added_at: i64,
    last_update_at: Option<i64>,
    target_price: Option<String>,
    active: bool,
    source: String,
}

impl EntityRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(EntityRow {
            id: row.get(0)?,
            name: row.get(1)?,
            added_at: row.get(2)?,
            last_update_at: row.get(3)?,
            target_price: row.get(4)?,
            active: row.get(5)?,
            source: row.get(6)?,
        })
    }

    fn into_entity(self) -> StorageResult<TrackedEntity> {
        Ok(TrackedEntity {
            id: EntityId::new(self.id),
            name: self.name,
            added_at: from_millis(self.added_at)?,
            last_update_at: self.last_update_at.map(from_millis).transpose()?,
            target_price: self.target_price.as_deref().map(parse_price).transpose()?,
            active: self.active,
            source: EntitySource::parse(&self.source).unwrap_or_default(),
        })
    }
}

struct SnapshotRow {
    entity_id: String,
    timestamp: i64,
    per_source: String,
    best_price: Option<String>,
    best_source_id: Option<String>,
    max_discount: i64,
}

impl SnapshotRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(SnapshotRow {
            entity_id: row.get(0)?,
            timestamp: row.get(1)?,
            per_source: row.get(2)?,
            best_price: row.get(3)?,
            best_source_id: row.get(4)?,
            max_discount: row.get(5)?,
        })
    }

    fn into_snapshot(self) -> StorageResult<PriceSnapshot> {
        let per_source: BTreeMap<SourceId, PriceQuote> = serde_json::from_str(&self.per_source)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        Ok(PriceSnapshot {
            entity_id: EntityId::new(self.entity_id),
            timestamp: from_millis(self.timestamp)?,
            per_source,
            best_price: self.best_price.as_deref().map(parse_price).transpose()?,
            best_source_id: self.best_source_id.map(SourceId::new),
            max_discount: self.max_discount.clamp(0, 100) as u8,
        })
    }
}

fn query_snapshots<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> StorageResult<Vec<PriceSnapshot>> {
    let mut stmt = conn.prepare(sql).map_err(map_sqlite_error)?;
    let rows = stmt
        .query_map(params, SnapshotRow::from_row)
        .map_err(map_sqlite_error)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(map_sqlite_error)?;
    rows.into_iter().map(SnapshotRow::into_snapshot).collect()
}

fn from_millis(ms: i64) -> StorageResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StorageError::Serialization(format!("timestamp {} out of range", ms)))
}

fn parse_price(raw: &str) -> StorageResult<Price> {
    Price::from_str(raw).map_err(|e| StorageError::Serialization(format!("price {:?}: {}", raw, e)))
}

fn map_sqlite_error(err: rusqlite::Error) -> StorageError {
    match err.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy)
        | Some(ErrorCode::DatabaseLocked)
        | Some(ErrorCode::CannotOpen)
        | Some(ErrorCode::NotADatabase)
        | Some(ErrorCode::SystemIoFailure) => StorageError::Unavailable(err.to_string()),
        _ => StorageError::Query(err.to_string()),
    }
}
