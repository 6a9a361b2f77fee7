//! Cross-device synchronized storage using a shared SQLite database
//!
//! Each device opens the same database file (typically on a synchronized
//! volume) under its own device id. Rows remember which device wrote them
//! last, and every write bumps a global revision counter. A poller picks up
//! rows written by other devices and reports them as cross-device changes.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::{ChangeOrigin, StorageChange, StorageChangeStream, SyncStore, WriteQuota},
};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde_json::Value;
use sqlx::{sqlite::SqlitePool, Row};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::db::{open_file_pool, open_memory_pool, unix_now};

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS sync_items (
        key TEXT PRIMARY KEY,
        value TEXT,
        writer TEXT NOT NULL,
        revision INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
"#;

const UPSERT: &str = r#"
    INSERT INTO sync_items (key, value, writer, revision, updated_at)
    VALUES (?, ?, ?, (SELECT COALESCE(MAX(revision), 0) + 1 FROM sync_items), ?)
    ON CONFLICT(key) DO UPDATE SET
        value = excluded.value,
        writer = excluded.writer,
        revision = excluded.revision,
        updated_at = excluded.updated_at
"#;

/// Default write quota, matching what browser sync storage enforces.
pub const DEFAULT_WRITE_QUOTA: WriteQuota = WriteQuota {
    max_writes_per_minute: 120,
    max_writes_per_hour: 1800,
};

const CHANGE_BUFFER: usize = 64;

/// Options for [`SqliteSyncStore`].
#[derive(Debug, Clone)]
pub struct SyncStoreOptions {
    /// Identifies this device's writes in the shared database.
    pub device_id: String,
    /// Write limits; `None` disables rate limiting.
    pub quota: Option<WriteQuota>,
    /// How often to look for writes from other devices; `None` disables
    /// the background poller (call [`SqliteSyncStore::poll_now`] instead).
    pub poll_interval: Option<Duration>,
}

impl Default for SyncStoreOptions {
    fn default() -> Self {
        Self {
            device_id: uuid::Uuid::new_v4().to_string(),
            quota: Some(DEFAULT_WRITE_QUOTA),
            poll_interval: Some(Duration::from_secs(2)),
        }
    }
}

struct Limiters {
    per_minute: DefaultDirectRateLimiter,
    per_hour: DefaultDirectRateLimiter,
}

impl Limiters {
    fn new(quota: WriteQuota) -> Result<Self> {
        let per_minute = NonZeroU32::new(quota.max_writes_per_minute).ok_or_else(|| {
            BridgeError::OperationFailed("max_writes_per_minute must be non-zero".to_string())
        })?;
        let per_hour = NonZeroU32::new(quota.max_writes_per_hour).ok_or_else(|| {
            BridgeError::OperationFailed("max_writes_per_hour must be non-zero".to_string())
        })?;

        Ok(Self {
            per_minute: RateLimiter::direct(Quota::per_minute(per_minute)),
            per_hour: RateLimiter::direct(Quota::per_hour(per_hour)),
        })
    }
}

/// Last value seen per key plus the highest revision already processed.
#[derive(Default)]
struct PollState {
    known: HashMap<String, Option<Value>>,
    seen_revision: i64,
}

struct Shared {
    pool: SqlitePool,
    device_id: String,
    changes: broadcast::Sender<StorageChange>,
    state: Mutex<PollState>,
}

impl Shared {
    async fn load_baseline(&self) -> Result<()> {
        let rows = sqlx::query("SELECT key, value, revision FROM sync_items")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Failed to load items: {}", e)))?;

        let mut state = self.state.lock().await;
        for row in rows {
            let key: String = row.get(0);
            let raw: Option<String> = row.get(1);
            let revision: i64 = row.get(2);
            state.known.insert(key.clone(), decode(&key, raw)?);
            state.seen_revision = state.seen_revision.max(revision);
        }
        Ok(())
    }

    async fn write(&self, key: &str, value: Option<Value>) -> Result<()> {
        let encoded = value
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| BridgeError::OperationFailed(format!("Failed to encode '{}': {}", key, e)))?;

        let mut state = self.state.lock().await;

        let current: Option<Option<String>> =
            sqlx::query_scalar("SELECT value FROM sync_items WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| BridgeError::DatabaseError(format!("Failed to read '{}': {}", key, e)))?;
        let old_value = decode(key, current.flatten())?;

        sqlx::query(UPSERT)
            .bind(key)
            .bind(encoded)
            .bind(&self.device_id)
            .bind(unix_now())
            .execute(&self.pool)
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Failed to write '{}': {}", key, e)))?;

        state.known.insert(key.to_string(), value.clone());

        debug!(key = key, removed = value.is_none(), "Wrote sync item");

        // No subscribers is not an error
        let _ = self.changes.send(StorageChange::new(
            key,
            old_value,
            value,
            ChangeOrigin::ThisDevice,
        ));
        Ok(())
    }

    async fn poll(&self) -> Result<usize> {
        let mut state = self.state.lock().await;

        let rows = sqlx::query(
            "SELECT key, value, writer, revision FROM sync_items WHERE revision > ? ORDER BY revision",
        )
        .bind(state.seen_revision)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BridgeError::DatabaseError(format!("Failed to poll items: {}", e)))?;

        let mut delivered = 0;
        for row in rows {
            let key: String = row.get(0);
            let raw: Option<String> = row.get(1);
            let writer: String = row.get(2);
            let revision: i64 = row.get(3);

            state.seen_revision = state.seen_revision.max(revision);
            let new_value = decode(&key, raw)?;
            let old_value = state.known.insert(key.clone(), new_value.clone()).flatten();

            if writer == self.device_id || old_value == new_value {
                continue;
            }

            debug!(key = %key, writer = %writer, revision, "Received cross-device change");
            let _ = self.changes.send(StorageChange::new(
                key,
                old_value,
                new_value,
                ChangeOrigin::CrossDevice,
            ));
            delivered += 1;
        }

        Ok(delivered)
    }
}

fn decode(key: &str, raw: Option<String>) -> Result<Option<Value>> {
    raw.map(|text| serde_json::from_str(&text))
        .transpose()
        .map_err(|e| BridgeError::DatabaseError(format!("Corrupt value for '{}': {}", key, e)))
}

/// SQLite-backed cross-device store
///
/// Provides:
/// - Whole-value JSON storage with last-write-wins semantics
/// - A per-minute and per-hour write quota; rejected writes store nothing
/// - Change notifications tagged with their origin
pub struct SqliteSyncStore {
    shared: Arc<Shared>,
    limiters: Option<Limiters>,
    quota: Option<WriteQuota>,
    poller: Option<JoinHandle<()>>,
}

impl SqliteSyncStore {
    /// Open the shared database at `db_path`, creating it if needed
    pub async fn open(db_path: PathBuf, options: SyncStoreOptions) -> Result<Self> {
        let pool = open_file_pool(&db_path).await?;
        info!(path = ?db_path, device_id = %options.device_id, "Opening sync store");
        Self::with_pool(pool, options).await
    }

    /// Create an in-memory store (for testing)
    pub async fn in_memory(options: SyncStoreOptions) -> Result<Self> {
        let pool = open_memory_pool().await?;
        Self::with_pool(pool, options).await
    }

    async fn with_pool(pool: SqlitePool, options: SyncStoreOptions) -> Result<Self> {
        sqlx::query(CREATE_TABLE)
            .execute(&pool)
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Failed to create table: {}", e)))?;

        let limiters = options.quota.map(Limiters::new).transpose()?;
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);

        let shared = Arc::new(Shared {
            pool,
            device_id: options.device_id,
            changes,
            state: Mutex::new(PollState::default()),
        });
        shared.load_baseline().await?;

        let poller = options
            .poll_interval
            .map(|interval| spawn_poller(Arc::clone(&shared), interval));

        Ok(Self {
            shared,
            limiters,
            quota: options.quota,
            poller,
        })
    }

    /// This device's writer id
    pub fn device_id(&self) -> &str {
        &self.shared.device_id
    }

    /// Look for writes from other devices right away.
    ///
    /// Returns the number of cross-device changes delivered to subscribers.
    pub async fn poll_now(&self) -> Result<usize> {
        self.shared.poll().await
    }

    fn check_quota(&self, key: &str) -> Result<()> {
        let (Some(limiters), Some(quota)) = (&self.limiters, &self.quota) else {
            return Ok(());
        };

        // A rejected write must not spend hourly budget
        if limiters.per_minute.check().is_err() {
            warn!(key = key, limit = quota.max_writes_per_minute, "Per-minute write quota exceeded");
            return Err(BridgeError::QuotaExceeded {
                key: key.to_string(),
                limit: format!("{} writes per minute", quota.max_writes_per_minute),
            });
        }
        if limiters.per_hour.check().is_err() {
            warn!(key = key, limit = quota.max_writes_per_hour, "Hourly write quota exceeded");
            return Err(BridgeError::QuotaExceeded {
                key: key.to_string(),
                limit: format!("{} writes per hour", quota.max_writes_per_hour),
            });
        }
        Ok(())
    }
}

fn spawn_poller(shared: Arc<Shared>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = shared.poll().await {
                warn!(error = %e, "Sync store poll failed");
            }
        }
    })
}

impl Drop for SqliteSyncStore {
    fn drop(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
    }
}

#[async_trait]
impl SyncStore for SqliteSyncStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let raw: Option<Option<String>> =
            sqlx::query_scalar("SELECT value FROM sync_items WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.shared.pool)
                .await
                .map_err(|e| BridgeError::DatabaseError(format!("Failed to read '{}': {}", key, e)))?;

        decode(key, raw.flatten())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.check_quota(key)?;
        self.shared.write(key, Some(value)).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.check_quota(key)?;
        self.shared.write(key, None).await
    }

    async fn subscribe_changes(&self) -> Result<Box<dyn StorageChangeStream>> {
        Ok(Box::new(BroadcastChangeStream {
            receiver: self.shared.changes.subscribe(),
        }))
    }

    fn write_quota(&self) -> Option<WriteQuota> {
        self.quota
    }
}

struct BroadcastChangeStream {
    receiver: broadcast::Receiver<StorageChange>,
}

#[async_trait]
impl StorageChangeStream for BroadcastChangeStream {
    async fn next(&mut self) -> Option<StorageChange> {
        loop {
            match self.receiver.recv().await {
                Ok(change) => return Some(change),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Sync change subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options(device_id: &str) -> SyncStoreOptions {
        SyncStoreOptions {
            device_id: device_id.to_string(),
            quota: Some(DEFAULT_WRITE_QUOTA),
            poll_interval: None,
        }
    }

    #[tokio::test]
    async fn test_set_get_remove() {
        let store = SqliteSyncStore::in_memory(options("desk")).await.unwrap();

        assert_eq!(store.get("UserId").await.unwrap(), None);
        store.set("UserId", json!("U1")).await.unwrap();
        assert_eq!(store.get("UserId").await.unwrap(), Some(json!("U1")));

        store.remove("UserId").await.unwrap();
        assert_eq!(store.get("UserId").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_local_writes_are_reported_as_this_device() {
        let store = SqliteSyncStore::in_memory(options("desk")).await.unwrap();
        let mut changes = store.subscribe_changes().await.unwrap();

        store.set("dirty", json!(false)).await.unwrap();
        store.set("dirty", json!(true)).await.unwrap();

        let first = changes.next().await.unwrap();
        assert_eq!(first.origin, ChangeOrigin::ThisDevice);
        assert_eq!(first.old_value, None);

        let second = changes.next().await.unwrap();
        assert_eq!(second.old_value, Some(json!(false)));
        assert_eq!(second.new_value, Some(json!(true)));
    }

    #[tokio::test]
    async fn test_quota_rejects_without_writing() {
        let store = SqliteSyncStore::in_memory(SyncStoreOptions {
            device_id: "desk".to_string(),
            quota: Some(WriteQuota {
                max_writes_per_minute: 2,
                max_writes_per_hour: 100,
            }),
            poll_interval: None,
        })
        .await
        .unwrap();

        store.set("dirty", json!(true)).await.unwrap();
        store.set("dirty", json!(false)).await.unwrap();
        let err = store.set("dirty", json!(true)).await.unwrap_err();

        assert!(err.is_quota_exceeded());
        assert_eq!(store.get("dirty").await.unwrap(), Some(json!(false)));
    }

    #[tokio::test]
    async fn test_minute_rejections_keep_hourly_budget() {
        let store = SqliteSyncStore::in_memory(SyncStoreOptions {
            device_id: "desk".to_string(),
            quota: Some(WriteQuota {
                max_writes_per_minute: 2,
                max_writes_per_hour: 3,
            }),
            poll_interval: None,
        })
        .await
        .unwrap();

        store.set("dirty", json!(true)).await.unwrap();
        store.set("dirty", json!(false)).await.unwrap();
        for _ in 0..5 {
            assert!(store.set("dirty", json!(true)).await.unwrap_err().is_quota_exceeded());
        }

        let limiters = store.limiters.as_ref().unwrap();
        assert!(limiters.per_hour.check().is_ok());
    }

    #[tokio::test]
    async fn test_zero_quota_is_rejected() {
        let result = SqliteSyncStore::in_memory(SyncStoreOptions {
            device_id: "desk".to_string(),
            quota: Some(WriteQuota {
                max_writes_per_minute: 0,
                max_writes_per_hour: 10,
            }),
            poll_interval: None,
        })
        .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_cross_device_changes_are_delivered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.db");

        let laptop = SqliteSyncStore::open(path.clone(), options("laptop"))
            .await
            .unwrap();
        let desktop = SqliteSyncStore::open(path, options("desktop")).await.unwrap();
        let mut desktop_changes = desktop.subscribe_changes().await.unwrap();

        laptop.set("dirty", json!(true)).await.unwrap();
        assert_eq!(desktop.poll_now().await.unwrap(), 1);

        let change = desktop_changes.next().await.unwrap();
        assert!(change.is_cross_device());
        assert_eq!(change.key, "dirty");
        assert_eq!(change.old_value, None);
        assert_eq!(change.new_value, Some(json!(true)));

        // The writer never sees its own write as cross-device
        assert_eq!(laptop.poll_now().await.unwrap(), 0);
        // Nothing new for the second poll
        assert_eq!(desktop.poll_now().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_existing_rows_are_not_replayed_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.db");

        {
            let laptop = SqliteSyncStore::open(path.clone(), options("laptop"))
                .await
                .unwrap();
            laptop.set("UserId", json!("U1")).await.unwrap();
        }

        let desktop = SqliteSyncStore::open(path, options("desktop")).await.unwrap();
        assert_eq!(desktop.poll_now().await.unwrap(), 0);
        assert_eq!(desktop.get("UserId").await.unwrap(), Some(json!("U1")));
    }

    #[tokio::test]
    async fn test_background_poller_delivers_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.db");

        let laptop = SqliteSyncStore::open(path.clone(), options("laptop"))
            .await
            .unwrap();
        let desktop = SqliteSyncStore::open(
            path,
            SyncStoreOptions {
                poll_interval: Some(Duration::from_millis(20)),
                ..options("desktop")
            },
        )
        .await
        .unwrap();
        let mut changes = desktop.subscribe_changes().await.unwrap();

        laptop.set("dirty", json!(true)).await.unwrap();

        let change = tokio::time::timeout(Duration::from_secs(5), changes.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(change.origin, ChangeOrigin::CrossDevice);
    }
}
