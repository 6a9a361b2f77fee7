#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bridge_traits::activity::{ActivityChangeStream, ActivityObserver, ActivityState};
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::storage::{
    ChangeOrigin, LocalStore, StorageChange, StorageChangeStream, SyncStore,
};
use core_runtime::config::{CoreConfig, DirtyWritePolicy};
use core_session::{
    CoreEvent, EntityId, EventStream, EntityPayload, FolderId, FolderPayload, NewEntity, RemoteStore, SessionCore,
    SessionError,
};
use serde_json::Value;
use tokio::sync::{broadcast, Semaphore};

pub const SERVER_URL: &str = "https://api.example.com/";

// ---------------------------------------------------------------------------
// Sync store
// ---------------------------------------------------------------------------

/// In-memory sync store that records every write made through it.
pub struct RecordingSyncStore {
    values: Mutex<HashMap<String, Value>>,
    writes: Mutex<Vec<(String, Value)>>,
    changes: broadcast::Sender<StorageChange>,
    fail_reads: AtomicBool,
}

impl RecordingSyncStore {
    pub fn new() -> Arc<Self> {
        let (changes, _) = broadcast::channel(64);
        Arc::new(Self {
            values: Mutex::new(HashMap::new()),
            writes: Mutex::new(Vec::new()),
            changes,
            fail_reads: AtomicBool::new(false),
        })
    }

    /// Seed a value as if another device had written it earlier.
    pub fn seed(&self, key: &str, value: Value) {
        self.values.lock().unwrap().insert(key.to_string(), value);
    }

    pub fn value(&self, key: &str) -> Option<Value> {
        self.values.lock().unwrap().get(key).cloned()
    }

    pub fn fail_reads(&self) {
        self.fail_reads.store(true, Ordering::SeqCst);
    }

    pub fn writes(&self) -> Vec<(String, Value)> {
        self.writes.lock().unwrap().clone()
    }

    pub fn writes_to(&self, key: &str) -> Vec<Value> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// Deliver a change written by another device.
    pub fn inject_cross_device(&self, key: &str, value: Value) {
        let old = self
            .values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.clone());
        let _ = self.changes.send(StorageChange::new(
            key,
            old,
            Some(value),
            ChangeOrigin::CrossDevice,
        ));
    }
}

#[async_trait]
impl SyncStore for RecordingSyncStore {
    async fn get(&self, key: &str) -> BridgeResult<Option<Value>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(BridgeError::OperationFailed("sync store offline".to_string()));
        }
        Ok(self.value(key))
    }

    async fn set(&self, key: &str, value: Value) -> BridgeResult<()> {
        self.writes
            .lock()
            .unwrap()
            .push((key.to_string(), value.clone()));
        let old = self
            .values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.clone());
        let _ = self.changes.send(StorageChange::new(
            key,
            old,
            Some(value),
            ChangeOrigin::ThisDevice,
        ));
        Ok(())
    }

    async fn remove(&self, key: &str) -> BridgeResult<()> {
        self.values.lock().unwrap().remove(key);
        Ok(())
    }

    async fn subscribe_changes(&self) -> BridgeResult<Box<dyn StorageChangeStream>> {
        Ok(Box::new(BroadcastChanges(self.changes.subscribe())))
    }
}

struct BroadcastChanges(broadcast::Receiver<StorageChange>);

#[async_trait]
impl StorageChangeStream for BroadcastChanges {
    async fn next(&mut self) -> Option<StorageChange> {
        loop {
            match self.0.recv().await {
                Ok(change) => return Some(change),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Local store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryLocalStore {
    values: Mutex<HashMap<String, String>>,
    writes: Mutex<Vec<(String, String)>>,
    fail_reads: AtomicBool,
}

impl MemoryLocalStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed(&self, key: &str, value: &str) {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.values.lock().unwrap().get(key).cloned()
    }

    pub fn writes_to(&self, key: &str) -> Vec<String> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .collect()
    }

    pub fn fail_reads(&self) {
        self.fail_reads.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
    async fn set_string(&self, key: &str, value: &str) -> BridgeResult<()> {
        self.writes
            .lock()
            .unwrap()
            .push((key.to_string(), value.to_string()));
        self.seed(key, value);
        Ok(())
    }

    async fn get_string(&self, key: &str) -> BridgeResult<Option<String>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(BridgeError::OperationFailed("local store offline".to_string()));
        }
        Ok(self.value(key))
    }

    async fn set_bool(&self, key: &str, value: bool) -> BridgeResult<()> {
        self.set_string(key, &value.to_string()).await
    }

    async fn get_bool(&self, key: &str) -> BridgeResult<Option<bool>> {
        Ok(self.get_string(key).await?.map(|v| v == "true"))
    }

    async fn delete(&self, key: &str) -> BridgeResult<()> {
        self.values.lock().unwrap().remove(key);
        Ok(())
    }

    async fn list_keys(&self) -> BridgeResult<Vec<String>> {
        Ok(self.values.lock().unwrap().keys().cloned().collect())
    }

    async fn clear_all(&self) -> BridgeResult<()> {
        self.values.lock().unwrap().clear();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Remote store
// ---------------------------------------------------------------------------

type CallHook = Box<dyn Fn() + Send + Sync>;

/// Remote store answering from a fixed set of payloads.
#[derive(Default)]
pub struct ScriptedRemote {
    entities: Mutex<HashMap<String, EntityPayload>>,
    next_created: Mutex<Option<EntityPayload>>,
    fetches: Mutex<Vec<String>>,
    creates: AtomicUsize,
    fail_fetch: AtomicBool,
    gate: Mutex<Option<Arc<Semaphore>>>,
    on_call: Mutex<Option<CallHook>>,
}

impl ScriptedRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, payload: EntityPayload) {
        self.entities
            .lock()
            .unwrap()
            .insert(payload.id.to_string(), payload);
    }

    pub fn create_returns(&self, payload: EntityPayload) {
        *self.next_created.lock().unwrap() = Some(payload);
    }

    pub fn fail_fetches(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    /// Hold every fetch until [`release`](Self::release) is called.
    pub fn hold_fetches(&self) {
        *self.gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self) {
        if let Some(gate) = self.gate.lock().unwrap().take() {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    /// Run `hook` at the start of every fetch and create.
    pub fn on_call(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.on_call.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn fetches(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    fn run_hook(&self) {
        if let Some(hook) = self.on_call.lock().unwrap().as_ref() {
            hook();
        }
    }
}

#[async_trait]
impl RemoteStore for ScriptedRemote {
    async fn fetch(&self, id: &EntityId) -> core_session::Result<EntityPayload> {
        self.run_hook();
        self.fetches.lock().unwrap().push(id.to_string());

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let _permit = gate.acquire().await;
        }

        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(SessionError::RemoteFetch {
                id: id.to_string(),
                message: "status 503".to_string(),
            });
        }
        self.entities
            .lock()
            .unwrap()
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| SessionError::RemoteFetch {
                id: id.to_string(),
                message: "not found".to_string(),
            })
    }

    async fn create(&self, entity: &NewEntity) -> core_session::Result<EntityPayload> {
        self.run_hook();
        assert_eq!(entity, &NewEntity::default());
        self.creates.fetch_add(1, Ordering::SeqCst);

        let payload = self
            .next_created
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| SessionError::RemoteCreate {
                message: "status 500".to_string(),
            })?;
        self.insert(payload.clone());
        Ok(payload)
    }
}

// ---------------------------------------------------------------------------
// Activity observer
// ---------------------------------------------------------------------------

pub struct ManualActivityObserver {
    state: Mutex<ActivityState>,
    changes: broadcast::Sender<ActivityState>,
}

impl ManualActivityObserver {
    pub fn new(initial: ActivityState) -> Arc<Self> {
        let (changes, _) = broadcast::channel(16);
        Arc::new(Self {
            state: Mutex::new(initial),
            changes,
        })
    }

    pub fn set(&self, state: ActivityState) {
        let mut current = self.state.lock().unwrap();
        if *current != state {
            *current = state;
            let _ = self.changes.send(state);
        }
    }

    pub fn subscribers(&self) -> usize {
        self.changes.receiver_count()
    }
}

#[async_trait]
impl ActivityObserver for ManualActivityObserver {
    async fn get_state(&self) -> BridgeResult<ActivityState> {
        Ok(*self.state.lock().unwrap())
    }

    async fn subscribe_changes(&self) -> BridgeResult<Box<dyn ActivityChangeStream>> {
        Ok(Box::new(ActivityChanges(self.changes.subscribe())))
    }
}

struct ActivityChanges(broadcast::Receiver<ActivityState>);

#[async_trait]
impl ActivityChangeStream for ActivityChanges {
    async fn next(&mut self) -> Option<ActivityState> {
        loop {
            match self.0.recv().await {
                Ok(state) => return Some(state),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn payload(id: &str, folders: &[&str]) -> EntityPayload {
    EntityPayload {
        id: EntityId::from(id),
        name: None,
        folders: folders
            .iter()
            .map(|folder| FolderPayload {
                id: FolderId::from(*folder),
                title: folder.to_lowercase(),
                active: false,
                playlists: Vec::new(),
            })
            .collect(),
    }
}

pub struct Harness {
    pub sync: Arc<RecordingSyncStore>,
    pub local: Arc<MemoryLocalStore>,
    pub remote: Arc<ScriptedRemote>,
    pub observer: Arc<ManualActivityObserver>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            sync: RecordingSyncStore::new(),
            local: MemoryLocalStore::new(),
            remote: ScriptedRemote::new(),
            observer: ManualActivityObserver::new(ActivityState::Active),
        }
    }

    pub async fn config(&self, policy: DirtyWritePolicy) -> CoreConfig {
        CoreConfig::builder()
            .server_url(SERVER_URL)
            .local_store(self.local.clone())
            .sync_store(self.sync.clone())
            .activity_observer(self.observer.clone())
            .dirty_write_policy(policy)
            .load_timeout(Duration::from_secs(2))
            .build()
            .await
            .expect("valid config")
    }

    pub async fn session(&self) -> SessionCore {
        self.session_with(DirtyWritePolicy::WriteThrough).await
    }

    pub async fn session_with(&self, policy: DirtyWritePolicy) -> SessionCore {
        SessionCore::with_remote(self.config(policy).await, self.remote.clone())
            .expect("session")
    }

    pub async fn started(&self) -> SessionCore {
        let session = self.session().await;
        session.start().await.expect("bootstrap");
        session
    }
}

/// Poll `condition` until it holds, yielding to background tasks in between.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}

/// Give background listeners a chance to drain their queues.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
}

/// Events published so far, without waiting.
pub fn drain(stream: &mut EventStream) -> Vec<CoreEvent> {
    std::iter::from_fn(|| stream.try_recv().and_then(Result::ok)).collect()
}
