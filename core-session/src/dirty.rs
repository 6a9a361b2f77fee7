//! Dirty flag propagation between the entity and the sync store.
//!
//! Two loops run per process:
//!
//! - the local loop listens on the event bus. `ChildChanged` marks the entity
//!   dirty; `DirtyChanged` is mirrored to the sync store according to the
//!   [`DirtyWritePolicy`].
//! - the remote loop listens to sync store changes. Cross-device updates of
//!   the dirty key are applied with [`SessionEntity::set_dirty_silently`], so
//!   they are never written back.

use std::future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use bridge_traits::storage::{StorageChangeStream, SyncStore};
use core_runtime::config::DirtyWritePolicy;
use core_runtime::events::{CollectionEvent, CoreEvent, Receiver, RecvError, SessionEvent};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::entity::SessionEntity;
use crate::error::{Result, SessionError, StorageTier};

pub struct DirtyFlagCoordinator {
    sync_store: Arc<dyn SyncStore>,
    key: String,
    policy: DirtyWritePolicy,
    /// Last value known to be in the sync store, written or received.
    mirrored: Mutex<Option<bool>>,
}

impl DirtyFlagCoordinator {
    pub fn new(sync_store: Arc<dyn SyncStore>, key: impl Into<String>, policy: DirtyWritePolicy) -> Self {
        Self {
            sync_store,
            key: key.into(),
            policy,
            mirrored: Mutex::new(None),
        }
    }

    pub fn policy(&self) -> DirtyWritePolicy {
        self.policy
    }

    pub fn mirrored(&self) -> Option<bool> {
        *self.lock_mirrored()
    }

    /// Write `false` to the mirror, giving this activation a clean baseline.
    pub async fn reset_mirror(&self) {
        if let Err(e) = self.write_mirror(false).await {
            warn!(error = %e, "Failed to reset dirty flag mirror");
        }
    }

    /// Run the bus listener until cancelled or the entity is dropped.
    pub fn spawn_local(
        self: Arc<Self>,
        entity: Weak<SessionEntity>,
        mut events: Receiver<CoreEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut flush_at: Option<Instant> = None;

            loop {
                let flush = async move {
                    match flush_at {
                        Some(at) => sleep_until(at).await,
                        None => future::pending().await,
                    }
                };

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = flush => {
                        flush_at = None;
                        let Some(entity) = entity.upgrade() else { break };
                        if !self.flush(entity.is_dirty()).await {
                            flush_at = self.next_flush();
                        }
                    }
                    event = events.recv() => match event {
                        Ok(CoreEvent::Collection(CollectionEvent::ChildChanged { .. })) => {
                            let Some(entity) = entity.upgrade() else { break };
                            entity.set_dirty(true);
                        }
                        Ok(CoreEvent::Session(SessionEvent::DirtyChanged { dirty })) => {
                            match self.policy {
                                DirtyWritePolicy::WriteThrough => self.write_through(dirty).await,
                                DirtyWritePolicy::Coalesce { .. } => {
                                    flush_at = flush_at.or_else(|| self.next_flush());
                                }
                            }
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(missed)) => {
                            // A dropped ChildChanged cannot be recovered, assume one was missed
                            warn!(missed, "Dirty flag coordinator lagged, marking entity dirty");
                            let Some(entity) = entity.upgrade() else { break };
                            if !entity.set_dirty(true) && self.mirrored() != Some(true) {
                                match self.policy {
                                    DirtyWritePolicy::WriteThrough => self.write_through(true).await,
                                    DirtyWritePolicy::Coalesce { .. } => {
                                        flush_at = flush_at.or_else(|| self.next_flush());
                                    }
                                }
                            }
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
            debug!("Dirty flag local listener stopped");
        })
    }

    /// Run the sync store listener until cancelled or the stream closes.
    pub fn spawn_remote(
        self: Arc<Self>,
        entity: Weak<SessionEntity>,
        mut changes: Box<dyn StorageChangeStream>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let change = tokio::select! {
                    _ = cancel.cancelled() => break,
                    change = changes.next() => change,
                };
                let Some(change) = change else { break };

                if change.key != self.key || !change.is_cross_device() {
                    continue;
                }
                let dirty = match change.new_value {
                    Some(Value::Bool(dirty)) => dirty,
                    None | Some(Value::Null) => false,
                    Some(other) => {
                        warn!(value = %other, "Ignoring non-boolean dirty flag from sync store");
                        continue;
                    }
                };

                *self.lock_mirrored() = Some(dirty);
                let Some(entity) = entity.upgrade() else { break };
                entity.set_dirty_silently(dirty);
                debug!(dirty, "Dirty flag updated by another device");
            }
            debug!("Dirty flag remote listener stopped");
        })
    }

    async fn write_through(&self, dirty: bool) {
        if let Err(e) = self.write_mirror(dirty).await {
            warn!(error = %e, dirty, "Failed to mirror dirty flag");
        }
    }

    /// Write the current value if the mirror differs. Returns `false` when a
    /// write was needed and failed.
    async fn flush(&self, current: bool) -> bool {
        if self.mirrored() == Some(current) {
            debug!(dirty = current, "Mirror already up to date");
            return true;
        }
        match self.write_mirror(current).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, dirty = current, "Failed to flush dirty flag, retrying next window");
                false
            }
        }
    }

    fn next_flush(&self) -> Option<Instant> {
        match self.policy {
            DirtyWritePolicy::Coalesce { window } => Some(Instant::now() + window),
            DirtyWritePolicy::WriteThrough => None,
        }
    }

    async fn write_mirror(&self, dirty: bool) -> Result<()> {
        self.sync_store
            .set(&self.key, Value::Bool(dirty))
            .await
            .map_err(|e| SessionError::write(StorageTier::Sync, &self.key, e))?;
        *self.lock_mirrored() = Some(dirty);
        debug!(dirty, "Dirty flag mirrored");
        Ok(())
    }

    fn lock_mirrored(&self) -> MutexGuard<'_, Option<bool>> {
        self.mirrored.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
