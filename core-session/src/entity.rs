//! The session entity: the single user profile this process works with.
//!
//! `loaded` and `dirty` are observable through `tokio::sync::watch`
//! receivers. Notifying updates are also published on the [`EventBus`] as
//! [`SessionEvent`]s, which is what the other components listen to.

use std::sync::OnceLock;

use core_runtime::events::{CoreEvent, EventBus, IdentitySource, SessionEvent};
use tokio::sync::{watch, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use crate::error::{Result, SessionError};
use crate::folders::{Folder, FolderCollection, Playlist};
use crate::model::{EntityId, EntityPayload};

pub struct SessionEntity {
    id: OnceLock<EntityId>,
    name: RwLock<Option<String>>,
    loaded: watch::Sender<bool>,
    dirty: watch::Sender<bool>,
    folders: RwLock<Option<FolderCollection>>,
    bus: EventBus,
}

impl SessionEntity {
    /// Unresolved entity: no id, not loaded, not dirty.
    pub fn new(bus: EventBus) -> Self {
        Self {
            id: OnceLock::new(),
            name: RwLock::new(None),
            loaded: watch::Sender::new(false),
            dirty: watch::Sender::new(false),
            folders: RwLock::new(None),
            bus,
        }
    }

    pub fn id(&self) -> Option<EntityId> {
        self.id.get().cloned()
    }

    /// Set the identifier. It can be set once; setting the same value again
    /// is accepted, a different value is an [`SessionError::IdentityConflict`].
    pub fn set_id(&self, id: EntityId) -> Result<()> {
        match self.id.get() {
            Some(current) if *current == id => Ok(()),
            Some(current) => Err(SessionError::IdentityConflict {
                current: current.to_string(),
                attempted: id.to_string(),
            }),
            None => self.id.set(id).map_err(|rejected| {
                // Lost a race with a concurrent setter
                let current = self.id.get().map(ToString::to_string).unwrap_or_default();
                SessionError::IdentityConflict {
                    current,
                    attempted: rejected.to_string(),
                }
            }),
        }
    }

    pub(crate) fn announce_identity(&self, id: &EntityId, source: IdentitySource) {
        self.emit(SessionEvent::IdentityResolved {
            entity_id: id.to_string(),
            source,
        });
    }

    pub async fn name(&self) -> Option<String> {
        self.name.read().await.clone()
    }

    pub fn is_loaded(&self) -> bool {
        *self.loaded.borrow()
    }

    pub(crate) fn set_loaded(&self, loaded: bool) {
        if replace_if_changed(&self.loaded, loaded) {
            debug!(loaded, "Load state changed");
            self.emit(SessionEvent::LoadStateChanged { loaded });
        }
    }

    pub fn subscribe_loaded(&self) -> watch::Receiver<bool> {
        self.loaded.subscribe()
    }

    /// Resolve once `loaded` is true. Returns immediately if it already is.
    pub async fn wait_until_loaded(&self) {
        let mut rx = self.loaded.subscribe();
        // The sender lives as long as `self`, so this cannot close
        let _ = rx.wait_for(|loaded| *loaded).await;
    }

    pub fn is_dirty(&self) -> bool {
        *self.dirty.borrow()
    }

    /// Update `dirty` and notify observers. Returns whether the value changed.
    pub fn set_dirty(&self, dirty: bool) -> bool {
        let changed = replace_if_changed(&self.dirty, dirty);
        if changed {
            debug!(dirty, "Dirty flag changed");
            self.emit(SessionEvent::DirtyChanged { dirty });
        }
        changed
    }

    /// Update `dirty` without notifying anyone.
    ///
    /// Used for values that arrive from the sync store mirror; notifying
    /// would write them straight back.
    pub fn set_dirty_silently(&self, dirty: bool) {
        self.dirty.send_if_modified(|current| {
            *current = dirty;
            false
        });
    }

    pub fn subscribe_dirty(&self) -> watch::Receiver<bool> {
        self.dirty.subscribe()
    }

    /// Read access to the folder graph, once the entity has been hydrated.
    pub async fn folders(&self) -> Result<RwLockReadGuard<'_, FolderCollection>> {
        RwLockReadGuard::try_map(self.folders.read().await, Option::as_ref)
            .map_err(|_| SessionError::NotLoaded)
    }

    /// Write access to the folder graph, once the entity has been hydrated.
    ///
    /// Mutations made here are replaced by the next hydration.
    pub async fn folders_mut(&self) -> Result<tokio::sync::RwLockMappedWriteGuard<'_, FolderCollection>> {
        RwLockWriteGuard::try_map(self.folders.write().await, Option::as_mut)
            .map_err(|_| SessionError::NotLoaded)
    }

    pub async fn active_folder(&self) -> Option<Folder> {
        self.folders.read().await.as_ref()?.active_folder().cloned()
    }

    pub async fn active_playlist(&self) -> Option<Playlist> {
        self.folders.read().await.as_ref()?.active_playlist().cloned()
    }

    /// Current state as a payload in the remote store's shape.
    pub async fn snapshot(&self) -> Result<EntityPayload> {
        let id = self.id().ok_or(SessionError::NotLoaded)?;
        let folders = self.folders().await?.to_payloads();
        Ok(EntityPayload {
            id,
            name: self.name().await,
            folders,
        })
    }

    pub(crate) async fn replace_graph(&self, name: Option<String>, folders: FolderCollection) {
        *self.name.write().await = name;
        *self.folders.write().await = Some(folders);
    }

    pub(crate) fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        let _ = self.bus.emit(CoreEvent::Session(event));
    }
}

impl std::fmt::Debug for SessionEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEntity")
            .field("id", &self.id.get())
            .field("loaded", &self.is_loaded())
            .field("dirty", &self.is_dirty())
            .finish_non_exhaustive()
    }
}

fn replace_if_changed(sender: &watch::Sender<bool>, value: bool) -> bool {
    sender.send_if_modified(|current| {
        if *current == value {
            false
        } else {
            *current = value;
            true
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FolderId, FolderPayload};
    use std::sync::Arc;
    use std::time::Duration;

    fn entity() -> (SessionEntity, core_runtime::events::Receiver<CoreEvent>) {
        let bus = EventBus::new(16);
        let rx = bus.subscribe();
        (SessionEntity::new(bus), rx)
    }

    #[test]
    fn test_new_entity_is_unresolved() {
        let (e, _rx) = entity();
        assert_eq!(e.id(), None);
        assert!(!e.is_loaded());
        assert!(!e.is_dirty());
    }

    #[test]
    fn test_id_is_set_once() {
        let (e, _rx) = entity();
        e.set_id(EntityId::from("U1")).unwrap();
        e.set_id(EntityId::from("U1")).unwrap();

        let err = e.set_id(EntityId::from("U2")).unwrap_err();
        assert!(matches!(err, SessionError::IdentityConflict { .. }));
        assert_eq!(e.id(), Some(EntityId::from("U1")));
    }

    #[test]
    fn test_dirty_notifies_only_on_change() {
        let (e, mut rx) = entity();

        assert!(e.set_dirty(true));
        assert!(!e.set_dirty(true));
        assert!(e.set_dirty(false));

        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(
            events,
            vec![
                CoreEvent::Session(SessionEvent::DirtyChanged { dirty: true }),
                CoreEvent::Session(SessionEvent::DirtyChanged { dirty: false }),
            ]
        );
    }

    #[test]
    fn test_silent_dirty_update_notifies_nobody() {
        let (e, mut rx) = entity();
        let watcher = e.subscribe_dirty();

        e.set_dirty_silently(true);

        assert!(e.is_dirty());
        assert!(rx.try_recv().is_err());
        assert!(!watcher.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_wait_until_loaded_returns_after_hydration() {
        let (e, _rx) = entity();
        let e = Arc::new(e);

        let waiter = tokio::spawn({
            let e = Arc::clone(&e);
            async move { e.wait_until_loaded().await }
        });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        e.set_loaded(true);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();

        // Late subscribers see the current value
        e.wait_until_loaded().await;
    }

    #[tokio::test]
    async fn test_folders_require_hydration() {
        let (e, _rx) = entity();
        assert!(matches!(e.folders().await, Err(SessionError::NotLoaded)));
        assert!(matches!(e.snapshot().await, Err(SessionError::NotLoaded)));

        e.set_id(EntityId::from("U1")).unwrap();
        let folders = FolderCollection::from_payload(
            EntityId::from("U1"),
            vec![FolderPayload {
                id: FolderId::from("F1"),
                title: "Work".to_string(),
                active: true,
                playlists: Vec::new(),
            }],
            e.event_bus().clone(),
        );
        e.replace_graph(Some("Ada".to_string()), folders).await;

        assert_eq!(e.folders().await.unwrap().len(), 1);
        assert_eq!(e.active_folder().await.unwrap().id().as_str(), "F1");

        let snapshot = e.snapshot().await.unwrap();
        assert_eq!(snapshot.name.as_deref(), Some("Ada"));
        assert_eq!(snapshot.folders.len(), 1);

        e.folders_mut().await.unwrap().add_folder("Home");
        assert_eq!(e.folders().await.unwrap().len(), 2);
    }
}
