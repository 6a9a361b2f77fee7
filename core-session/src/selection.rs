//! Device-local record of the last active folder and playlist.
//!
//! Records live in the local store under `{entityId}_activeFolderId` and
//! `{entityId}_activePlaylistId`. They are never written to the sync store or
//! the remote store.

use std::sync::{Arc, Weak};

use bridge_traits::storage::LocalStore;
use core_runtime::config::StorageKeys;
use core_runtime::events::{CollectionEvent, CoreEvent, Receiver, RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::entity::SessionEntity;
use crate::error::{Result, SessionError, StorageTier};
use crate::model::{EntityId, FolderId, PlaylistId};

/// Selection remembered for one entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionRecord {
    pub folder_id: Option<FolderId>,
    pub playlist_id: Option<PlaylistId>,
}

pub struct ActiveSelectionPersister {
    local_store: Arc<dyn LocalStore>,
    keys: StorageKeys,
}

impl ActiveSelectionPersister {
    pub fn new(local_store: Arc<dyn LocalStore>, keys: StorageKeys) -> Self {
        Self { local_store, keys }
    }

    pub async fn read(&self, entity_id: &EntityId) -> Result<SelectionRecord> {
        let folder_key = self.keys.active_folder_key(entity_id.as_str());
        let playlist_key = self.keys.active_playlist_key(entity_id.as_str());

        let folder_id = self
            .local_store
            .get_string(&folder_key)
            .await
            .map_err(|e| SessionError::read(StorageTier::Local, &folder_key, e))?;
        let playlist_id = self
            .local_store
            .get_string(&playlist_key)
            .await
            .map_err(|e| SessionError::read(StorageTier::Local, &playlist_key, e))?;

        Ok(SelectionRecord {
            folder_id: folder_id.filter(|id| !id.is_empty()).map(FolderId::from),
            playlist_id: playlist_id.filter(|id| !id.is_empty()).map(PlaylistId::from),
        })
    }

    pub async fn record_folder(&self, entity_id: &str, folder_id: &str) -> Result<()> {
        let key = self.keys.active_folder_key(entity_id);
        self.local_store
            .set_string(&key, folder_id)
            .await
            .map_err(|e| SessionError::write(StorageTier::Local, &key, e))
    }

    pub async fn record_playlist(&self, entity_id: &str, playlist_id: &str) -> Result<()> {
        let key = self.keys.active_playlist_key(entity_id);
        self.local_store
            .set_string(&key, playlist_id)
            .await
            .map_err(|e| SessionError::write(StorageTier::Local, &key, e))
    }

    /// Record every activation published on the bus until cancelled.
    pub fn spawn(
        self: Arc<Self>,
        entity: Weak<SessionEntity>,
        mut events: Receiver<CoreEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => event,
                };

                let result = match event {
                    Ok(CoreEvent::Collection(CollectionEvent::FolderActivated {
                        entity_id,
                        folder_id,
                    })) => {
                        debug!(%entity_id, %folder_id, "Recording active folder");
                        match self.record_folder(&entity_id, &folder_id).await {
                            Ok(()) => match entity.upgrade() {
                                Some(entity) => {
                                    self.record_folder_playlist(&entity, &entity_id, &folder_id)
                                        .await
                                }
                                None => break,
                            },
                            Err(e) => Err(e),
                        }
                    }
                    Ok(CoreEvent::Collection(CollectionEvent::PlaylistActivated {
                        entity_id,
                        playlist_id,
                        ..
                    })) => {
                        debug!(%entity_id, %playlist_id, "Recording active playlist");
                        self.record_playlist(&entity_id, &playlist_id).await
                    }
                    Ok(_) => Ok(()),
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Selection persister lagged, recording current selection");
                        match entity.upgrade() {
                            Some(entity) => self.record_current(&entity).await,
                            None => break,
                        }
                    }
                    Err(RecvError::Closed) => break,
                };

                if let Err(e) = result {
                    warn!(error = %e, "Failed to persist active selection");
                }
            }
        })
    }

    /// A folder switch keeps the folder's own active playlist, which
    /// publishes no playlist event of its own.
    async fn record_folder_playlist(
        &self,
        entity: &SessionEntity,
        entity_id: &str,
        folder_id: &str,
    ) -> Result<()> {
        let playlist_id = match entity.folders().await {
            Ok(folders) => folders
                .get(&FolderId::from(folder_id))
                .and_then(|folder| folder.active_playlist())
                .map(|playlist| playlist.id().clone()),
            Err(SessionError::NotLoaded) => None,
            Err(e) => return Err(e),
        };

        match playlist_id {
            Some(playlist_id) => self.record_playlist(entity_id, playlist_id.as_str()).await,
            None => Ok(()),
        }
    }

    async fn record_current(&self, entity: &SessionEntity) -> Result<()> {
        let Some(id) = entity.id() else {
            return Ok(());
        };
        if let Some(folder) = entity.active_folder().await {
            self.record_folder(id.as_str(), folder.id().as_str()).await?;
            if let Some(playlist) = folder.active_playlist() {
                self.record_playlist(id.as_str(), playlist.id().as_str()).await?;
            }
        }
        Ok(())
    }
}
