use std::sync::Arc;

use bridge_traits::storage::{LocalStore, SyncStore};
use core_runtime::config::StorageKeys;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::entity::SessionEntity;
use crate::error::{Result, SessionError, StorageTier};
use crate::folders::FolderCollection;
use crate::model::{EntityId, EntityPayload};
use crate::selection::{ActiveSelectionPersister, SelectionRecord};

/// Turns a fetched or created payload into the live entity graph.
pub struct EntityHydrator {
    sync_store: Arc<dyn SyncStore>,
    local_store: Arc<dyn LocalStore>,
    selection: Arc<ActiveSelectionPersister>,
    keys: StorageKeys,
}

impl EntityHydrator {
    pub fn new(
        sync_store: Arc<dyn SyncStore>,
        local_store: Arc<dyn LocalStore>,
        selection: Arc<ActiveSelectionPersister>,
        keys: StorageKeys,
    ) -> Self {
        Self {
            sync_store,
            local_store,
            selection,
            keys,
        }
    }

    /// Replace the entity graph with `payload` and mark the entity loaded.
    ///
    /// The remembered selection is restored without publishing activation
    /// events. With `persist_id` the identifier is written to the sync store.
    /// Store write failures are logged; the entity still loads.
    #[instrument(skip(self, entity, payload), fields(entity_id = %payload.id))]
    pub async fn hydrate(&self, entity: &SessionEntity, payload: EntityPayload, persist_id: bool) -> Result<()> {
        let EntityPayload { id, name, folders } = payload;
        entity.set_id(id.clone())?;

        let mut collection = FolderCollection::from_payload(id.clone(), folders, entity.event_bus().clone());

        let record = match self.selection.read(&id).await {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "Could not read active selection, using first folder");
                SelectionRecord::default()
            }
        };
        collection.restore_selection(record.folder_id.as_ref(), record.playlist_id.as_ref());
        debug!(
            folders = collection.len(),
            active_folder = ?collection.active_folder().map(|f| f.id().to_string()),
            "Selection restored"
        );

        entity.replace_graph(name, collection).await;

        if persist_id {
            if let Err(e) = self.persist_sync_id(&id).await {
                warn!(error = %e, "Failed to persist identifier to sync store");
            }
        }
        if let Err(e) = self.refresh_fallback_id(&id).await {
            warn!(error = %e, "Failed to refresh local identifier cache");
        }

        entity.set_loaded(true);
        info!("Entity hydrated");
        Ok(())
    }

    async fn persist_sync_id(&self, id: &EntityId) -> Result<()> {
        self.sync_store
            .set(&self.keys.sync_id, Value::String(id.to_string()))
            .await
            .map_err(|e| SessionError::write(StorageTier::Sync, &self.keys.sync_id, e))
    }

    async fn refresh_fallback_id(&self, id: &EntityId) -> Result<()> {
        self.local_store
            .set_string(&self.keys.fallback_id, id.as_str())
            .await
            .map_err(|e| SessionError::write(StorageTier::Local, &self.keys.fallback_id, e))
    }
}
