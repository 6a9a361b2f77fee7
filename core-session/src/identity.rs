//! Identity bootstrap.
//!
//! The identifier is looked up in order of cost and consistency:
//!
//! 1. sync store (`UserId`): fetch, hydrate without writing the id back
//! 2. local fallback cache (`userId`): fetch, hydrate and write the id to the
//!    sync store
//! 3. nothing found: create a new entity remotely, hydrate and write its id
//!
//! Every step awaits the previous one and the identifier is set on the entity
//! before any remote call. A failed store read stops the bootstrap instead of
//! falling through to `create`, so an unreadable tier never spawns a second
//! remote entity.

use std::sync::Arc;

use bridge_traits::storage::{LocalStore, SyncStore};
use core_runtime::config::StorageKeys;
use core_runtime::events::IdentitySource;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::entity::SessionEntity;
use crate::error::{Result, SessionError, StorageTier};
use crate::hydrator::EntityHydrator;
use crate::model::{EntityId, NewEntity};
use crate::remote::RemoteStore;

pub struct IdentityResolver {
    sync_store: Arc<dyn SyncStore>,
    local_store: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
    hydrator: Arc<EntityHydrator>,
    keys: StorageKeys,
}

impl IdentityResolver {
    pub fn new(
        sync_store: Arc<dyn SyncStore>,
        local_store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        hydrator: Arc<EntityHydrator>,
        keys: StorageKeys,
    ) -> Self {
        Self {
            sync_store,
            local_store,
            remote,
            hydrator,
            keys,
        }
    }

    /// Resolve the identifier, load the entity and report where the id came from.
    #[instrument(skip_all)]
    pub async fn resolve(&self, entity: &SessionEntity) -> Result<IdentitySource> {
        let (source, payload, persist_id) = if let Some(id) = self.read_sync_id().await? {
            self.adopt(entity, &id, IdentitySource::SyncStore)?;
            (IdentitySource::SyncStore, self.remote.fetch(&id).await?, false)
        } else if let Some(id) = self.read_fallback_id().await? {
            self.adopt(entity, &id, IdentitySource::LocalCache)?;
            (IdentitySource::LocalCache, self.remote.fetch(&id).await?, true)
        } else {
            debug!("No identifier stored, creating entity");
            let payload = self.remote.create(&NewEntity::default()).await?;
            self.adopt(entity, &payload.id, IdentitySource::Created)?;
            (IdentitySource::Created, payload, true)
        };

        self.hydrator.hydrate(entity, payload, persist_id).await?;
        Ok(source)
    }

    fn adopt(&self, entity: &SessionEntity, id: &EntityId, source: IdentitySource) -> Result<()> {
        entity.set_id(id.clone())?;
        info!(entity_id = %id, %source, "Identity resolved");
        entity.announce_identity(id, source);
        Ok(())
    }

    async fn read_sync_id(&self) -> Result<Option<EntityId>> {
        let key = &self.keys.sync_id;
        let value = self
            .sync_store
            .get(key)
            .await
            .map_err(|e| SessionError::read(StorageTier::Sync, key, e))?;

        match value {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) if s.is_empty() => Ok(None),
            Some(Value::String(s)) => Ok(Some(EntityId::new(s))),
            Some(Value::Number(n)) => Ok(Some(EntityId::new(n.to_string()))),
            Some(other) => Err(SessionError::InvalidPayload(format!(
                "sync store key '{}' holds {}, expected an identifier",
                key, other
            ))),
        }
    }

    async fn read_fallback_id(&self) -> Result<Option<EntityId>> {
        let key = &self.keys.fallback_id;
        let value = self
            .local_store
            .get_string(key)
            .await
            .map_err(|e| SessionError::read(StorageTier::Local, key, e))?;

        Ok(value.filter(|id| !id.is_empty()).map(EntityId::new))
    }
}
