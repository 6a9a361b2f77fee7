//! Session facade.
//!
//! [`SessionCore`] owns the entity and wires the components together:
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use core_session::SessionCore;
//!
//! let config = CoreConfig::builder()
//!     .server_url("https://api.example.com/")
//!     .build()
//!     .await?;
//!
//! let session = SessionCore::new(config)?;
//! session.start().await?;
//! session.wait_until_loaded().await?;
//!
//! let folders = session.entity().folders().await?;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bridge_traits::activity::ActivityObserver;
use bridge_traits::storage::SyncStore;
use core_runtime::config::CoreConfig;
use core_runtime::events::{EventBus, EventStream, SessionEvent};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::dirty::DirtyFlagCoordinator;
use crate::entity::SessionEntity;
use crate::error::{Result, SessionError};
use crate::hydrator::EntityHydrator;
use crate::identity::IdentityResolver;
use crate::reconciler::IdleReconciler;
use crate::remote::{HttpRemoteStore, RemoteStore};
use crate::selection::ActiveSelectionPersister;

pub struct SessionCore {
    entity: Arc<SessionEntity>,
    bus: EventBus,
    sync_store: Arc<dyn SyncStore>,
    activity_observer: Option<Arc<dyn ActivityObserver>>,
    coordinator: Arc<DirtyFlagCoordinator>,
    persister: Arc<ActiveSelectionPersister>,
    resolver: IdentityResolver,
    reconciler: Arc<IdleReconciler>,
    load_timeout: Duration,
    started: AtomicBool,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SessionCore {
    /// Build a session that talks to the remote store through the
    /// configured HTTP client.
    pub fn new(config: CoreConfig) -> Result<Self> {
        let http = config.http_client.clone().ok_or_else(|| {
            core_runtime::Error::CapabilityMissing {
                capability: "HttpClient".to_string(),
                message: "Provide an HttpClient or enable the desktop-shims feature".to_string(),
            }
        })?;
        let remote = HttpRemoteStore::from_config(http, &config)?;
        Self::with_remote(config, Arc::new(remote))
    }

    /// Build a session on top of a custom remote store.
    pub fn with_remote(config: CoreConfig, remote: Arc<dyn RemoteStore>) -> Result<Self> {
        config.validate()?;

        let bus = EventBus::new(config.event_buffer_size);
        let entity = Arc::new(SessionEntity::new(bus.clone()));
        let keys = config.storage_keys.clone();

        let persister = Arc::new(ActiveSelectionPersister::new(
            Arc::clone(&config.local_store),
            keys.clone(),
        ));
        let hydrator = Arc::new(EntityHydrator::new(
            Arc::clone(&config.sync_store),
            Arc::clone(&config.local_store),
            Arc::clone(&persister),
            keys.clone(),
        ));
        let resolver = IdentityResolver::new(
            Arc::clone(&config.sync_store),
            Arc::clone(&config.local_store),
            Arc::clone(&remote),
            Arc::clone(&hydrator),
            keys.clone(),
        );
        let coordinator = Arc::new(DirtyFlagCoordinator::new(
            Arc::clone(&config.sync_store),
            keys.dirty,
            config.dirty_write_policy,
        ));
        let reconciler = Arc::new(IdleReconciler::new(
            Arc::downgrade(&entity),
            remote,
            hydrator,
            config.reconcile_policy,
        ));

        Ok(Self {
            entity,
            bus,
            sync_store: config.sync_store,
            activity_observer: config.activity_observer,
            coordinator,
            persister,
            resolver,
            reconciler,
            load_timeout: config.load_timeout,
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn entity(&self) -> &Arc<SessionEntity> {
        &self.entity
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn subscribe_events(&self) -> EventStream {
        EventStream::new(self.bus.subscribe())
    }

    pub fn reconciler(&self) -> &Arc<IdleReconciler> {
        &self.reconciler
    }

    /// Bootstrap the session. Runs once per instance.
    ///
    /// The dirty mirror is reset before anything else is written, listeners
    /// are attached, the reconciler is armed and the identity is resolved.
    /// On failure the entity stays unloaded and `BootstrapFailed` is published.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(SessionError::AlreadyBootstrapped);
        }

        self.coordinator.reset_mirror().await;

        let weak = Arc::downgrade(&self.entity);
        let mut tasks = Vec::new();

        tasks.push(Arc::clone(&self.coordinator).spawn_local(
            weak.clone(),
            self.bus.subscribe(),
            self.cancel.child_token(),
        ));
        match self.sync_store.subscribe_changes().await {
            Ok(changes) => tasks.push(Arc::clone(&self.coordinator).spawn_remote(
                weak.clone(),
                changes,
                self.cancel.child_token(),
            )),
            Err(e) => warn!(error = %e, "Sync store changes unavailable, cross-device dirty flag disabled"),
        }
        tasks.push(Arc::clone(&self.persister).spawn(
            weak.clone(),
            self.bus.subscribe(),
            self.cancel.child_token(),
        ));

        match &self.activity_observer {
            Some(observer) => tasks.push(
                Arc::clone(&self.reconciler).spawn(Arc::clone(observer), self.cancel.child_token()),
            ),
            None => info!("No activity observer configured, idle reconciliation not armed"),
        }

        self.lock_tasks().extend(tasks);

        match self.resolver.resolve(&self.entity).await {
            Ok(source) => {
                info!(%source, "Session bootstrapped");
                Ok(())
            }
            Err(e) => {
                error!(
                    error = %e,
                    entity_id = ?self.entity.id().map(|id| id.to_string()),
                    "Session bootstrap failed"
                );
                self.entity.emit(SessionEvent::BootstrapFailed {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Wait for the entity to be loaded, at most the configured load timeout.
    pub async fn wait_until_loaded(&self) -> Result<()> {
        tokio::time::timeout(self.load_timeout, self.entity.wait_until_loaded())
            .await
            .map_err(|_| SessionError::LoadTimeout(self.load_timeout))
    }

    /// Stop every listener started by [`start`](Self::start).
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks: Vec<_> = self.lock_tasks().drain(..).collect();
        for task in tasks {
            task.abort();
            let _ = task.await;
        }
        info!("Session shut down");
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SessionCore {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
