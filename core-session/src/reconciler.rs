//! Idle-triggered reconciliation.
//!
//! When the device comes back from idle or locked and the entity is dirty, the
//! entity is unloaded, fetched again from the remote store and re-hydrated.
//! At most one reconciliation runs at a time; resume transitions that arrive
//! while one is in flight are dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use bridge_traits::activity::{ActivityObserver, ActivityState};
use core_runtime::config::ReconcilePolicy;
use core_runtime::events::SessionEvent;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::entity::SessionEntity;
use crate::error::Result;
use crate::hydrator::EntityHydrator;
use crate::model::EntityId;
use crate::remote::RemoteStore;

pub struct IdleReconciler {
    entity: Weak<SessionEntity>,
    remote: Arc<dyn RemoteStore>,
    hydrator: Arc<EntityHydrator>,
    policy: ReconcilePolicy,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag when the reconciliation task ends, including
/// when it is aborted.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl IdleReconciler {
    pub fn new(
        entity: Weak<SessionEntity>,
        remote: Arc<dyn RemoteStore>,
        hydrator: Arc<EntityHydrator>,
        policy: ReconcilePolicy,
    ) -> Self {
        Self {
            entity,
            remote,
            hydrator,
            policy,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn is_reconciling(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Follow the observer's activity changes until cancelled.
    pub fn spawn(
        self: Arc<Self>,
        observer: Arc<dyn ActivityObserver>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            // Subscribe before reading the state so no transition falls in between
            let mut changes = match observer.subscribe_changes().await {
                Ok(changes) => changes,
                Err(e) => {
                    error!(error = %e, "Cannot observe device activity, reconciliation disabled");
                    return;
                }
            };
            let mut previous = observer.get_state().await.unwrap_or_else(|e| {
                warn!(error = %e, "Activity state unavailable, assuming active");
                ActivityState::Active
            });

            loop {
                let state = tokio::select! {
                    _ = cancel.cancelled() => break,
                    state = changes.next() => state,
                };
                let Some(state) = state else { break };

                self.handle_transition(previous, state);
                previous = state;
            }
            debug!("Activity listener stopped");
        })
    }

    /// Start a reconciliation if `previous -> current` is a resume and the
    /// entity is dirty. Returns whether one was started.
    pub fn handle_transition(self: &Arc<Self>, previous: ActivityState, current: ActivityState) -> bool {
        if !current.is_resume_from(previous) {
            return false;
        }
        let Some(entity) = self.entity.upgrade() else {
            return false;
        };
        if !entity.is_dirty() {
            debug!(%previous, "Resumed with clean entity, nothing to reconcile");
            return false;
        }
        let Some(id) = entity.id() else {
            debug!("Resumed before identity was resolved");
            return false;
        };
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(entity_id = %id, "Reconciliation already in flight");
            return false;
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = InFlightGuard(&this.in_flight);
            this.reconcile(&entity, id).await;
        });
        true
    }

    #[instrument(skip(self, entity), fields(entity_id = %id))]
    async fn reconcile(&self, entity: &SessionEntity, id: EntityId) {
        let started = Instant::now();
        entity.set_loaded(false);
        entity.emit(SessionEvent::ReconciliationStarted {
            entity_id: id.to_string(),
        });
        info!("Reconciling entity with remote store");

        match self.refetch(entity, &id).await {
            Ok(()) => {
                if self.policy.clear_dirty_on_success {
                    entity.set_dirty(false);
                }
                let duration_ms = started.elapsed().as_millis() as u64;
                info!(duration_ms, "Reconciliation completed");
                entity.emit(SessionEvent::ReconciliationCompleted {
                    entity_id: id.to_string(),
                    duration_ms,
                });
            }
            Err(e) => {
                error!(error = %e, "Reconciliation failed, entity stays unloaded");
                entity.emit(SessionEvent::ReconciliationFailed {
                    entity_id: id.to_string(),
                    message: e.to_string(),
                });
            }
        }
    }

    async fn refetch(&self, entity: &SessionEntity, id: &EntityId) -> Result<()> {
        let payload = self.remote.fetch(id).await?;
        self.hydrator.hydrate(entity, payload, false).await
    }
}
