//! # Event Bus System
//!
//! Provides the observer interface of the session core using `tokio::sync::broadcast`.
//! Components never call each other to report state changes; they publish typed
//! events and interested components subscribe.
//!
//! ## Overview
//!
//! The event bus system consists of:
//! - **Event Types**: Strongly-typed enum hierarchies for the session and its collections
//! - **EventBus**: Central broadcast channel for publishing events
//! - **EventStream**: Wrapper for consuming events with filtering
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐  ChildChanged    ┌───────────┐  ChildChanged / DirtyChanged  ┌──────────────────┐
//! │ Folder collection├─────────────────>│           ├──────────────────────────────>│ Dirty coordinator│
//! └──────────────────┘  FolderActivated │ EventBus  │                               └──────────────────┘
//!                                       │ (broadcast│  FolderActivated              ┌──────────────────┐
//! ┌──────────────────┐  DirtyChanged    │  channel) ├──────────────────────────────>│ Selection persist│
//! │ Session entity   ├─────────────────>│           │                               └──────────────────┘
//! └──────────────────┘  LoadStateChanged└───────────┘
//! ```
//!
//! Each subscriber receives events in emission order.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, SessionEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Session(SessionEvent::DirtyChanged { dirty: true }))
//!     .ok();
//!
//! let event = stream.recv().await.unwrap();
//! assert!(matches!(event, CoreEvent::Session(SessionEvent::DirtyChanged { dirty: true })));
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: Subscriber was too slow and missed `n` events.
//!   This is non-fatal; subscribers that mirror state should resynchronise
//!   from the current value instead of relying on the missed events.
//! - **`RecvError::Closed`**: All senders have been dropped. This indicates shutdown.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum published through the event bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Session entity lifecycle events
    Session(SessionEvent),
    /// Folder / playlist collection events
    Collection(CollectionEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Session(e) => e.description(),
            CoreEvent::Collection(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Session(SessionEvent::BootstrapFailed { .. })
            | CoreEvent::Session(SessionEvent::ReconciliationFailed { .. }) => EventSeverity::Error,
            CoreEvent::Session(SessionEvent::IdentityResolved { .. })
            | CoreEvent::Session(SessionEvent::ReconciliationCompleted { .. }) => {
                EventSeverity::Info
            }
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

/// Which storage tier supplied the session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    /// Read from the cross-device sync store
    SyncStore,
    /// Read from the device-local fallback cache
    LocalCache,
    /// Assigned by the remote store when a new entity was created
    Created,
}

impl fmt::Display for IdentitySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentitySource::SyncStore => write!(f, "sync_store"),
            IdentitySource::LocalCache => write!(f, "local_cache"),
            IdentitySource::Created => write!(f, "created"),
        }
    }
}

// ============================================================================
// Session Events
// ============================================================================

/// Events raised by the session entity and its bootstrap / reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SessionEvent {
    /// The entity identifier was set.
    IdentityResolved {
        entity_id: String,
        source: IdentitySource,
    },
    /// The `loaded` flag changed.
    LoadStateChanged { loaded: bool },
    /// The `dirty` flag changed through a notifying update.
    ///
    /// Silent updates (cross-device mirror) do not produce this event.
    DirtyChanged { dirty: bool },
    /// Bootstrap stopped before the entity was loaded.
    BootstrapFailed { message: String },
    /// A reconciliation fetch was issued.
    ReconciliationStarted { entity_id: String },
    /// A reconciliation fetch and re-hydration succeeded.
    ReconciliationCompleted {
        entity_id: String,
        duration_ms: u64,
    },
    /// A reconciliation fetch failed; the entity stays unloaded.
    ReconciliationFailed { entity_id: String, message: String },
}

impl SessionEvent {
    fn description(&self) -> &str {
        match self {
            SessionEvent::IdentityResolved { .. } => "Session identity resolved",
            SessionEvent::LoadStateChanged { .. } => "Session load state changed",
            SessionEvent::DirtyChanged { .. } => "Session dirty flag changed",
            SessionEvent::BootstrapFailed { .. } => "Session bootstrap failed",
            SessionEvent::ReconciliationStarted { .. } => "Reconciliation started",
            SessionEvent::ReconciliationCompleted { .. } => "Reconciliation completed",
            SessionEvent::ReconciliationFailed { .. } => "Reconciliation failed",
        }
    }
}

// ============================================================================
// Collection Events
// ============================================================================

/// Events raised by the folder collection owned by the session entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CollectionEvent {
    /// A folder or playlist was added, renamed or removed.
    ChildChanged {
        entity_id: String,
        folder_id: String,
        playlist_id: Option<String>,
    },
    /// A folder became active.
    FolderActivated { entity_id: String, folder_id: String },
    /// A playlist in the active folder became active.
    PlaylistActivated {
        entity_id: String,
        folder_id: String,
        playlist_id: String,
    },
}

impl CollectionEvent {
    fn description(&self) -> &str {
        match self {
            CollectionEvent::ChildChanged { .. } => "Collection child changed",
            CollectionEvent::FolderActivated { .. } => "Folder activated",
            CollectionEvent::PlaylistActivated { .. } => "Playlist activated",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to core events.
///
/// Cloning the bus is cheap; all clones share the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// When a subscriber falls behind by more than `capacity` events it
    /// receives `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an
    /// error if there are no active subscribers.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with optional filtering.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let event_bus = EventBus::new(100);
/// let collection_only = EventStream::new(event_bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Collection(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` will be returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn matches(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive a matching event without blocking.
    ///
    /// Returns `None` if no events are currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.matches(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}
