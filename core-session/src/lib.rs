//! # Session Core
//!
//! Keeps one session entity (a user profile with its folders and playlists)
//! consistent across three storage tiers:
//!
//! - the **sync store**: cross-device, eventually consistent, write-rate limited
//! - the **local store**: device-scoped, unlimited writes
//! - the **remote store**: authoritative, reached over HTTP
//!
//! ## Components
//!
//! - **Identity Resolver** (`identity`): finds the entity id at start-up, or
//!   creates a new entity remotely
//! - **Entity Hydrator** (`hydrator`): turns a payload into the live
//!   [`FolderCollection`] and sets `loaded`
//! - **Dirty Flag Coordinator** (`dirty`): marks the entity dirty on local
//!   mutations and mirrors the flag to the sync store without echo
//! - **Idle Reconciler** (`reconciler`): re-fetches a dirty entity when the
//!   device becomes active again
//! - **Active Selection Persister** (`selection`): remembers the last active
//!   folder and playlist per entity on this device
//!
//! Components never call each other directly for change propagation. They
//! publish and consume [`CoreEvent`](core_runtime::events::CoreEvent)s on the
//! shared [`EventBus`](core_runtime::events::EventBus).
//!
//! ## Usage
//!
//! ```ignore
//! let session = SessionCore::new(config)?;
//! session.start().await?;
//! session.wait_until_loaded().await?;
//!
//! let mut folders = session.entity().folders_mut().await?;
//! let id = folders.add_folder("Reading list");
//! folders.activate_folder(&id)?;
//! ```

pub mod dirty;
pub mod entity;
pub mod error;
pub mod folders;
pub mod hydrator;
pub mod identity;
pub mod model;
pub mod reconciler;
pub mod remote;
pub mod selection;
pub mod session;

pub use dirty::DirtyFlagCoordinator;
pub use entity::SessionEntity;
pub use error::{Result, SessionError, StorageTier};
pub use folders::{Folder, FolderCollection, Playlist};
pub use hydrator::EntityHydrator;
pub use identity::IdentityResolver;
pub use model::{EntityId, EntityPayload, FolderId, FolderPayload, NewEntity, PlaylistId, PlaylistPayload};
pub use reconciler::IdleReconciler;
pub use remote::{HttpRemoteStore, RemoteStore};
pub use selection::{ActiveSelectionPersister, SelectionRecord};
pub use session::SessionCore;

pub use core_runtime::config::{CoreConfig, CoreConfigBuilder, DirtyWritePolicy, ReconcilePolicy, StorageKeys};
pub use core_runtime::events::{CollectionEvent, CoreEvent, EventBus, EventStream, IdentitySource, SessionEvent};
