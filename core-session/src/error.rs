use std::fmt;
use std::time::Duration;

use bridge_traits::BridgeError;
use thiserror::Error;

/// Storage tier an operation touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageTier {
    Sync,
    Local,
    Remote,
}

impl fmt::Display for StorageTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageTier::Sync => write!(f, "sync"),
            StorageTier::Local => write!(f, "local"),
            StorageTier::Remote => write!(f, "remote"),
        }
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Failed to read '{key}' from {tier} store: {source}")]
    StorageRead {
        tier: StorageTier,
        key: String,
        #[source]
        source: BridgeError,
    },

    #[error("Failed to write '{key}' to {tier} store: {source}")]
    StorageWrite {
        tier: StorageTier,
        key: String,
        #[source]
        source: BridgeError,
    },

    #[error("Remote fetch for entity {id} failed: {message}")]
    RemoteFetch { id: String, message: String },

    #[error("Remote create failed: {message}")]
    RemoteCreate { message: String },

    #[error("Entity identifier already set to {current}, refusing {attempted}")]
    IdentityConflict { current: String, attempted: String },

    #[error("Session already bootstrapped")]
    AlreadyBootstrapped,

    #[error("Session entity is not loaded")]
    NotLoaded,

    #[error("Session did not finish loading within {0:?}")]
    LoadTimeout(Duration),

    #[error("Folder {0} not found")]
    FolderNotFound(String),

    #[error("Playlist {playlist_id} not found in folder {folder_id}")]
    PlaylistNotFound {
        folder_id: String,
        playlist_id: String,
    },

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Runtime(#[from] core_runtime::Error),
}

impl SessionError {
    /// Storage tier involved in the failure, when there is one.
    pub fn tier(&self) -> Option<StorageTier> {
        match self {
            SessionError::StorageRead { tier, .. } | SessionError::StorageWrite { tier, .. } => {
                Some(*tier)
            }
            SessionError::RemoteFetch { .. } | SessionError::RemoteCreate { .. } => {
                Some(StorageTier::Remote)
            }
            _ => None,
        }
    }

    pub(crate) fn read(tier: StorageTier, key: &str, source: BridgeError) -> Self {
        SessionError::StorageRead {
            tier,
            key: key.to_string(),
            source,
        }
    }

    pub(crate) fn write(tier: StorageTier, key: &str, source: BridgeError) -> Self {
        SessionError::StorageWrite {
            tier,
            key: key.to_string(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
