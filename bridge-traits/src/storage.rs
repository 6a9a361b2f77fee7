//! Storage Tier Abstractions
//!
//! Provides platform-agnostic traits for the two client-side storage tiers the
//! session core reads and writes:
//!
//! - [`LocalStore`]: device-scoped key-value storage with no write limits
//! - [`SyncStore`]: cross-device, eventually-consistent key-value storage with
//!   a write-rate quota and change notifications
//!
//! The remote authoritative store is not a host capability and lives with the
//! session core.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Device-local key-value storage trait
///
/// Abstracts platform-specific device storage:
/// - Desktop: SQLite file in the application data directory
/// - Browser extensions: `localStorage`
/// - iOS/Android: UserDefaults / SharedPreferences
///
/// Values written here never leave the device. Writes are treated as
/// unlimited, so callers do not need to minimise them.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::LocalStore;
///
/// async fn remember_folder(store: &dyn LocalStore, entity_id: &str, folder_id: &str) -> Result<()> {
///     store.set_string(&format!("{entity_id}_activeFolderId"), folder_id).await
/// }
/// ```
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Store a string value, overwriting any previous value
    async fn set_string(&self, key: &str, value: &str) -> Result<()>;

    /// Retrieve a string value
    ///
    /// Returns `Ok(None)` if the key doesn't exist.
    async fn get_string(&self, key: &str) -> Result<Option<String>>;

    /// Store a boolean value
    async fn set_bool(&self, key: &str, value: bool) -> Result<()>;

    /// Retrieve a boolean value
    async fn get_bool(&self, key: &str) -> Result<Option<bool>>;

    /// Delete a value
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check if a key exists
    async fn has_key(&self, key: &str) -> Result<bool> {
        Ok(self.get_string(key).await?.is_some())
    }

    /// List all keys
    async fn list_keys(&self) -> Result<Vec<String>>;

    /// Clear all values
    async fn clear_all(&self) -> Result<()>;
}

/// Where a storage change originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOrigin {
    /// The write was performed by this process.
    ThisDevice,
    /// The write arrived through cross-device synchronization.
    CrossDevice,
}

/// A single key change reported by a [`SyncStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageChange {
    pub key: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub origin: ChangeOrigin,
}

impl StorageChange {
    pub fn new(
        key: impl Into<String>,
        old_value: Option<Value>,
        new_value: Option<Value>,
        origin: ChangeOrigin,
    ) -> Self {
        Self {
            key: key.into(),
            old_value,
            new_value,
            origin,
        }
    }

    /// True when the change was delivered by cross-device synchronization.
    pub fn is_cross_device(&self) -> bool {
        self.origin == ChangeOrigin::CrossDevice
    }
}

/// Write-rate limits advertised by a [`SyncStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteQuota {
    pub max_writes_per_minute: u32,
    pub max_writes_per_hour: u32,
}

/// Cross-device synchronized key-value storage trait
///
/// Abstracts storage that follows the user across devices:
/// - Browser extensions: `chrome.storage.sync`
/// - iOS: NSUbiquitousKeyValueStore
/// - Desktop: a database file on a synchronized volume
///
/// # Quota
///
/// Implementations enforce a write-rate quota. A write that would exceed it
/// fails with [`BridgeError::QuotaExceeded`](crate::error::BridgeError::QuotaExceeded)
/// and leaves the stored value unchanged. Callers should write as little as
/// possible and never write a value they know is already stored.
///
/// # Change notifications
///
/// Every subscriber receives a [`StorageChange`] for each key that changes,
/// in the order the store applied them, tagged with the origin of the write.
#[async_trait]
pub trait SyncStore: Send + Sync {
    /// Retrieve a value, `Ok(None)` when absent
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Store a value (whole-value overwrite, last write wins)
    async fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Remove a value
    async fn remove(&self, key: &str) -> Result<()>;

    /// Subscribe to change notifications
    async fn subscribe_changes(&self) -> Result<Box<dyn StorageChangeStream>>;

    /// Write limits enforced by this store, if known
    fn write_quota(&self) -> Option<WriteQuota> {
        None
    }
}

/// Stream of sync storage changes
#[async_trait]
pub trait StorageChangeStream: Send {
    /// Get the next change
    ///
    /// Returns `None` when the stream is closed.
    async fn next(&mut self) -> Option<StorageChange>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_storage_change_origin() {
        let change = StorageChange::new("dirty", Some(json!(false)), Some(json!(true)), ChangeOrigin::CrossDevice);

        assert!(change.is_cross_device());
        assert_eq!(change.key, "dirty");
        assert_eq!(change.new_value, Some(json!(true)));
    }

    #[test]
    fn test_storage_change_serialization() {
        let change = StorageChange::new("UserId", None, Some(json!("U1")), ChangeOrigin::ThisDevice);

        let json = serde_json::to_string(&change).unwrap();
        assert!(json.contains("this_device"));

        let parsed: StorageChange = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, change);
    }
}
