//! # Core Configuration Module
//!
//! Provides configuration management for the session core.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! instance that holds every bridge and policy the session core needs. It
//! enforces fail-fast validation so a missing storage tier is reported before
//! bootstrap starts rather than halfway through it.
//!
//! ## Required Dependencies
//!
//! - `LocalStore` - Device-local fallback cache and selection records
//! - `SyncStore` - Cross-device identifier and dirty-flag mirror
//!
//! ## Optional Dependencies
//!
//! - `HttpClient` - Reaches the remote store (desktop default: reqwest)
//! - `ActivityObserver` - Without one, idle-triggered reconciliation is not armed
//!
//! When the `desktop-shims` feature is enabled, SQLite-backed defaults for
//! both stores are created under `data_dir` if not provided.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{CoreConfig, DirtyWritePolicy};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let config = CoreConfig::builder()
//!     .server_url("https://api.example.com/")
//!     .local_store(Arc::new(MyLocalStore))
//!     .sync_store(Arc::new(MySyncStore))
//!     .activity_observer(Arc::new(MyActivityObserver))
//!     .dirty_write_policy(DirtyWritePolicy::Coalesce { window: Duration::from_secs(2) })
//!     .build()
//!     .await?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::{ActivityObserver, HttpClient, LocalStore, RetryPolicy, SyncStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::events::DEFAULT_EVENT_BUFFER_SIZE;

/// Default bound for [`CoreConfig::load_timeout`].
pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(5);

/// Names of the keys the core reads and writes in each storage tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageKeys {
    /// Sync store key holding the entity identifier
    pub sync_id: String,
    /// Sync store key holding the dirty-flag mirror
    pub dirty: String,
    /// Local store key holding the fallback identifier cache
    pub fallback_id: String,
    /// Suffix of the per-entity active folder record
    pub active_folder_field: String,
    /// Suffix of the per-entity active playlist record
    pub active_playlist_field: String,
}

impl Default for StorageKeys {
    fn default() -> Self {
        Self {
            sync_id: "UserId".to_string(),
            dirty: "dirty".to_string(),
            fallback_id: "userId".to_string(),
            active_folder_field: "activeFolderId".to_string(),
            active_playlist_field: "activePlaylistId".to_string(),
        }
    }
}

impl StorageKeys {
    /// Local store key of the active folder record for `entity_id`.
    pub fn active_folder_key(&self, entity_id: &str) -> String {
        format!("{}_{}", entity_id, self.active_folder_field)
    }

    /// Local store key of the active playlist record for `entity_id`.
    pub fn active_playlist_key(&self, entity_id: &str) -> String {
        format!("{}_{}", entity_id, self.active_playlist_field)
    }

    fn validate(&self) -> Result<()> {
        let names = [
            ("sync_id", &self.sync_id),
            ("dirty", &self.dirty),
            ("fallback_id", &self.fallback_id),
            ("active_folder_field", &self.active_folder_field),
            ("active_playlist_field", &self.active_playlist_field),
        ];
        if let Some((name, _)) = names.iter().find(|(_, value)| value.is_empty()) {
            return Err(Error::Config(format!("Storage key '{}' cannot be empty", name)));
        }
        if self.sync_id == self.dirty {
            return Err(Error::Config(
                "Sync store keys for the identifier and the dirty flag must differ".to_string(),
            ));
        }
        if self.active_folder_field == self.active_playlist_field {
            return Err(Error::Config(
                "Active folder and active playlist records must use different keys".to_string(),
            ));
        }
        Ok(())
    }
}

/// How local dirty-flag transitions reach the sync store mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DirtyWritePolicy {
    /// One mirror write per local transition edge.
    #[default]
    WriteThrough,
    /// At most one mirror write per window, carrying the latest value, and
    /// only when it differs from the last value written.
    Coalesce { window: Duration },
}

/// What a successful reconciliation does to the dirty flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilePolicy {
    /// Clear `dirty` (notifying, so the mirror is written) after a
    /// successful fetch and re-hydration.
    ///
    /// The mirrored `false` also clears the flag on every other device,
    /// including ones that have not reconciled yet. Turn this off to keep
    /// the flag raised so that each device reconciles on its own return
    /// from idle.
    pub clear_dirty_on_success: bool,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            clear_dirty_on_success: true,
        }
    }
}

/// Core configuration for the session core.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Base URL of the remote store, always ending in `/`
    pub server_url: Url,

    /// Directory for the desktop default stores
    pub data_dir: Option<PathBuf>,

    /// Device-local store (required)
    pub local_store: Arc<dyn LocalStore>,

    /// Cross-device store (required)
    pub sync_store: Arc<dyn SyncStore>,

    /// HTTP client for the remote store (optional with desktop default)
    pub http_client: Option<Arc<dyn HttpClient>>,

    /// Device activity observer (optional)
    pub activity_observer: Option<Arc<dyn ActivityObserver>>,

    pub storage_keys: StorageKeys,

    pub dirty_write_policy: DirtyWritePolicy,

    pub reconcile_policy: ReconcilePolicy,

    /// Retry policy for remote fetch / create
    pub remote_retry: RetryPolicy,

    /// Capacity of the event bus channel
    pub event_buffer_size: usize,

    /// Upper bound for `SessionCore::wait_until_loaded`
    pub load_timeout: Duration,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("server_url", &self.server_url.as_str())
            .field("data_dir", &self.data_dir)
            .field("local_store", &"LocalStore { ... }")
            .field("sync_store", &"SyncStore { ... }")
            .field(
                "http_client",
                &self.http_client.as_ref().map(|_| "HttpClient { ... }"),
            )
            .field(
                "activity_observer",
                &self
                    .activity_observer
                    .as_ref()
                    .map(|_| "ActivityObserver { ... }"),
            )
            .field("storage_keys", &self.storage_keys)
            .field("dirty_write_policy", &self.dirty_write_policy)
            .field("reconcile_policy", &self.reconcile_policy)
            .field("remote_retry", &self.remote_retry)
            .field("event_buffer_size", &self.event_buffer_size)
            .field("load_timeout", &self.load_timeout)
            .finish()
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        self.storage_keys.validate()?;

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        if self.load_timeout.is_zero() {
            return Err(Error::Config(
                "Load timeout must be greater than 0".to_string(),
            ));
        }

        if self.remote_retry.max_attempts == 0 {
            return Err(Error::Config(
                "Remote retry policy must allow at least one attempt".to_string(),
            ));
        }

        if let DirtyWritePolicy::Coalesce { window } = self.dirty_write_policy {
            if window.is_zero() {
                return Err(Error::Config(
                    "Coalescing window must be greater than 0. \
                     Use DirtyWritePolicy::WriteThrough for per-edge writes."
                        .to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Resolves a resource path against the server URL.
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.server_url.join(path)?)
    }
}

fn parse_server_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw)?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::Config(format!(
            "Server URL must use http or https, got '{}'",
            url.scheme()
        )));
    }

    // Without a trailing slash `join` would replace the last path segment
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }

    Ok(url)
}

#[cfg(not(feature = "desktop-shims"))]
fn local_store_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "LocalStore".to_string(),
        message: "LocalStore implementation is required for the fallback identifier cache \
                 and selection records. \
                 Desktop: enable the 'desktop-shims' feature to use the default SqliteLocalStore. \
                 Browser: inject a localStorage-backed store. \
                 Mobile: inject UserDefaults/SharedPreferences."
            .to_string(),
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn sync_store_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "SyncStore".to_string(),
        message: "SyncStore implementation is required for the cross-device identifier \
                 and dirty flag. \
                 Desktop: enable the 'desktop-shims' feature to use the default SqliteSyncStore. \
                 Browser: inject a storage.sync-backed store. \
                 Mobile: inject iCloud key-value / Block Store."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn resolve_data_dir(data_dir: &Option<PathBuf>) -> PathBuf {
    data_dir
        .clone()
        .unwrap_or_else(bridge_desktop::default_data_dir)
}

#[cfg(feature = "desktop-shims")]
async fn provide_default_local_store(data_dir: &Option<PathBuf>) -> Result<Arc<dyn LocalStore>> {
    use bridge_desktop::SqliteLocalStore;

    let path = resolve_data_dir(data_dir).join("local.db");
    let store: Arc<dyn LocalStore> = Arc::new(SqliteLocalStore::new(path).await?);
    Ok(store)
}

#[cfg(not(feature = "desktop-shims"))]
async fn provide_default_local_store(_data_dir: &Option<PathBuf>) -> Result<Arc<dyn LocalStore>> {
    Err(local_store_missing_error())
}

#[cfg(feature = "desktop-shims")]
async fn provide_default_sync_store(data_dir: &Option<PathBuf>) -> Result<Arc<dyn SyncStore>> {
    use bridge_desktop::{SqliteSyncStore, SyncStoreOptions};

    let path = resolve_data_dir(data_dir).join("sync.db");
    let store: Arc<dyn SyncStore> =
        Arc::new(SqliteSyncStore::open(path, SyncStoreOptions::default()).await?);
    Ok(store)
}

#[cfg(not(feature = "desktop-shims"))]
async fn provide_default_sync_store(_data_dir: &Option<PathBuf>) -> Result<Arc<dyn SyncStore>> {
    Err(sync_store_missing_error())
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Option<Arc<dyn HttpClient>>> {
    let client: Arc<dyn HttpClient> = Arc::new(bridge_desktop::ReqwestHttpClient::new()?);
    Ok(Some(client))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Option<Arc<dyn HttpClient>>> {
    Ok(None)
}

/// Builder for constructing [`CoreConfig`] instances.
///
/// Call [`build()`](CoreConfigBuilder::build) to validate and create the
/// final config. Building is async because the desktop default stores open
/// their databases.
#[derive(Default)]
pub struct CoreConfigBuilder {
    server_url: Option<String>,
    data_dir: Option<PathBuf>,
    local_store: Option<Arc<dyn LocalStore>>,
    sync_store: Option<Arc<dyn SyncStore>>,
    http_client: Option<Arc<dyn HttpClient>>,
    activity_observer: Option<Arc<dyn ActivityObserver>>,
    storage_keys: Option<StorageKeys>,
    dirty_write_policy: DirtyWritePolicy,
    reconcile_policy: ReconcilePolicy,
    remote_retry: Option<RetryPolicy>,
    event_buffer_size: Option<usize>,
    load_timeout: Option<Duration>,
}

impl CoreConfigBuilder {
    /// Sets the remote store base URL (required).
    ///
    /// ```
    /// use core_runtime::config::CoreConfig;
    ///
    /// let builder = CoreConfig::builder().server_url("https://api.example.com");
    /// ```
    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = Some(url.into());
        self
    }

    /// Sets the directory used by the desktop default stores.
    pub fn data_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.data_dir = Some(path.into());
        self
    }

    /// Sets the device-local store.
    pub fn local_store(mut self, store: Arc<dyn LocalStore>) -> Self {
        self.local_store = Some(store);
        self
    }

    /// Sets the cross-device store.
    pub fn sync_store(mut self, store: Arc<dyn SyncStore>) -> Self {
        self.sync_store = Some(store);
        self
    }

    /// Sets the HTTP client used to reach the remote store.
    ///
    /// If not provided, the reqwest-based client is used when the
    /// `desktop-shims` feature is enabled.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Sets the activity observer that arms idle-triggered reconciliation.
    pub fn activity_observer(mut self, observer: Arc<dyn ActivityObserver>) -> Self {
        self.activity_observer = Some(observer);
        self
    }

    pub fn storage_keys(mut self, keys: StorageKeys) -> Self {
        self.storage_keys = Some(keys);
        self
    }

    /// Default: [`DirtyWritePolicy::WriteThrough`]
    pub fn dirty_write_policy(mut self, policy: DirtyWritePolicy) -> Self {
        self.dirty_write_policy = policy;
        self
    }

    /// Default: clear the dirty flag after a successful reconciliation
    pub fn reconcile_policy(mut self, policy: ReconcilePolicy) -> Self {
        self.reconcile_policy = policy;
        self
    }

    /// Default: a single attempt
    pub fn remote_retry(mut self, policy: RetryPolicy) -> Self {
        self.remote_retry = Some(policy);
        self
    }

    /// Default: 100 events
    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Default: 5 seconds
    pub fn load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = Some(timeout);
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// # Errors
    ///
    /// - The server URL is missing or not an http(s) URL
    /// - A required store is missing and no desktop default is available
    /// - A policy or size value is invalid
    pub async fn build(self) -> Result<CoreConfig> {
        let raw_url = self.server_url.ok_or_else(|| {
            Error::Config("Server URL is required. Use .server_url() to set it.".to_string())
        })?;
        let server_url = parse_server_url(&raw_url)?;

        let local_store = match self.local_store {
            Some(store) => store,
            None => provide_default_local_store(&self.data_dir).await?,
        };

        let sync_store = match self.sync_store {
            Some(store) => store,
            None => provide_default_sync_store(&self.data_dir).await?,
        };

        let http_client = match self.http_client {
            Some(client) => Some(client),
            None => provide_default_http_client()?,
        };

        let config = CoreConfig {
            server_url,
            data_dir: self.data_dir,
            local_store,
            sync_store,
            http_client,
            activity_observer: self.activity_observer,
            storage_keys: self.storage_keys.unwrap_or_default(),
            dirty_write_policy: self.dirty_write_policy,
            reconcile_policy: self.reconcile_policy,
            remote_retry: self.remote_retry.unwrap_or_else(RetryPolicy::no_retry),
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
            load_timeout: self.load_timeout.unwrap_or(DEFAULT_LOAD_TIMEOUT),
        };

        config.validate()?;

        Ok(config)
    }
}
