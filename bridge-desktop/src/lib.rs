//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `LocalStore` using a SQLite file in the application data directory
//! - `SyncStore` using a SQLite database shared between devices, with a
//!   write quota enforced through `governor`
//! - `HttpClient` using `reqwest`
//! - `ActivityObserver` fed by host input and screen-lock notifications
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{default_data_dir, SqliteLocalStore, SqliteSyncStore, SyncStoreOptions};
//!
//! #[tokio::main]
//! async fn main() -> bridge_traits::error::Result<()> {
//!     let dir = default_data_dir();
//!     let local = SqliteLocalStore::new(dir.join("local.db")).await?;
//!     let sync = SqliteSyncStore::open(dir.join("sync.db"), SyncStoreOptions::default()).await?;
//!
//!     // Use in core configuration
//!     Ok(())
//! }
//! ```

mod activity;
mod db;
mod http;
mod local_store;
mod sync_store;

use std::path::PathBuf;

pub use activity::{DesktopActivityObserver, DEFAULT_IDLE_THRESHOLD};
pub use http::ReqwestHttpClient;
pub use local_store::SqliteLocalStore;
pub use sync_store::{SqliteSyncStore, SyncStoreOptions, DEFAULT_WRITE_QUOTA};

/// Directory the desktop stores live in when the host does not choose one.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".local")
                .join("share")
        })
        .join("session-core")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_data_dir_is_namespaced() {
        assert!(default_data_dir().ends_with("session-core"));
    }
}
