//! # Host Bridge Traits
//!
//! Storage-tier and platform abstraction traits that each host must implement.
//!
//! ## Overview
//!
//! This crate defines the contract between the session core and the host's
//! storage and platform facilities. Each trait represents a capability the
//! core requires but that is implemented differently per platform (desktop,
//! browser extension, mobile).
//!
//! ## Traits
//!
//! ### Storage Tiers
//! - [`LocalStore`](storage::LocalStore) - Device-local key-value storage, unlimited writes
//! - [`SyncStore`](storage::SyncStore) - Cross-device key-value storage with a write quota
//!   and change notifications
//!
//! ### Networking
//! - [`HttpClient`](http::HttpClient) - Async HTTP used to reach the remote store
//!
//! ### Platform Integration
//! - [`ActivityObserver`](activity::ActivityObserver) - Active / idle / locked transitions
//! - [`LoggerSink`](logging::LoggerSink) - Forward structured logs to host logging
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type. Platform
//! implementations should:
//!
//! - Convert platform-specific errors to `BridgeError`
//! - Report quota rejections as [`BridgeError::QuotaExceeded`] so callers can
//!   tell them apart from backend failures
//! - Include the key or path involved in the message
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so implementations can be shared
//! across async tasks behind an `Arc`.
//!
//! ## Examples
//!
//! ### Implementing LocalStore
//!
//! ```ignore
//! use bridge_traits::storage::LocalStore;
//! use bridge_traits::error::Result;
//! use async_trait::async_trait;
//!
//! pub struct MyLocalStore {
//!     values: std::sync::Mutex<std::collections::HashMap<String, String>>,
//! }
//!
//! #[async_trait]
//! impl LocalStore for MyLocalStore {
//!     async fn set_string(&self, key: &str, value: &str) -> Result<()> {
//!         // Implementation
//!         todo!()
//!     }
//!
//!     // ...
//! }
//! ```

pub mod activity;
pub mod error;
pub mod http;
pub mod logging;
pub mod storage;

pub use error::BridgeError;

// Re-export commonly used types
pub use activity::{ActivityChangeStream, ActivityObserver, ActivityState};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use logging::{LogEntry, LogLevel, LoggerSink, StderrLogger};
pub use storage::{
    ChangeOrigin, LocalStore, StorageChange, StorageChangeStream, SyncStore, WriteQuota,
};
