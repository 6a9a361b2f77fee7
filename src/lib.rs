//! Workspace facade crate.
//!
//! Exposes the session core behind the `desktop-shims` feature so host
//! applications can depend on `session-workspace` and get the SQLite and
//! reqwest backed bridges without wiring each crate individually.

#[cfg(feature = "desktop-shims")]
pub use core_session::*;
