//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the session core:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus system
//!
//! ## Overview
//!
//! This crate establishes the configuration, logging conventions and event
//! broadcasting mechanism the session components share. Components publish
//! state changes on the [`EventBus`](events::EventBus) instead of calling
//! each other.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
