//! Device Activity Observation
//!
//! Reports whether the user is present at the device so the core can defer
//! expensive work while the device is idle or locked and catch up once it
//! becomes active again.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;

/// Device activity state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityState {
    /// The user is interacting with the device
    Active,
    /// No input for longer than the idle threshold
    Idle,
    /// The screen is locked
    Locked,
}

impl ActivityState {
    /// True for the transitions that bring the user back to the device
    /// (idle → active, locked → active).
    pub fn is_resume_from(self, previous: ActivityState) -> bool {
        self == ActivityState::Active && previous != ActivityState::Active
    }
}

impl fmt::Display for ActivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivityState::Active => write!(f, "active"),
            ActivityState::Idle => write!(f, "idle"),
            ActivityState::Locked => write!(f, "locked"),
        }
    }
}

/// Activity observer trait
///
/// # Platform Support
///
/// - **Browser extensions**: `chrome.idle.onStateChanged`
/// - **Desktop**: input events forwarded by the host plus an idle threshold
/// - **iOS/Android**: screen lock and app foreground notifications
///
/// # Example
///
/// ```ignore
/// use bridge_traits::activity::{ActivityObserver, ActivityState};
///
/// async fn watch(observer: &dyn ActivityObserver) -> Result<()> {
///     let mut stream = observer.subscribe_changes().await?;
///
///     while let Some(state) = stream.next().await {
///         if state == ActivityState::Active {
///             refresh_if_stale().await;
///         }
///     }
///     Ok(())
/// }
/// ```
#[async_trait::async_trait]
pub trait ActivityObserver: Send + Sync {
    /// Get current activity state
    async fn get_state(&self) -> Result<ActivityState>;

    /// Subscribe to activity state changes
    ///
    /// Only actual changes are delivered; repeated reports of the same state
    /// are collapsed by the implementation.
    async fn subscribe_changes(&self) -> Result<Box<dyn ActivityChangeStream>>;
}

/// Stream of activity state changes
#[async_trait::async_trait]
pub trait ActivityChangeStream: Send {
    /// Get the next activity state update
    ///
    /// Returns `None` when the stream is closed.
    async fn next(&mut self) -> Option<ActivityState>;
}
