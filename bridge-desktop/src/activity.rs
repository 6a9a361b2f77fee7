//! Desktop activity observer
//!
//! Desktop hosts forward input and screen-lock notifications; the observer
//! turns them into active / idle / locked transitions using an idle threshold.

use async_trait::async_trait;
use bridge_traits::{
    activity::{ActivityChangeStream, ActivityObserver, ActivityState},
    error::Result,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Idle threshold used by [`DesktopActivityObserver::new`].
pub const DEFAULT_IDLE_THRESHOLD: Duration = Duration::from_secs(60);

struct Tracker {
    state: ActivityState,
    last_input: Instant,
}

struct Inner {
    idle_threshold: Duration,
    tracker: Mutex<Tracker>,
    changes: broadcast::Sender<ActivityState>,
}

impl Inner {
    fn tracker(&self) -> MutexGuard<'_, Tracker> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply a state, broadcasting only when it differs from the current one.
    fn transition(&self, tracker: &mut Tracker, next: ActivityState) {
        if tracker.state == next {
            return;
        }
        debug!(from = %tracker.state, to = %next, "Activity state changed");
        tracker.state = next;
        let _ = self.changes.send(next);
    }

    fn check_idle(&self) {
        let mut tracker = self.tracker();
        if tracker.state == ActivityState::Active
            && tracker.last_input.elapsed() >= self.idle_threshold
        {
            self.transition(&mut tracker, ActivityState::Idle);
        }
    }
}

/// Activity observer driven by host input and lock notifications
///
/// Starts out `Active`. Without input for the idle threshold the state
/// becomes `Idle`; any input makes it `Active` again. While locked, input is
/// ignored until [`unlock`](Self::unlock) is called.
pub struct DesktopActivityObserver {
    inner: Arc<Inner>,
    ticker: JoinHandle<()>,
}

impl DesktopActivityObserver {
    /// Create an observer with the default 60 second idle threshold.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new() -> Self {
        Self::with_idle_threshold(DEFAULT_IDLE_THRESHOLD)
    }

    pub fn with_idle_threshold(idle_threshold: Duration) -> Self {
        let (changes, _) = broadcast::channel(16);
        let inner = Arc::new(Inner {
            idle_threshold,
            tracker: Mutex::new(Tracker {
                state: ActivityState::Active,
                last_input: Instant::now(),
            }),
            changes,
        });

        let tick = (idle_threshold / 4).max(Duration::from_millis(10));
        let ticker = spawn_idle_ticker(Arc::downgrade(&inner), tick);

        Self { inner, ticker }
    }

    /// Record user input
    pub fn report_input(&self) {
        let mut tracker = self.inner.tracker();
        tracker.last_input = Instant::now();
        if tracker.state == ActivityState::Idle {
            self.inner.transition(&mut tracker, ActivityState::Active);
        }
    }

    /// The screen was locked
    pub fn lock(&self) {
        let mut tracker = self.inner.tracker();
        self.inner.transition(&mut tracker, ActivityState::Locked);
    }

    /// The screen was unlocked; counts as input
    pub fn unlock(&self) {
        let mut tracker = self.inner.tracker();
        tracker.last_input = Instant::now();
        self.inner.transition(&mut tracker, ActivityState::Active);
    }

    /// Evaluate the idle threshold immediately instead of waiting for the ticker
    pub fn check_idle(&self) {
        self.inner.check_idle();
    }

    pub fn idle_threshold(&self) -> Duration {
        self.inner.idle_threshold
    }
}

impl Default for DesktopActivityObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DesktopActivityObserver {
    fn drop(&mut self) {
        self.ticker.abort();
    }
}

fn spawn_idle_ticker(inner: Weak<Inner>, tick: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick);
        loop {
            interval.tick().await;
            match inner.upgrade() {
                Some(inner) => inner.check_idle(),
                None => break,
            }
        }
    })
}

#[async_trait]
impl ActivityObserver for DesktopActivityObserver {
    async fn get_state(&self) -> Result<ActivityState> {
        Ok(self.inner.tracker().state)
    }

    async fn subscribe_changes(&self) -> Result<Box<dyn ActivityChangeStream>> {
        Ok(Box::new(DesktopActivityStream {
            receiver: self.inner.changes.subscribe(),
        }))
    }
}

struct DesktopActivityStream {
    receiver: broadcast::Receiver<ActivityState>,
}

#[async_trait]
impl ActivityChangeStream for DesktopActivityStream {
    async fn next(&mut self) -> Option<ActivityState> {
        loop {
            match self.receiver.recv().await {
                Ok(state) => return Some(state),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
