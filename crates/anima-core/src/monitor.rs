//! Background polling for session expiry.
//!
//! A token can expire while the user is idle on a protected screen. The
//! monitor notices without waiting for the next navigation or API call: it
//! checks once when armed and then on a fixed interval, and on expiry clears
//! the credential and publishes `session-expired` exactly once.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::events::{ExpiryCause, ExpiryNotice, SessionEvent, SessionEventBus};
use crate::inspect::TokenInspector;
use crate::store::CredentialStore;

/// Default time between expiry checks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Polling faster than this is a configuration mistake
const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Arms expiry polling for protected views.
///
/// Clone is cheap; all clones share the same store and bus.
#[derive(Debug, Clone)]
pub struct SessionMonitor {
    store: CredentialStore,
    inspector: TokenInspector,
    bus: SessionEventBus,
    interval: Duration,
}

impl SessionMonitor {
    pub fn new(store: CredentialStore, inspector: TokenInspector, bus: SessionEventBus) -> Self {
        Self {
            store,
            inspector,
            bus,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        if interval < MIN_POLL_INTERVAL {
            warn!(?interval, min = ?MIN_POLL_INTERVAL, "Poll interval too short, clamping");
        }
        self.interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one expiry check.
    ///
    /// Returns `true` while the session is still active. On expiry the token
    /// is removed, a `session-expired` event carrying `origin` is published,
    /// and `false` is returned.
    ///
    /// The event is published only by the check that actually removes the
    /// token. If logout, a rejected API call or another view's monitor has
    /// already cleared it, this check returns `false` without publishing.
    pub fn check(&self, origin: Option<&str>) -> bool {
        let token = self.store.get_token();
        if !self.inspector.is_expired(token.as_deref()) {
            return true;
        }

        let removed = match self
            .store
            .take_token_if(|token| self.inspector.is_expired(Some(token)))
        {
            Ok(taken) => taken.is_some(),
            Err(e) => {
                warn!(error = %e, "Failed to clear expired credential");
                true
            }
        };

        if removed {
            info!(origin, "Session expired, credential cleared");
            self.bus.publish(&SessionEvent::Expired(ExpiryNotice {
                cause: ExpiryCause::TokenExpired,
                return_to: origin.map(str::to_string),
            }));
            return false;
        }

        // A fresh sign-in may have replaced the token since it was read
        let still_active = !self.inspector.is_expired(self.store.get_token().as_deref());
        if !still_active {
            debug!(origin, "Session already ended elsewhere");
        }
        still_active
    }

    /// Start polling on behalf of the view at `origin`.
    ///
    /// The first check runs as soon as the task is scheduled. Polling stops
    /// after an expiry is handled, or when the returned handle is dropped.
    /// Must be called from within a tokio runtime.
    pub fn arm(&self, origin: Option<String>) -> MonitorHandle {
        let monitor = self.clone();
        let task_origin = origin.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !monitor.check(task_origin.as_deref()) {
                    break;
                }
            }
            debug!(origin = task_origin.as_deref(), "Session monitor stopped");
        });

        debug!(origin = origin.as_deref(), interval = ?self.interval, "Session monitor armed");
        MonitorHandle { task, origin }
    }
}

/// Owns one running monitor task; dropping it cancels the task.
#[derive(Debug)]
#[must_use = "dropping a MonitorHandle stops the monitor immediately"]
pub struct MonitorHandle {
    task: JoinHandle<()>,
    origin: Option<String>,
}

impl MonitorHandle {
    /// Stop polling
    pub fn disarm(self) {
        // Drop aborts the task
    }

    /// `true` once the monitor has handled an expiry (or was cancelled)
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    /// Wait until the monitor stops polling on its own.
    ///
    /// Resolves once the session has ended, however it ended.
    pub async fn stopped(&mut self) {
        if let Err(e) = (&mut self.task).await {
            debug!(error = %e, "Session monitor task did not complete");
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
