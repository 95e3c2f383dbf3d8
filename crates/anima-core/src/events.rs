//! In-process publish/subscribe for session lifecycle events.
//!
//! Whoever notices that the session is over (the monitor, an API call that
//! got a 401) publishes once; whoever has to react (clearing the cached
//! user, showing a message, going back to sign-in) subscribes. The bus is a
//! plain value handed to both sides, so independent buses never share
//! subscribers.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::debug;

/// Why the session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryCause {
    /// The token's `exp` claim passed (or the token became unreadable)
    TokenExpired,
    /// The backend rejected the token
    Unauthorized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiryNotice {
    pub cause: ExpiryCause,
    /// Location the user was on, so sign-in can send them back
    pub return_to: Option<String>,
}

impl ExpiryNotice {
    pub fn user_message(&self) -> &'static str {
        "Your session has expired. Please sign in again."
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Expired(ExpiryNotice),
}

impl SessionEvent {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Expired(_) => "session-expired",
        }
    }
}

type Handler = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: Vec<(u64, Handler)>,
}

fn lock(registry: &Mutex<Registry>) -> std::sync::MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Synchronous broadcast channel for [`SessionEvent`]s.
///
/// Clone is cheap; clones share subscribers.
#[derive(Clone, Default)]
pub struct SessionEventBus {
    registry: Arc<Mutex<Registry>>,
}

impl SessionEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. It stays registered until the returned
    /// [`Subscription`] is dropped or unsubscribed.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let mut registry = lock(&self.registry);
        let id = registry.next_id;
        registry.next_id += 1;
        registry.handlers.push((id, Arc::new(handler)));
        debug!(id, subscribers = registry.handlers.len(), "Session event subscriber added");

        Subscription {
            registry: Arc::downgrade(&self.registry),
            id,
            detached: false,
        }
    }

    /// Deliver `event` to every current subscriber, in subscription order.
    ///
    /// Handlers run on the caller's thread after the subscriber list has been
    /// snapshotted, so a handler may itself subscribe or unsubscribe.
    /// Returns how many handlers were called.
    pub fn publish(&self, event: &SessionEvent) -> usize {
        let handlers: Vec<Handler> = lock(&self.registry)
            .handlers
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        debug!(event = event.name(), subscribers = handlers.len(), "Publishing session event");
        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.registry).handlers.len()
    }
}

impl fmt::Debug for SessionEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionEventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Registration handle returned by [`SessionEventBus::subscribe`].
#[must_use = "dropping a Subscription unsubscribes the handler immediately"]
#[derive(Debug)]
pub struct Subscription {
    registry: Weak<Mutex<Registry>>,
    id: u64,
    detached: bool,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop does the work
    }

    /// Keep the handler registered for as long as the bus lives.
    pub fn detach(mut self) {
        self.detached = true;
    }

    fn remove(&self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        // The handler is dropped after the lock is released; it may own
        // subscriptions of its own.
        let _removed = {
            let mut registry = lock(&registry);
            let position = registry.handlers.iter().position(|(id, _)| *id == self.id);
            let removed = position.map(|i| registry.handlers.remove(i));
            debug!(id = self.id, subscribers = registry.handlers.len(), "Session event subscriber removed");
            removed
        };
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.detached {
            self.remove();
        }
    }
}
