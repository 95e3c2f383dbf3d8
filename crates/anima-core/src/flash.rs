//! One-shot messages shown on the next screen.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// How long a flash stays on screen unless told otherwise
pub const DEFAULT_FLASH_TTL: Duration = Duration::from_secs(4);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Success,
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flash {
    pub message: String,
    pub severity: Severity,
    /// Display time; zero means until dismissed
    pub ttl: Duration,
}

impl Flash {
    pub fn new(message: impl Into<String>, severity: Severity) -> Self {
        Self {
            message: message.into(),
            severity,
            ttl: DEFAULT_FLASH_TTL,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(message, Severity::Error)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(message, Severity::Success)
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

/// Holds at most one pending flash; reading it consumes it.
///
/// Clone is cheap; clones share the slot.
#[derive(Debug, Clone, Default)]
pub struct FlashSlot {
    pending: Arc<Mutex<Option<Flash>>>,
}

impl FlashSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace any pending flash
    pub fn show(&self, flash: Flash) {
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = Some(flash);
    }

    /// Take the pending flash. A second call returns `None`.
    pub fn take(&self) -> Option<Flash> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).is_none()
    }
}
