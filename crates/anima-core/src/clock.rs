//! Wall-clock sources for expiry checks.

use std::fmt;

use chrono::{DateTime, Duration, Utc};

/// Source of "now" for comparing against a token's `exp` claim.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// The operating system's wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall clock that advances with the tokio runtime's clock.
///
/// Anchored to real time at construction, it then moves forward by however
/// much `tokio::time::Instant` has moved. When the runtime clock is paused
/// (`tokio::time::pause`, `#[tokio::test(start_paused = true)]`) this lets a
/// simulation skip hours of polling in milliseconds while token expiry and
/// timer ticks stay consistent with each other.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeClock {
    anchor_wall: DateTime<Utc>,
    anchor: tokio::time::Instant,
}

impl RuntimeClock {
    pub fn new() -> Self {
        Self {
            anchor_wall: Utc::now(),
            anchor: tokio::time::Instant::now(),
        }
    }
}

impl Default for RuntimeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for RuntimeClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = tokio::time::Instant::now().saturating_duration_since(self.anchor);
        Duration::from_std(elapsed)
            .ok()
            .and_then(|elapsed| self.anchor_wall.checked_add_signed(elapsed))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
