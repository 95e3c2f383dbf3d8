//! Core library for the Ánima client.
//!
//! Ánima turns a photo into an emotion and the emotion into music. The
//! emotion classifier and recommender live behind a REST API; this crate is
//! the client side of that conversation:
//!
//! - [`store`]: the single persisted credential and its storage scopes
//! - [`inspect`]: client-side expiry check of the bearer token
//! - [`monitor`]: background polling that clears an expired credential
//! - [`events`]: publish/subscribe for `session-expired`
//! - [`guard`]: admission control in front of protected locations
//! - [`session`]: the sign-in / sign-up / logout flows tying it together
//! - [`api`]: typed wrappers over the backend endpoints
//! - [`config`]: persisted client configuration

pub mod api;
pub mod clock;
pub mod config;
pub mod events;
pub mod flash;
pub mod guard;
pub mod inspect;
pub mod monitor;
pub mod session;
pub mod store;

#[cfg(test)]
mod test_support;

pub use api::{AnimaClient, ApiError};
pub use clock::{Clock, RuntimeClock, SystemClock};
pub use config::{Config, StorageScope};
pub use events::{SessionEvent, SessionEventBus, Subscription};
pub use flash::{Flash, FlashSlot, Severity};
pub use guard::{Admission, ProtectedView, RouteGuard, SignInRedirect};
pub use inspect::{ClientExpiry, TokenInspector};
pub use monitor::{MonitorHandle, SessionMonitor};
pub use session::{SessionManager, SessionState};
pub use store::{CredentialStore, StoreError, TokenBackend};
