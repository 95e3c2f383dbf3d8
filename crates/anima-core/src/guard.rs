//! Admission control in front of protected locations.
//!
//! Every navigation to a protected location asks the guard. It reads the
//! credential fresh each time (the monitor or a logout may have removed it
//! since the last check) and either admits the view, arming a session
//! monitor for as long as the view is mounted, or redirects to sign-in.
//! Redirecting never touches the stored credential.

use tracing::debug;

use crate::events::ExpiryNotice;
use crate::flash::Flash;
use crate::inspect::TokenInspector;
use crate::monitor::{MonitorHandle, SessionMonitor};
use crate::store::CredentialStore;

/// Location of the sign-in screen
pub const SIGN_IN_PATH: &str = "/signin";

/// Where to go after sign-in when no location was remembered
pub const DEFAULT_HOME_PATH: &str = "/home";

/// Instruction to show the sign-in screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignInRedirect {
    return_to: Option<String>,
    flash: Option<Flash>,
}

impl SignInRedirect {
    pub fn new(return_to: Option<String>) -> Self {
        Self {
            return_to,
            flash: None,
        }
    }

    /// Redirect produced by a `session-expired` event
    pub fn after_expiry(notice: &ExpiryNotice) -> Self {
        Self::new(notice.return_to.clone()).with_flash(Flash::error(notice.user_message()))
    }

    pub fn with_flash(mut self, flash: Flash) -> Self {
        self.flash = Some(flash);
        self
    }

    /// Always [`SIGN_IN_PATH`]
    pub fn target(&self) -> &'static str {
        SIGN_IN_PATH
    }

    /// Location originally requested, if any
    pub fn return_to(&self) -> Option<&str> {
        self.return_to.as_deref()
    }

    /// Where a successful sign-in should land
    pub fn resume_location(&self) -> &str {
        self.return_to.as_deref().unwrap_or(DEFAULT_HOME_PATH)
    }

    /// Consume the attached message; it is never handed out twice.
    pub fn take_flash(&mut self) -> Option<Flash> {
        self.flash.take()
    }
}

/// A protected view that passed the guard.
///
/// Holds the view's session monitor; dropping the view (unmounting)
/// cancels the monitor.
#[derive(Debug)]
pub struct ProtectedView {
    location: String,
    monitor: MonitorHandle,
}

impl ProtectedView {
    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn monitor(&self) -> &MonitorHandle {
        &self.monitor
    }

    /// Wait until the session behind this view has ended, whether by
    /// expiry, a rejected API call or a logout
    pub async fn ended(&mut self) {
        self.monitor.stopped().await;
    }

    /// Tear the view down, stopping its monitor
    pub fn unmount(self) {
        debug!(location = %self.location, "Protected view unmounted");
    }
}

#[derive(Debug)]
pub enum Admission {
    Granted(ProtectedView),
    Redirect(SignInRedirect),
}

impl Admission {
    pub fn is_granted(&self) -> bool {
        matches!(self, Admission::Granted(_))
    }
}

#[derive(Debug, Clone)]
pub struct RouteGuard {
    store: CredentialStore,
    inspector: TokenInspector,
    monitor: SessionMonitor,
}

impl RouteGuard {
    pub fn new(store: CredentialStore, inspector: TokenInspector, monitor: SessionMonitor) -> Self {
        Self {
            store,
            inspector,
            monitor,
        }
    }

    /// A token is stored and its `exp` has not passed
    pub fn can_enter(&self) -> bool {
        let token = self.store.get_token();
        !self.inspector.is_expired(token.as_deref())
    }

    /// Navigate to a protected `location`.
    ///
    /// Must be called from within a tokio runtime when admission is
    /// possible, since an admitted view arms a monitor task.
    pub fn enter(&self, location: &str) -> Admission {
        if !self.can_enter() {
            debug!(location, "Guard redirecting to sign-in");
            return Admission::Redirect(SignInRedirect::new(Some(location.to_string())));
        }

        debug!(location, "Guard admitted view");
        Admission::Granted(ProtectedView {
            location: location.to_string(),
            monitor: self.monitor.arm(Some(location.to_string())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Duration;

    use crate::clock::RuntimeClock;
    use crate::events::{ExpiryCause, SessionEventBus};
    use crate::flash::Severity;
    use crate::store::MemoryBackend;
    use crate::test_support::token_expiring_in;

    fn guard() -> (RouteGuard, CredentialStore, SessionEventBus) {
        let store = CredentialStore::new(MemoryBackend::new());
        let bus = SessionEventBus::new();
        let inspector = TokenInspector::new(Arc::new(RuntimeClock::new()));
        let monitor = SessionMonitor::new(store.clone(), inspector.clone(), bus.clone());
        (RouteGuard::new(store.clone(), inspector, monitor), store, bus)
    }

    #[tokio::test]
    async fn test_valid_token_is_admitted_with_monitor() {
        let (guard, store, _bus) = guard();
        store.set_token(&token_expiring_in(Duration::hours(1))).unwrap();

        assert!(guard.can_enter());
        match guard.enter("/home/analyze") {
            Admission::Granted(view) => {
                assert_eq!(view.location(), "/home/analyze");
                assert_eq!(view.monitor().origin(), Some("/home/analyze"));
                assert!(!view.monitor().is_finished());
                view.unmount();
            }
            Admission::Redirect(r) => panic!("unexpected redirect: {r:?}"),
        }
    }

    #[tokio::test]
    async fn test_expired_token_redirects_with_location() {
        let (guard, store, _bus) = guard();
        let token = token_expiring_in(Duration::hours(-1));
        store.set_token(&token).unwrap();

        match guard.enter("/home/history") {
            Admission::Redirect(redirect) => {
                assert_eq!(redirect.target(), SIGN_IN_PATH);
                assert_eq!(redirect.return_to(), Some("/home/history"));
                assert_eq!(redirect.resume_location(), "/home/history");
            }
            Admission::Granted(_) => panic!("expired token admitted"),
        }
        // Redirect leaves the store alone
        assert_eq!(store.get_token(), Some(token));
    }

    #[tokio::test]
    async fn test_cannot_enter_after_remove_token() {
        let (guard, store, _bus) = guard();
        store.set_token(&token_expiring_in(Duration::hours(1))).unwrap();
        assert!(guard.can_enter());

        store.remove_token().unwrap();
        assert!(!guard.can_enter());
        assert!(!guard.enter("/home").is_granted());
    }

    #[tokio::test]
    async fn test_malformed_token_redirects() {
        let (guard, store, _bus) = guard();
        store.set_token("definitely-not-a-jwt").unwrap();
        assert!(!guard.can_enter());
    }

    #[tokio::test]
    async fn test_guard_reevaluates_every_navigation() {
        let (guard, store, _bus) = guard();
        assert!(!guard.enter("/home").is_granted());

        store.set_token(&token_expiring_in(Duration::hours(1))).unwrap();
        assert!(guard.enter("/home").is_granted());

        store.remove_token().unwrap();
        assert!(!guard.enter("/home").is_granted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_view_ends_when_token_is_cleared() {
        let (guard, store, _bus) = guard();
        store.set_token(&token_expiring_in(Duration::hours(1))).unwrap();
        let mut view = match guard.enter("/home") {
            Admission::Granted(view) => view,
            Admission::Redirect(r) => panic!("unexpected redirect: {r:?}"),
        };

        store.remove_token().unwrap();
        view.ended().await;

        assert!(view.monitor().is_finished());
    }

    #[test]
    fn test_expiry_redirect_flash_is_one_shot() {
        let notice = ExpiryNotice {
            cause: ExpiryCause::TokenExpired,
            return_to: Some("/home/recommendations".to_string()),
        };
        let mut redirect = SignInRedirect::after_expiry(&notice);

        assert_eq!(redirect.return_to(), Some("/home/recommendations"));
        let flash = redirect.take_flash().expect("flash attached");
        assert_eq!(flash.severity, Severity::Error);
        assert_eq!(redirect.take_flash(), None);
    }

    #[test]
    fn test_resume_location_defaults_to_home() {
        assert_eq!(SignInRedirect::new(None).resume_location(), DEFAULT_HOME_PATH);
    }
}
