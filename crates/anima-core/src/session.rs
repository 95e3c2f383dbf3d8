//! Session lifecycle: sign-in, sign-up, logout and expiry handling.
//!
//! `SessionManager` wires the credential store, inspector, event bus,
//! monitor, guard and API client together and owns the application-wide
//! `session-expired` listener.
//!
//! ```text
//! Anonymous --(sign-in succeeds)--> Active
//! Active --(logout | monitor expiry | API 401)--> Anonymous
//! Active --(navigation while valid)--> Active
//! ```

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::api::{AnimaClient, ApiError, UserProfile};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::events::{SessionEvent, SessionEventBus, Subscription};
use crate::flash::{Flash, FlashSlot};
use crate::guard::{RouteGuard, SignInRedirect};
use crate::inspect::{ClientExpiry, TokenInspector};
use crate::monitor::SessionMonitor;
use crate::store::CredentialStore;

/// Session state, always derived from the stored credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No credential stored
    Anonymous,
    /// Credential stored and not yet expired
    Active { expires_at: DateTime<Utc> },
    /// Credential stored but expired or unreadable
    Expired,
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Active { .. })
    }
}

pub struct SessionManager {
    store: CredentialStore,
    inspector: TokenInspector,
    bus: SessionEventBus,
    client: AnimaClient,
    guard: RouteGuard,
    flash: FlashSlot,
    expiry_redirect: Arc<Mutex<Option<SignInRedirect>>>,
    _listener: Subscription,
}

impl SessionManager {
    pub fn new(
        store: CredentialStore,
        clock: Arc<dyn Clock>,
        bus: SessionEventBus,
        client: AnimaClient,
        poll_interval: Duration,
    ) -> Self {
        let inspector = TokenInspector::new(clock);
        let monitor = SessionMonitor::new(store.clone(), inspector.clone(), bus.clone())
            .with_interval(poll_interval);
        let guard = RouteGuard::new(store.clone(), inspector.clone(), monitor);
        let flash = FlashSlot::new();
        let expiry_redirect = Arc::new(Mutex::new(None));

        let listener = {
            let client = client.clone();
            let flash = flash.clone();
            let expiry_redirect = Arc::clone(&expiry_redirect);
            bus.subscribe(move |event| match event {
                SessionEvent::Expired(notice) => {
                    info!(cause = ?notice.cause, "Session ended, returning to sign-in");
                    client.clear_user_cache();
                    let mut redirect = SignInRedirect::after_expiry(notice);
                    if let Some(message) = redirect.take_flash() {
                        flash.show(message);
                    }
                    *expiry_redirect.lock().unwrap_or_else(PoisonError::into_inner) = Some(redirect);
                }
            })
        };

        Self {
            store,
            inspector,
            bus,
            client,
            guard,
            flash,
            expiry_redirect,
            _listener: listener,
        }
    }

    /// Build everything from configuration.
    ///
    /// Purges legacy token scopes before anything reads the store. With
    /// `ephemeral`, the token lives in memory only.
    pub fn from_config(config: &Config, ephemeral: bool) -> Result<Self> {
        let store = if ephemeral {
            Config::ephemeral_store()
        } else {
            config
                .credential_store()
                .context("Failed to open credential storage")?
        };

        let purged = store.purge_legacy();
        if purged > 0 {
            info!(purged, "Removed tokens left in legacy storage");
        }

        let bus = SessionEventBus::new();
        let client = AnimaClient::new(config.api_url(), store.clone(), bus.clone())
            .context("Failed to create API client")?;

        Ok(Self::new(
            store,
            Arc::new(SystemClock),
            bus,
            client,
            config.poll_interval(),
        ))
    }

    pub fn state(&self) -> SessionState {
        let token = self.store.get_token();
        match self.inspector.inspect(token.as_deref()) {
            ClientExpiry::Missing => SessionState::Anonymous,
            ClientExpiry::Valid { expires_at } => SessionState::Active { expires_at },
            ClientExpiry::Expired { .. } | ClientExpiry::Unreadable => SessionState::Expired,
        }
    }

    /// Sign in and fetch the user's profile.
    ///
    /// The token is stored before the profile request (which needs it) and
    /// removed again if that request fails. A profile request rejected with
    /// 401 is a failed sign-in, not an expired session: the expiry redirect
    /// and flash it triggers are discarded.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<UserProfile> {
        let token = self
            .client
            .login(email, password)
            .await
            .context("Sign-in failed")?;

        self.store
            .set_token(&token.access_token)
            .context("Failed to store session token")?;
        self.client.clear_user_cache();
        let pending_redirect = self.peek_expiry_redirect();

        let user = match self.client.current_user().await {
            Ok(user) => user,
            Err(e) => {
                if matches!(e, ApiError::Unauthorized) {
                    self.flash.take();
                    *self.expiry_redirect.lock().unwrap_or_else(PoisonError::into_inner) =
                        pending_redirect;
                }
                if let Err(store_err) = self.store.remove_token() {
                    warn!(error = %store_err, "Failed to roll back session token");
                }
                return Err(anyhow::Error::new(e).context("Failed to load user profile"));
            }
        };

        // A fresh session supersedes any pending expiry redirect
        self.take_expiry_redirect();
        info!(user_id = user.id, "Signed in");
        self.flash
            .show(Flash::success(format!("Welcome back, {}!", user.name)).with_ttl(Duration::from_secs(3)));
        Ok(user)
    }

    /// Register a new account, then sign in with it
    pub async fn sign_up(&self, name: &str, email: &str, password: &str) -> Result<UserProfile> {
        self.client
            .register(name, email, password)
            .await
            .context("Registration failed")?;
        self.sign_in(email, password).await
    }

    /// End the session locally. Safe to call when not signed in.
    pub fn logout(&self) -> Result<(), crate::store::StoreError> {
        self.client.clear_user_cache();
        self.store.remove_token()?;
        info!("Signed out");
        Ok(())
    }

    /// The signed-in user's profile (memoized for a few seconds)
    pub async fn current_user(&self) -> Result<UserProfile, ApiError> {
        self.client.current_user().await
    }

    /// Redirect recorded by the last `session-expired` event, if not yet taken
    pub fn take_expiry_redirect(&self) -> Option<SignInRedirect> {
        self.expiry_redirect
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn peek_expiry_redirect(&self) -> Option<SignInRedirect> {
        self.expiry_redirect
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn guard(&self) -> &RouteGuard {
        &self.guard
    }

    pub fn client(&self) -> &AnimaClient {
        &self.client
    }

    pub fn bus(&self) -> &SessionEventBus {
        &self.bus
    }

    pub fn flash(&self) -> &FlashSlot {
        &self.flash
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &self.state())
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Duration as ChronoDuration;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::clock::RuntimeClock;
    use crate::flash::Severity;
    use crate::guard::Admission;
    use crate::monitor::DEFAULT_POLL_INTERVAL;
    use crate::store::MemoryBackend;
    use crate::test_support::token_expiring_in;

    fn manager(server: &MockServer) -> SessionManager {
        manager_with_store(server, CredentialStore::new(MemoryBackend::new()))
    }

    fn manager_with_store(server: &MockServer, store: CredentialStore) -> SessionManager {
        manager_at(&server.uri(), store)
    }

    fn manager_at(base_url: &str, store: CredentialStore) -> SessionManager {
        let bus = SessionEventBus::new();
        let client = AnimaClient::new(base_url, store.clone(), bus.clone()).expect("client");
        SessionManager::new(
            store,
            Arc::new(RuntimeClock::new()),
            bus,
            client,
            DEFAULT_POLL_INTERVAL,
        )
    }

    async fn mount_login(server: &MockServer, token: &str) {
        Mock::given(method("POST"))
            .and(path("/v1/auth/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": token})))
            .mount(server)
            .await;
    }

    async fn mount_me(server: &MockServer, status: u16) {
        Mock::given(method("GET"))
            .and(path("/v1/auth/me"))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({
                "id": 7, "nombre": "Ana", "email": "ana@example.com"
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_cold_start_with_valid_token_is_active() {
        let server = MockServer::start().await;
        let store = CredentialStore::new(MemoryBackend::with_token(token_expiring_in(
            ChronoDuration::hours(1),
        )));
        let manager = manager_with_store(&server, store);

        assert!(manager.state().is_active());
    }

    #[tokio::test]
    async fn test_state_is_derived_from_store() {
        let server = MockServer::start().await;
        let manager = manager(&server);
        assert_eq!(manager.state(), SessionState::Anonymous);

        manager
            .store()
            .set_token(&token_expiring_in(ChronoDuration::hours(-1)))
            .unwrap();
        assert_eq!(manager.state(), SessionState::Expired);

        manager.store().set_token("garbage").unwrap();
        assert_eq!(manager.state(), SessionState::Expired);
    }

    #[tokio::test]
    async fn test_sign_in_stores_token_and_greets() {
        let server = MockServer::start().await;
        let token = token_expiring_in(ChronoDuration::hours(1));
        mount_login(&server, &token).await;
        mount_me(&server, 200).await;

        let manager = manager(&server);
        let user = manager.sign_in("ana@example.com", "s3cret!").await.expect("sign in");

        assert_eq!(user.name, "Ana");
        assert_eq!(manager.store().get_token(), Some(token));
        assert!(manager.state().is_active());
        let flash = manager.flash().take().expect("welcome flash");
        assert_eq!(flash.severity, Severity::Success);
        assert!(flash.message.contains("Ana"));
    }

    #[tokio::test]
    async fn test_sign_in_rolls_back_when_profile_fails() {
        let server = MockServer::start().await;
        mount_login(&server, &token_expiring_in(ChronoDuration::hours(1))).await;
        mount_me(&server, 500).await;

        let manager = manager(&server);
        let err = manager.sign_in("ana@example.com", "s3cret!").await.unwrap_err();

        assert!(matches!(err.downcast_ref::<ApiError>(), Some(ApiError::ServerError(_))));
        assert_eq!(manager.state(), SessionState::Anonymous);
    }

    #[tokio::test]
    async fn test_profile_401_during_sign_in_is_not_an_expiry() {
        let server = MockServer::start().await;
        mount_login(&server, &token_expiring_in(ChronoDuration::hours(1))).await;
        mount_me(&server, 401).await;

        let manager = manager(&server);
        let err = manager.sign_in("ana@example.com", "s3cret!").await.unwrap_err();

        assert!(matches!(err.downcast_ref::<ApiError>(), Some(ApiError::Unauthorized)));
        assert_eq!(manager.state(), SessionState::Anonymous);
        assert!(manager.flash().take().is_none());
        assert!(manager.take_expiry_redirect().is_none());
    }

    #[tokio::test]
    async fn test_failed_sign_in_keeps_earlier_expiry_redirect() {
        let server = MockServer::start().await;
        mount_login(&server, &token_expiring_in(ChronoDuration::hours(1))).await;
        mount_me(&server, 401).await;

        let manager = manager(&server);
        manager.bus().publish(&SessionEvent::Expired(crate::events::ExpiryNotice {
            cause: crate::events::ExpiryCause::TokenExpired,
            return_to: Some("/home/history".to_string()),
        }));
        manager.flash().take();

        manager.sign_in("ana@example.com", "s3cret!").await.unwrap_err();

        let redirect = manager.take_expiry_redirect().expect("earlier redirect kept");
        assert_eq!(redirect.return_to(), Some("/home/history"));
    }

    #[tokio::test]
    async fn test_wrong_password_leaves_anonymous() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/auth/login"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"detail": "Credenciales inválidas"})))
            .mount(&server)
            .await;

        let manager = manager(&server);
        let err = manager.sign_in("ana@example.com", "wrong").await.unwrap_err();

        assert!(matches!(err.downcast_ref::<ApiError>(), Some(ApiError::Unauthorized)));
        assert_eq!(manager.state(), SessionState::Anonymous);
        assert!(manager.take_expiry_redirect().is_none());
    }

    #[tokio::test]
    async fn test_sign_up_registers_then_signs_in() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/auth/register"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": 7, "nombre": "Ana", "email": "ana@example.com"
            })))
            .expect(1)
            .mount(&server)
            .await;
        mount_login(&server, &token_expiring_in(ChronoDuration::hours(1))).await;
        mount_me(&server, 200).await;

        let manager = manager(&server);
        manager
            .sign_up("Ana", "ana@example.com", "s3cret!")
            .await
            .expect("sign up");

        assert!(manager.state().is_active());
    }

    #[tokio::test]
    async fn test_logout_returns_to_anonymous() {
        let server = MockServer::start().await;
        let manager = manager(&server);
        manager
            .store()
            .set_token(&token_expiring_in(ChronoDuration::hours(1)))
            .unwrap();

        manager.logout().expect("logout");
        assert_eq!(manager.state(), SessionState::Anonymous);
        assert!(!manager.guard().can_enter());

        manager.logout().expect("second logout");
    }

    #[tokio::test]
    async fn test_api_401_records_sign_in_redirect() {
        let server = MockServer::start().await;
        mount_me(&server, 401).await;

        let manager = manager(&server);
        manager
            .store()
            .set_token(&token_expiring_in(ChronoDuration::hours(1)))
            .unwrap();

        let err = manager.current_user().await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
        assert_eq!(manager.state(), SessionState::Anonymous);

        let redirect = manager.take_expiry_redirect().expect("redirect recorded");
        assert_eq!(redirect.resume_location(), crate::guard::DEFAULT_HOME_PATH);
        let flash = manager.flash().take().expect("expiry flash");
        assert_eq!(flash.severity, Severity::Error);
        // Shown once only
        assert!(manager.flash().take().is_none());
        assert!(manager.take_expiry_redirect().is_none());
    }

    #[tokio::test]
    async fn test_mounted_view_does_not_repeat_401_expiry() {
        let server = MockServer::start().await;
        mount_me(&server, 401).await;

        let store = CredentialStore::new(MemoryBackend::new());
        let bus = SessionEventBus::new();
        let client = AnimaClient::new(server.uri(), store.clone(), bus.clone()).expect("client");
        let manager = SessionManager::new(
            store,
            Arc::new(crate::clock::SystemClock),
            bus,
            client,
            std::time::Duration::from_secs(1),
        );
        let events = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&events);
        let _sub = manager.bus().subscribe(move |_| *sink.lock().unwrap() += 1);

        manager
            .store()
            .set_token(&token_expiring_in(ChronoDuration::hours(1)))
            .unwrap();
        let view = match manager.guard().enter("/home") {
            Admission::Granted(view) => view,
            Admission::Redirect(r) => panic!("unexpected redirect: {r:?}"),
        };

        manager.current_user().await.unwrap_err();
        // Let the monitor tick with the token gone
        tokio::time::sleep(std::time::Duration::from_millis(1500)).await;

        assert_eq!(*events.lock().unwrap(), 1);
        assert!(view.monitor().is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_expiry_records_redirect_with_origin() {
        // No HTTP involved; nothing listens here
        let manager = manager_at("http://127.0.0.1:9", CredentialStore::new(MemoryBackend::new()));
        manager
            .store()
            .set_token(&token_expiring_in(ChronoDuration::seconds(40)))
            .unwrap();

        let view = match manager.guard().enter("/home/analyze") {
            Admission::Granted(view) => view,
            Admission::Redirect(r) => panic!("unexpected redirect: {r:?}"),
        };

        tokio::time::sleep(std::time::Duration::from_secs(65)).await;

        assert_eq!(manager.state(), SessionState::Anonymous);
        let redirect = manager.take_expiry_redirect().expect("redirect recorded");
        assert_eq!(redirect.return_to(), Some("/home/analyze"));
        assert!(view.monitor().is_finished());
    }
}
