//! API client for communicating with the Ánima REST API.
//!
//! This module provides the `AnimaClient` struct for the auth, password
//! recovery, photo analysis and music recommendation endpoints.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use base64::prelude::*;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::events::{ExpiryCause, ExpiryNotice, SessionEvent, SessionEventBus};
use crate::store::CredentialStore;

use super::models::{
    ImageRequest, LoginRequest, PasswordResetRequest, RecoveryCodeRequest, RecoveryRequest,
    RegisterRequest,
};
use super::{
    ApiError, EmotionAnalysis, Recommendations, RecoveryResponse, TokenResponse, UserProfile,
};

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
pub const REQUEST_TIMEOUT_SECS: u64 = 8;

/// Photo analysis runs a classifier server-side and gets a longer ceiling.
const ANALYSIS_TIMEOUT_SECS: u64 = 15;

/// How long a fetched `/v1/auth/me` answer is reused.
const USER_CACHE_TTL: Duration = Duration::from_secs(5);

const LOGIN_PATH: &str = "/v1/auth/login";
const REGISTER_PATH: &str = "/v1/auth/register";
const ME_PATH: &str = "/v1/auth/me";
const ANALYZE_PATH: &str = "/v1/analysis/analyze-base64";
const ANALYZE_UPLOAD_PATH: &str = "/v1/analysis/analyze";
const RECOVERY_REQUEST_PATH: &str = "/v1/password-recovery/request";
const RECOVERY_VERIFY_PATH: &str = "/v1/password-recovery/verify";
const RECOVERY_RESET_PATH: &str = "/v1/password-recovery/reset";
const RECOMMEND_PATH: &str = "/recommend/";
const RECOMMEND_MOCKUP_PATH: &str = "/recommend/mockup";

#[derive(Debug)]
struct CachedUser {
    user: UserProfile,
    fetched_at: Instant,
}

/// API client for the Ánima backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling,
/// and clones share the user cache.
#[derive(Clone)]
pub struct AnimaClient {
    client: Client,
    base_url: String,
    store: CredentialStore,
    bus: SessionEventBus,
    user_cache: Arc<Mutex<Option<CachedUser>>>,
    // Held while `/me` is in flight so concurrent callers share one request
    user_fetch: Arc<tokio::sync::Mutex<()>>,
}

impl AnimaClient {
    /// Create a new API client with the default request timeout
    pub fn new(
        base_url: impl Into<String>,
        store: CredentialStore,
        bus: SessionEventBus,
    ) -> Result<Self, ApiError> {
        Self::with_timeout(base_url, store, bus, Duration::from_secs(REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        store: CredentialStore,
        bus: SessionEventBus,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();

        Ok(Self {
            client,
            base_url,
            store,
            bus,
            user_cache: Arc::new(Mutex::new(None)),
            user_fetch: Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    // ===== Auth =====

    /// Exchange email and password for a bearer token.
    ///
    /// Does not store the token; see `SessionManager::sign_in`.
    pub async fn login(&self, email: &str, password: &str) -> Result<TokenResponse, ApiError> {
        let token = self
            .post_public(LOGIN_PATH, &LoginRequest { email, password })
            .await?;
        debug!(email, "Login accepted");
        Ok(token)
    }

    /// Create an account. The new user still has to sign in.
    pub async fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<UserProfile, ApiError> {
        let body = RegisterRequest {
            name,
            email,
            password,
        };
        let user: UserProfile = self.post_public(REGISTER_PATH, &body).await?;
        info!(user_id = user.id, "Account registered");
        Ok(user)
    }

    // ===== Password recovery =====

    /// Ask the backend to email a six-digit recovery code
    pub async fn request_password_recovery(&self, email: &str) -> Result<RecoveryResponse, ApiError> {
        let response = self
            .post_public(RECOVERY_REQUEST_PATH, &RecoveryRequest { email })
            .await?;
        info!("Password recovery code requested");
        Ok(response)
    }

    pub async fn verify_recovery_code(
        &self,
        email: &str,
        code: &str,
    ) -> Result<RecoveryResponse, ApiError> {
        self.post_public(RECOVERY_VERIFY_PATH, &RecoveryCodeRequest { email, code })
            .await
    }

    /// Set a new password using a verified recovery code.
    ///
    /// Does not sign in; the user signs in with the new password afterwards.
    pub async fn reset_password(
        &self,
        email: &str,
        code: &str,
        new_password: &str,
    ) -> Result<RecoveryResponse, ApiError> {
        let body = PasswordResetRequest {
            email,
            code,
            new_password,
        };
        let response = self.post_public(RECOVERY_RESET_PATH, &body).await?;
        info!("Password reset");
        Ok(response)
    }

    /// The signed-in user.
    ///
    /// Answers are reused for a few seconds, and concurrent callers share a
    /// single request.
    pub async fn current_user(&self) -> Result<UserProfile, ApiError> {
        if let Some(user) = self.cached_user() {
            return Ok(user);
        }

        let _in_flight = self.user_fetch.lock().await;
        // Another caller may have filled the cache while we waited
        if let Some(user) = self.cached_user() {
            return Ok(user);
        }

        let response = self
            .send_authenticated(self.client.get(self.url(ME_PATH)))
            .await?;
        let user: UserProfile = response.json().await?;

        *self.user_cache.lock().unwrap_or_else(PoisonError::into_inner) = Some(CachedUser {
            user: user.clone(),
            fetched_at: Instant::now(),
        });
        Ok(user)
    }

    /// Forget the memoized `/me` answer
    pub fn clear_user_cache(&self) {
        self.user_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn cached_user(&self) -> Option<UserProfile> {
        let cache = self.user_cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache
            .as_ref()
            .filter(|c| c.fetched_at.elapsed() < USER_CACHE_TTL)
            .map(|c| c.user.clone())
    }

    // ===== Analysis =====

    /// Submit a photo for emotion classification
    pub async fn analyze_image(&self, image: &[u8], mime: &str) -> Result<EmotionAnalysis, ApiError> {
        let body = ImageRequest {
            image: format!("data:{};base64,{}", mime, BASE64_STANDARD.encode(image)),
        };
        let request = self
            .client
            .post(self.url(ANALYZE_PATH))
            .timeout(Duration::from_secs(ANALYSIS_TIMEOUT_SECS))
            .json(&body);

        debug!(bytes = image.len(), mime, "Submitting image for analysis");
        let response = self.send_authenticated(request).await?;
        Ok(response.json().await?)
    }

    /// Upload a photo as a multipart file for emotion classification
    pub async fn analyze_image_file(
        &self,
        image: Vec<u8>,
        file_name: &str,
        mime: &str,
    ) -> Result<EmotionAnalysis, ApiError> {
        let bytes = image.len();
        let part = Part::bytes(image)
            .file_name(file_name.to_string())
            .mime_str(mime)?;
        let request = self
            .client
            .post(self.url(ANALYZE_UPLOAD_PATH))
            .timeout(Duration::from_secs(ANALYSIS_TIMEOUT_SECS))
            .multipart(Form::new().part("image", part));

        debug!(bytes, mime, file_name, "Uploading image for analysis");
        let response = self.send_authenticated(request).await?;
        Ok(response.json().await?)
    }

    // ===== Recommendations =====

    /// Tracks to play for `emotion`.
    ///
    /// The live endpoint needs a linked Spotify account; when it answers
    /// with anything but success the mockup catalogue is used instead.
    /// Neither endpoint takes the session token, so a rejection here never
    /// ends the session.
    pub async fn recommendations(&self, emotion: &str) -> Result<Recommendations, ApiError> {
        let emotion = emotion.trim().to_lowercase();
        let query = [("emotion", emotion.as_str())];

        let response = self
            .client
            .get(self.url(RECOMMEND_PATH))
            .query(&query)
            .send()
            .await?;
        if response.status().is_success() {
            return Ok(response.json().await?);
        }

        debug!(status = %response.status(), emotion = %emotion, "Live recommendations unavailable, using mockup");
        let response = self
            .client
            .get(self.url(RECOMMEND_MOCKUP_PATH))
            .query(&query)
            .send()
            .await?;
        let response = Self::check_response(response).await?;
        Ok(response.json().await?)
    }

    // ===== Plumbing =====

    /// POST a JSON body to an endpoint that needs no session
    async fn post_public<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = self.client.post(self.url(path)).json(body);
        let response = Self::check_response(request.send().await?).await?;
        Ok(response.json().await?)
    }

    /// Attach the stored bearer token and send.
    ///
    /// Without a token nothing is sent. A 401 ends the session: the rejected
    /// token is removed and `session-expired` is published before the error
    /// returns, unless something else already cleared that token.
    async fn send_authenticated(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let token = self
            .store
            .get_token()
            .filter(|t| !t.is_empty())
            .ok_or(ApiError::NoToken)?;

        let response = request.bearer_auth(&token).send().await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            self.end_session(&token);
            return Err(ApiError::Unauthorized);
        }
        Self::check_response(response).await
    }

    fn end_session(&self, rejected: &str) {
        self.clear_user_cache();
        match self.store.take_token_if(|stored| stored == rejected) {
            Ok(Some(_)) => {}
            Ok(None) => {
                debug!("Rejected token was already cleared");
                return;
            }
            Err(e) => warn!(error = %e, "Failed to clear rejected credential"),
        }
        warn!("Backend rejected the session token");
        self.bus.publish(&SessionEvent::Expired(ExpiryNotice {
            cause: ExpiryCause::Unauthorized,
            return_to: None,
        }));
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }
}

impl std::fmt::Debug for AnimaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnimaClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}
