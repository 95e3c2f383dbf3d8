//! Request and response bodies for the Ánima backend.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct RegisterRequest<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct ImageRequest {
    /// Data URL: `data:<mime>;base64,<payload>`
    pub image: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct RecoveryRequest<'a> {
    pub email: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct RecoveryCodeRequest<'a> {
    pub email: &'a str,
    pub code: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct PasswordResetRequest<'a> {
    pub email: &'a str,
    pub code: &'a str,
    pub new_password: &'a str,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

// Keep the token out of logs
impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .finish()
    }
}

/// The signed-in user as reported by `/v1/auth/me`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    #[serde(rename = "nombre")]
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// Emotion classification of a submitted photo
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionAnalysis {
    pub emotion: String,
    pub confidence: f64,
    #[serde(default)]
    pub emotions_detected: BTreeMap<String, f64>,
    pub timestamp: String,
    #[serde(default)]
    pub message: String,
}

impl EmotionAnalysis {
    /// Detected emotions, most likely first
    pub fn ranked(&self) -> Vec<(&str, f64)> {
        let mut ranked: Vec<(&str, f64)> = self
            .emotions_detected
            .iter()
            .map(|(name, score)| (name.as_str(), *score))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked
    }
}

/// Acknowledgement from the password-recovery endpoints
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RecoveryResponse {
    pub message: String,
    #[serde(default)]
    pub success: bool,
}

// ============================================================================
// Recommendations
// ============================================================================

/// Emotions the recommendation endpoints know about
pub const RECOMMENDATION_EMOTIONS: [&str; 5] = ["happy", "sad", "angry", "relaxed", "energetic"];

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Recommendations {
    #[serde(default)]
    pub tracks: Vec<Track>,
    #[serde(default)]
    pub emotion: String,
    /// `mockup`, `fallback`, or the live search strategy
    #[serde(default)]
    pub search_method: Option<String>,
    #[serde(default)]
    pub mockup_mode: bool,
}

/// A Spotify track as relayed by the backend
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Track {
    pub name: String,
    #[serde(default)]
    pub artists: Vec<Artist>,
    #[serde(default)]
    pub album: Option<Album>,
    #[serde(default)]
    pub external_urls: ExternalUrls,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub popularity: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Artist {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Album {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub images: Vec<AlbumImage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AlbumImage {
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ExternalUrls {
    #[serde(default)]
    pub spotify: Option<String>,
}

impl Track {
    /// Comma-separated artist names
    pub fn artist_names(&self) -> String {
        if self.artists.is_empty() {
            return "Unknown artist".to_string();
        }
        self.artists
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn spotify_url(&self) -> Option<&str> {
        self.external_urls.spotify.as_deref()
    }

    /// Track length as `m:ss`
    pub fn duration(&self) -> Option<String> {
        let secs = self.duration_ms? / 1000;
        Some(format!("{}:{:02}", secs / 60, secs % 60))
    }
}
