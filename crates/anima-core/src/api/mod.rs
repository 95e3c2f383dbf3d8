//! REST API client module for the Ánima backend.
//!
//! This module provides the `AnimaClient` for signing in, registering,
//! recovering a password, fetching the signed-in user, submitting photos for
//! emotion analysis and fetching music recommendations.
//!
//! The API uses JWT bearer tokens obtained from `/v1/auth/login`. The client
//! reads the token from the `CredentialStore` on every call and ends the
//! session when the backend answers 401.

pub mod client;
pub mod error;
pub mod models;

pub use client::AnimaClient;
pub use error::ApiError;
pub use models::{
    EmotionAnalysis, Recommendations, RecoveryResponse, TokenResponse, Track, UserProfile,
    RECOMMENDATION_EMOTIONS,
};
