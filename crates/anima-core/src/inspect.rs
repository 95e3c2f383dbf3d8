//! Client-side expiry check for bearer tokens.
//!
//! The token is a JWT issued by the backend. This module reads its `exp`
//! claim **without verifying the signature**: the answer is a hint that lets
//! the client drop a stale token early, not an authorization decision. The
//! backend re-checks every request and has the final word.

use std::sync::Arc;

use base64::prelude::*;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use crate::clock::{Clock, SystemClock};

/// Outcome of an unverified, client-side look at a token's expiry.
///
/// Only `Valid` lets a caller proceed; everything else fails closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientExpiry {
    /// No token, or an empty one
    Missing,
    /// Not a JWT we can read an `exp` claim from
    Unreadable,
    /// `exp` lies in the future
    Valid { expires_at: DateTime<Utc> },
    /// `exp` is now or in the past
    Expired { expires_at: DateTime<Utc> },
}

impl ClientExpiry {
    pub fn is_expired(&self) -> bool {
        !matches!(self, ClientExpiry::Valid { .. })
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match self {
            ClientExpiry::Valid { expires_at } | ClientExpiry::Expired { expires_at } => {
                Some(*expires_at)
            }
            ClientExpiry::Missing | ClientExpiry::Unreadable => None,
        }
    }
}

#[derive(Error, Debug)]
enum DecodeError {
    #[error("expected 3 dot-separated segments, found {0}")]
    SegmentCount(usize),

    #[error("payload is not base64url: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("payload is not JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload has no numeric exp claim")]
    MissingExp,

    #[error("exp claim {0} is out of range")]
    ExpOutOfRange(f64),
}

/// Reads `exp` from JWT payloads and compares it to a clock.
#[derive(Debug, Clone)]
pub struct TokenInspector {
    clock: Arc<dyn Clock>,
}

impl TokenInspector {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Inspect a token against the clock. Never fails; decoding problems
    /// are logged and reported as `Unreadable`.
    pub fn inspect(&self, token: Option<&str>) -> ClientExpiry {
        let token = match token {
            Some(t) if !t.is_empty() => t,
            _ => return ClientExpiry::Missing,
        };

        match Self::decode_expiry(token) {
            Ok(expires_at) if self.clock.now() >= expires_at => {
                ClientExpiry::Expired { expires_at }
            }
            Ok(expires_at) => ClientExpiry::Valid { expires_at },
            Err(e) => {
                warn!(error = %e, "Could not read token expiry, treating as expired");
                ClientExpiry::Unreadable
            }
        }
    }

    /// `true` unless the token is present, readable and not yet expired.
    pub fn is_expired(&self, token: Option<&str>) -> bool {
        self.inspect(token).is_expired()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn decode_expiry(token: &str) -> Result<DateTime<Utc>, DecodeError> {
        let segments: Vec<&str> = token.split('.').collect();
        if segments.len() != 3 {
            return Err(DecodeError::SegmentCount(segments.len()));
        }

        let payload = BASE64_URL_SAFE_NO_PAD.decode(segments[1].trim_end_matches('='))?;
        // Only an object carries claims; arrays and scalars have no `exp`
        let claims: Map<String, Value> = serde_json::from_slice(&payload)?;
        let exp = claims
            .get("exp")
            .and_then(Value::as_f64)
            .ok_or(DecodeError::MissingExp)?;

        // exp is in seconds since the epoch
        let millis = exp * 1000.0;
        if !millis.is_finite() {
            return Err(DecodeError::ExpOutOfRange(exp));
        }
        DateTime::from_timestamp_millis(millis as i64).ok_or(DecodeError::ExpOutOfRange(exp))
    }
}

impl Default for TokenInspector {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}
