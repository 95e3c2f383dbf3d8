//! Token builders shared by unit tests.

use base64::prelude::*;
use chrono::{DateTime, Duration, Utc};

/// Unsigned JWT-shaped token with the given raw payload
pub(crate) fn token_with_payload(payload: &str) -> String {
    let header = BASE64_URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = BASE64_URL_SAFE_NO_PAD.encode(payload);
    format!("{header}.{payload}.c2lnbmF0dXJl")
}

/// Token whose `exp` lies `offset` away from the real current time
pub(crate) fn token_expiring_in(offset: Duration) -> String {
    token_expiring_at(Utc::now() + offset)
}

/// Token whose `exp` is `at`, truncated to whole seconds
pub(crate) fn token_expiring_at(at: DateTime<Utc>) -> String {
    let exp = at.timestamp();
    token_with_payload(&format!(r#"{{"sub":"ana@example.com","exp":{exp}}}"#))
}
