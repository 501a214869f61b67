//! Peeking at token expiry claims
//!
//! The backend is the sole authority over its tokens; this module never
//! verifies signatures. It only recovers the `exp` claim so the session
//! layer can schedule refreshes against an absolute instant.

use aliri_base64::{Base64Url, InvalidBase64Data};
use aliri_clock::UnixTime;
use serde::Deserialize;
use thiserror::Error;

/// An error encountered while recovering a token's expiry claim
#[derive(Debug, Error)]
pub enum ClaimError {
    /// The token is not a three-segment JWT
    #[error("token is not in compact JWT form")]
    MalformedToken,
    /// The payload segment is not valid URL-safe base64
    #[error("token payload is not valid base64")]
    PayloadEncoding(#[from] InvalidBase64Data),
    /// The payload decoded, but the claims could not be parsed
    #[error("token claims could not be parsed")]
    ClaimParse(#[from] serde_json::Error),
}

#[derive(Deserialize)]
struct ExpiryClaims {
    exp: u64,
}

/// Recovers the absolute expiry instant from a token's `exp` claim
///
/// A token that fails to decode is an error, never a usable token with a
/// garbage expiry.
pub fn decode_expiry(token: &str) -> Result<UnixTime, ClaimError> {
    let mut segments = token.split('.');
    let payload = match (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) {
        (Some(_header), Some(payload), Some(_signature), None) => payload,
        _ => return Err(ClaimError::MalformedToken),
    };

    let decoded = Base64Url::from_encoded(payload)?;
    let claims: ExpiryClaims = serde_json::from_slice(decoded.as_slice())?;
    Ok(UnixTime(claims.exp))
}
