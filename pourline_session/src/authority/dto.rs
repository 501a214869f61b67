//! DTOs for the backend's token endpoints

use serde::{Deserialize, Serialize};

use crate::{AccessToken, IdentityAssertionRef, RefreshToken, RefreshTokenRef};

/// Request body for `POST /auth/exchange`
#[derive(Debug, Serialize)]
pub struct ExchangeRequest<'a> {
    /// The identity assertion issued by the OAuth provider
    pub assertion: &'a IdentityAssertionRef,
}

/// Request body for `POST /auth/refresh`
#[derive(Debug, Serialize)]
pub struct RefreshRequest<'a> {
    /// The refresh token issued alongside the expiring access token
    pub refresh_token: &'a RefreshTokenRef,
}

/// The token pair as both endpoints return it
///
/// Expiries are not part of the wire shape; they are recovered by decoding
/// the tokens themselves.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenPair {
    /// The bearer access token
    pub access_token: AccessToken,
    /// The refresh token to use once the access token expires
    pub refresh_token: RefreshToken,
    /// The token scheme; anything but `Bearer` is rejected
    pub token_type: String,
}
