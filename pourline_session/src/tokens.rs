use aliri_clock::{Clock, System, UnixTime};
use serde::{Deserialize, Serialize};

use crate::authority::dto::TokenPair;
use crate::claims::{self, ClaimError};
use crate::{AccessToken, RefreshToken};

/// The backend token pair together with the expiries decoded from it
///
/// A session either holds a complete set or none at all; there is no state
/// in which an access token exists without its expiry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenSet {
    access_token: AccessToken,
    refresh_token: RefreshToken,
    access_expiry: UnixTime,
    refresh_expiry: UnixTime,
}

/// Where a token set stands relative to a given instant
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenStatus {
    /// The access token may be used as-is
    Valid,
    /// The access token has expired but the refresh token is still usable
    Expired,
    /// The refresh token has expired too; only re-authentication helps
    Unrecoverable,
}

impl TokenSet {
    /// Builds a token set from a wire token pair by decoding each token's
    /// expiry claim
    ///
    /// A pair whose expiries cannot be decoded is rejected whole; no partial
    /// set is ever produced.
    pub fn decode(pair: TokenPair) -> Result<Self, ClaimError> {
        let access_expiry = claims::decode_expiry(pair.access_token.as_str())?;
        let refresh_expiry = claims::decode_expiry(pair.refresh_token.as_str())?;
        Ok(Self {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            access_expiry,
            refresh_expiry,
        })
    }

    /// Assembles a token set from already-decoded parts
    pub fn from_parts(
        access_token: AccessToken,
        refresh_token: RefreshToken,
        access_expiry: UnixTime,
        refresh_expiry: UnixTime,
    ) -> Self {
        Self {
            access_token,
            refresh_token,
            access_expiry,
            refresh_expiry,
        }
    }

    /// Gets the current access token
    #[inline]
    pub fn access_token(&self) -> &AccessToken {
        &self.access_token
    }

    /// Gets the current refresh token
    #[inline]
    pub fn refresh_token(&self) -> &RefreshToken {
        &self.refresh_token
    }

    /// Gets the instant at which the access token stops being usable
    #[inline]
    pub fn access_expiry(&self) -> UnixTime {
        self.access_expiry
    }

    /// Gets the instant at which the refresh token stops being usable
    #[inline]
    pub fn refresh_expiry(&self) -> UnixTime {
        self.refresh_expiry
    }

    /// Gets the set's status based on the system clock
    #[inline]
    pub fn status(&self) -> TokenStatus {
        self.status_with_clock(&System)
    }

    /// Gets the set's status based on the current time as reported by the
    /// provided clock
    #[inline]
    pub fn status_with_clock<C: Clock>(&self, clock: &C) -> TokenStatus {
        self.status_at(clock.now())
    }

    /// Gets the set's status as of the provided time
    ///
    /// An access token is usable strictly before its expiry; at the expiry
    /// instant it is already expired. The same rule applies to the refresh
    /// token.
    #[inline]
    pub fn status_at(&self, time: UnixTime) -> TokenStatus {
        if time < self.access_expiry {
            TokenStatus::Valid
        } else if time < self.refresh_expiry {
            TokenStatus::Expired
        } else {
            TokenStatus::Unrecoverable
        }
    }
}
