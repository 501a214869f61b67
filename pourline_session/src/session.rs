use serde::{Deserialize, Serialize};

use crate::{TokenSet, UserId};

/// Identity claims for the signed-in user, as supplied by the OAuth provider
///
/// Immutable for the lifetime of a session; a different user means a new
/// session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// The provider-assigned user identifier
    pub user_id: UserId,
    /// The user's display name
    pub display_name: String,
    /// The user's email address
    pub email: String,
}

/// The lifecycle state of a session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No user is signed in
    Unauthenticated,
    /// The user is signed in, but no backend tokens could be obtained; every
    /// authenticated call fails fast until a fresh sign-in repairs this
    Degraded,
    /// Backend tokens are on hand
    Valid,
    /// A refresh call is in flight
    Refreshing,
    /// The session is dead and cannot be repaired; the only way out is a
    /// brand-new session via full re-authentication
    Invalid,
}

/// One authenticated browser session
///
/// The identity comes from the OAuth provider; the tokens come from the
/// scheduling backend's exchange endpoint. The raw identity assertion used
/// to obtain them is never stored.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    /// Who is signed in, if anyone
    pub identity: Option<UserIdentity>,
    /// The backend token set, present only after a successful exchange or
    /// refresh
    pub tokens: Option<TokenSet>,
    /// Where the session stands in its lifecycle
    pub state: SessionState,
}

impl Session {
    /// An empty, signed-out session
    pub fn unauthenticated() -> Self {
        Self {
            identity: None,
            tokens: None,
            state: SessionState::Unauthenticated,
        }
    }

    /// Applies a patch, field by field; the last writer wins per field
    ///
    /// Applying the same patch twice leaves the session unchanged.
    pub fn apply(&mut self, patch: SessionPatch) {
        match patch.identity {
            Some(FieldUpdate::Set(identity)) => self.identity = Some(identity),
            Some(FieldUpdate::Clear) => self.identity = None,
            None => {}
        }
        match patch.tokens {
            Some(FieldUpdate::Set(tokens)) => self.tokens = Some(tokens),
            Some(FieldUpdate::Clear) => self.tokens = None,
            None => {}
        }
        if let Some(state) = patch.state {
            self.state = state;
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::unauthenticated()
    }
}

/// A replacement or removal of one session field
#[derive(Clone, Debug)]
pub enum FieldUpdate<T> {
    /// Replace the field with this value
    Set(T),
    /// Remove the field
    Clear,
}

/// A partial update to a session
///
/// Only the fields that are present are touched. Token replacement is
/// all-or-nothing: there is no way to patch in an access token without its
/// expiry.
#[derive(Clone, Debug, Default)]
pub struct SessionPatch {
    identity: Option<FieldUpdate<UserIdentity>>,
    tokens: Option<FieldUpdate<TokenSet>>,
    state: Option<SessionState>,
}

impl SessionPatch {
    /// An empty patch
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the identity
    pub fn identity(mut self, identity: UserIdentity) -> Self {
        self.identity = Some(FieldUpdate::Set(identity));
        self
    }

    /// Replaces the token set
    pub fn tokens(mut self, tokens: TokenSet) -> Self {
        self.tokens = Some(FieldUpdate::Set(tokens));
        self
    }

    /// Removes the token set
    pub fn clear_tokens(mut self) -> Self {
        self.tokens = Some(FieldUpdate::Clear);
        self
    }

    /// Sets the lifecycle state
    pub fn state(mut self, state: SessionState) -> Self {
        self.state = Some(state);
        self
    }

    /// A patch that resets every field back to the signed-out default
    pub fn signed_out() -> Self {
        Self {
            identity: Some(FieldUpdate::Clear),
            tokens: Some(FieldUpdate::Clear),
            state: Some(SessionState::Unauthenticated),
        }
    }
}
