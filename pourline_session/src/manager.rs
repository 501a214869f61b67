use std::{error, fmt, sync::Arc, time::Duration};

use aliri_clock::{Clock, System};
use thiserror::Error;
use tokio::sync::{watch, Mutex};

use crate::authority::{AuthorityError, TokenAuthority};
use crate::claims::ClaimError;
use crate::store::SessionStore;
use crate::{
    AccessToken, IdentityAssertion, IdentityAssertionRef, RefreshTokenRef, Session, SessionPatch,
    SessionState, TokenSet, TokenStatus, UserIdentity,
};

/// How long an exchange or refresh call may stay in flight before it is
/// classified as a transport failure and all waiters are released.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// An error while exchanging an identity assertion for backend tokens
///
/// Sign-in does not fail on this; the session is created degraded and the
/// error is handed back for display.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// The exchange endpoint refused or could not be reached
    #[error("exchange call failed")]
    Authority(#[from] AuthorityError),
    /// The exchanged tokens arrived, but their expiries could not be decoded
    #[error("unable to decode expiries from the exchanged tokens")]
    Claims(#[from] ClaimError),
    /// The exchange call did not complete within the bounded timeout
    #[error("exchange call did not complete in time")]
    TimedOut,
}

/// An error while refreshing the backend token pair
///
/// Any of these tears the session down; no partial token is ever stored.
#[derive(Debug, Error)]
pub enum RefreshError {
    /// The refresh endpoint refused or could not be reached
    #[error("refresh call failed")]
    Authority(#[from] AuthorityError),
    /// The refreshed tokens arrived, but their expiries could not be decoded
    #[error("unable to decode expiries from the refreshed tokens")]
    Claims(#[from] ClaimError),
    /// The refresh call did not complete within the bounded timeout
    #[error("refresh call did not complete in time")]
    TimedOut,
}

/// The reason no usable access token could be produced
#[derive(Debug, Error)]
pub enum TokenError {
    /// The session holds no backend tokens; the request is short-circuited
    /// without a network call
    #[error("no backend token is available for this session")]
    Unauthorized,
    /// The refresh token itself has expired; the session has been torn down
    #[error("the refresh token has expired; the session has been torn down")]
    SessionExpired,
    /// The refresh call failed; the session has been torn down
    #[error("token refresh failed; the session has been torn down")]
    RefreshFailed(#[source] RefreshError),
}

/// The outcome of a sign-in
///
/// Sign-in never fails outright: a transient backend outage during the
/// token exchange must not lock the user out of the dashboard shell.
#[derive(Debug)]
pub enum SignIn {
    /// Backend tokens were issued; authenticated calls are ready to go
    Established(Session),
    /// The identity was accepted but the exchange failed; the session
    /// exists, and every authenticated call will fail fast until the user
    /// signs in again
    Degraded {
        /// The degraded session that was created
        session: Session,
        /// Why the exchange failed
        error: ExchangeError,
    },
}

impl SignIn {
    /// The session that sign-in produced, degraded or not
    pub fn session(&self) -> &Session {
        match self {
            SignIn::Established(session) => session,
            SignIn::Degraded { session, .. } => session,
        }
    }

    /// Whether the session was created without backend tokens
    pub fn is_degraded(&self) -> bool {
        matches!(self, SignIn::Degraded { .. })
    }
}

/// The session lifecycle manager for one browser session
///
/// Cheap to clone; clones share the same session, the same single-flight
/// gate, and the same state stream. Every mutation of the session record
/// (sign-in, sign-out, refresh write-back, teardown) happens behind the
/// gate, so exactly one refresh can be in flight at any instant and a
/// logout can never interleave a refresh.
pub struct SessionManager<C = System> {
    store: Arc<dyn SessionStore>,
    authority: Arc<dyn TokenAuthority>,
    gate: Arc<Mutex<()>>,
    state_tx: Arc<watch::Sender<SessionState>>,
    call_timeout: Duration,
    clock: C,
}

impl<C: Clone> Clone for SessionManager<C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            authority: Arc::clone(&self.authority),
            gate: Arc::clone(&self.gate),
            state_tx: Arc::clone(&self.state_tx),
            call_timeout: self.call_timeout,
            clock: self.clock.clone(),
        }
    }
}

impl<C: fmt::Debug> fmt::Debug for SessionManager<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("call_timeout", &self.call_timeout)
            .field("clock", &self.clock)
            .finish()
    }
}

impl SessionManager<System> {
    /// Constructs a manager over the given store and token authority
    pub fn new(store: Arc<dyn SessionStore>, authority: Arc<dyn TokenAuthority>) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Unauthenticated);
        Self {
            store,
            authority,
            gate: Arc::new(Mutex::new(())),
            state_tx: Arc::new(state_tx),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            clock: System,
        }
    }
}

impl<C> SessionManager<C> {
    /// Bounds how long an exchange or refresh call may stay in flight
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> SessionManager<D> {
        SessionManager {
            store: self.store,
            authority: self.authority,
            gate: self.gate,
            state_tx: self.state_tx,
            call_timeout: self.call_timeout,
            clock,
        }
    }

    /// Watches session-state transitions
    ///
    /// The stream starts at `Unauthenticated` and reflects every transition
    /// made through this manager; the shell uses it to show the degraded
    /// banner and to redirect to the sign-in surface on `Invalid`.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Reads the current session
    pub async fn session(&self) -> Session {
        self.store.read().await
    }

    fn publish(&self, state: SessionState) {
        self.state_tx.send_replace(state);
    }
}

impl<C: Clock> SessionManager<C> {
    /// Signs the user in: exchanges the assertion for backend tokens and
    /// populates the session
    ///
    /// If the exchange fails for any reason, the session is still created
    /// (identity known, no backend tokens) so the user lands in the
    /// dashboard shell rather than being locked out by a transient backend
    /// outage. The assertion is consumed and never stored.
    pub async fn sign_in(&self, identity: UserIdentity, assertion: IdentityAssertion) -> SignIn {
        let _flight = self.gate.lock().await;

        match self.run_exchange(&assertion).await {
            Ok(tokens) => {
                let session = self
                    .store
                    .update(
                        SessionPatch::new()
                            .identity(identity)
                            .tokens(tokens)
                            .state(SessionState::Valid),
                    )
                    .await;
                self.publish(SessionState::Valid);
                tracing::info!("sign-in complete, backend tokens issued");
                SignIn::Established(session)
            }
            Err(error) => {
                let session = self
                    .store
                    .update(
                        SessionPatch::new()
                            .identity(identity)
                            .clear_tokens()
                            .state(SessionState::Degraded),
                    )
                    .await;
                self.publish(SessionState::Degraded);
                tracing::warn!(
                    error = (&error as &dyn error::Error),
                    "token exchange failed, session created degraded"
                );
                SignIn::Degraded { session, error }
            }
        }
    }

    /// Signs the user out, resetting the session to its signed-out default
    pub async fn sign_out(&self) -> Session {
        let _flight = self.gate.lock().await;
        let session = self.store.update(SessionPatch::signed_out()).await;
        self.publish(SessionState::Unauthenticated);
        tracing::info!("signed out");
        session
    }

    /// Produces an access token that is valid right now
    ///
    /// This is the gate every authenticated call passes through. A live
    /// token is returned without any network traffic. An expired token
    /// triggers at most one refresh call no matter how many callers arrive
    /// at once: the first caller through the gate performs the refresh, and
    /// everyone who piled up behind it consumes that one call's outcome,
    /// fresh tokens or a torn-down session.
    pub async fn fresh_access_token(&self) -> Result<AccessToken, TokenError> {
        let session = self.store.read().await;
        let Some(tokens) = session.tokens else {
            return Err(TokenError::Unauthorized);
        };
        match tokens.status_at(self.clock.now()) {
            TokenStatus::Valid => Ok(tokens.access_token().clone()),
            TokenStatus::Expired | TokenStatus::Unrecoverable => self.refresh_via_gate().await,
        }
    }

    async fn refresh_via_gate(&self) -> Result<AccessToken, TokenError> {
        let _flight = self.gate.lock().await;

        // Re-evaluate with the gate held: a refresh that was in flight while
        // we waited has already resolved, one way or the other.
        let session = self.store.read().await;
        let Some(tokens) = session.tokens else {
            return Err(TokenError::Unauthorized);
        };
        match tokens.status_at(self.clock.now()) {
            TokenStatus::Valid => Ok(tokens.access_token().clone()),
            TokenStatus::Unrecoverable => {
                tracing::warn!("refresh token expired, tearing the session down");
                self.teardown().await;
                Err(TokenError::SessionExpired)
            }
            TokenStatus::Expired => {
                self.store
                    .update(SessionPatch::new().state(SessionState::Refreshing))
                    .await;
                self.publish(SessionState::Refreshing);

                match self.run_refresh(tokens.refresh_token()).await {
                    Ok(fresh) => {
                        let access = fresh.access_token().clone();
                        self.store
                            .update(
                                SessionPatch::new()
                                    .tokens(fresh)
                                    .state(SessionState::Valid),
                            )
                            .await;
                        self.publish(SessionState::Valid);
                        tracing::debug!("access token refreshed");
                        Ok(access)
                    }
                    Err(error) => {
                        tracing::warn!(
                            error = (&error as &dyn error::Error),
                            "token refresh failed, tearing the session down"
                        );
                        self.teardown().await;
                        Err(TokenError::RefreshFailed(error))
                    }
                }
            }
        }
    }

    async fn run_exchange(
        &self,
        assertion: &IdentityAssertionRef,
    ) -> Result<TokenSet, ExchangeError> {
        let pair = tokio::time::timeout(
            self.call_timeout,
            self.authority.exchange_assertion(assertion),
        )
        .await
        .map_err(|_| ExchangeError::TimedOut)??;
        Ok(TokenSet::decode(pair)?)
    }

    async fn run_refresh(&self, refresh_token: &RefreshTokenRef) -> Result<TokenSet, RefreshError> {
        let pair = tokio::time::timeout(self.call_timeout, self.authority.refresh(refresh_token))
            .await
            .map_err(|_| RefreshError::TimedOut)??;
        Ok(TokenSet::decode(pair)?)
    }

    async fn teardown(&self) {
        self.store
            .update(
                SessionPatch::new()
                    .clear_tokens()
                    .state(SessionState::Invalid),
            )
            .await;
        self.publish(SessionState::Invalid);
    }
}
