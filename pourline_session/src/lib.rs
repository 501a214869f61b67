//! Session and backend-token lifecycle management for the Pourline
//! dispatch dashboard
//!
//! The dashboard signs its users in against a third-party OAuth identity
//! provider, but the scheduling backend insists on its own bearer
//! access/refresh token pair. This crate owns the bridge between the two:
//! it exchanges the provider's identity assertion for backend tokens at
//! sign-in, keeps the pair (and the expiries decoded from it) alongside the
//! session, refreshes an expired access token before a call goes out, and
//! makes sure that a burst of concurrent calls arriving at the moment of
//! expiry produces exactly one refresh request rather than a stampede.
//!
//! Sign-in is deliberately forgiving: if the token exchange fails, the
//! session is still created (identity known, no backend tokens) so a
//! transient backend outage degrades the dashboard instead of locking the
//! user out of it. A degraded session fails every authenticated call fast
//! and visibly until the user signs in again.
//!
//! Refresh failure is deliberately unforgiving: the session is torn down,
//! the teardown is published on the session-state stream, and no partial
//! token is ever stored.
//!
//! # General flow
//!
//! Build a [`SessionManager`] over a session store and the backend's token
//! endpoints, hand it to the request layer, and let every authenticated
//! call resolve its token through
//! [`fresh_access_token`][SessionManager::fresh_access_token]:
//!
//! ```
//! use std::sync::Arc;
//!
//! use pourline_session::authority::HttpTokenAuthority;
//! use pourline_session::store::InMemorySessionStore;
//! use pourline_session::SessionManager;
//!
//! let backend = reqwest::Url::parse("https://api.pourline.example/").unwrap();
//! let authority = HttpTokenAuthority::new(reqwest::Client::new(), backend);
//!
//! let manager = SessionManager::new(
//!     Arc::new(InMemorySessionStore::new()),
//!     Arc::new(authority),
//! );
//!
//! let session_states = manager.subscribe();
//! # drop(session_states);
//! ```
//!
//! The manager is cheap to clone; clones share one session, one
//! single-flight gate, and one state stream.
//!
//! # Features
//!
//! * `file` (default): a file-backed session store so sessions survive a
//!   server restart.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

pub mod authority;
mod braids;
pub mod claims;
mod manager;
mod session;
pub mod store;
mod tokens;

pub use braids::*;
pub use manager::{ExchangeError, RefreshError, SessionManager, SignIn, TokenError};
pub use session::{FieldUpdate, Session, SessionPatch, SessionState, UserIdentity};
pub use tokens::{TokenSet, TokenStatus};
