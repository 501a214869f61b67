//! An in-memory session store

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::SessionStore;
use crate::{Session, SessionPatch};

/// A session store backed by process memory
///
/// The default store for request handling and tests. Contents are lost when
/// the process exits; pair it with [`FileSessionStore`][super::FileSessionStore]
/// when sessions must survive a restart.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    session: RwLock<Session>,
}

impl InMemorySessionStore {
    /// Constructs an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Constructs a store seeded with an existing session
    pub fn with_session(session: Session) -> Self {
        Self {
            session: RwLock::new(session),
        }
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn read(&self) -> Session {
        self.session.read().await.clone()
    }

    async fn update(&self, patch: SessionPatch) -> Session {
        let mut session = self.session.write().await;
        session.apply(patch);
        session.clone()
    }
}
