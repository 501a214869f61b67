//! A file-backed session store

use std::{
    io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use tokio::fs::OpenOptions;
use tokio::sync::RwLock;

use super::SessionStore;
use crate::{Session, SessionPatch};

/// A session store persisted as JSON on the local filesystem
///
/// The in-memory copy is canonical; the file is rewritten after every
/// update so a restarted server picks the session back up. A write failure
/// is logged and does not fail the update; the session stays live on the
/// degraded persistence.
#[derive(Debug)]
pub struct FileSessionStore {
    path: PathBuf,
    session: RwLock<Session>,
}

impl FileSessionStore {
    /// Opens a store at the given path, loading any persisted session
    ///
    /// A missing file yields an empty session; an unreadable or corrupt
    /// file is an error so that a half-written session is never silently
    /// treated as signed out.
    pub async fn open(path: PathBuf) -> Result<Self, io::Error> {
        let session = match read_session(&path).await {
            Ok(session) => session,
            Err(error) if error.kind() == io::ErrorKind::NotFound => Session::unauthenticated(),
            Err(error) => return Err(error),
        };
        Ok(Self {
            path,
            session: RwLock::new(session),
        })
    }
}

async fn read_session(path: &Path) -> Result<Session, io::Error> {
    use tokio::io::AsyncReadExt;

    let mut file = OpenOptions::new().read(true).open(path).await?;
    let mut data = String::new();
    file.read_to_string(&mut data).await?;
    let session = serde_json::from_str(&data)?;
    Ok(session)
}

async fn write_session(path: &Path, session: &Session) -> Result<(), io::Error> {
    use tokio::io::AsyncWriteExt;

    let mut file_opts = OpenOptions::new();

    file_opts.create(true).truncate(true).write(true);

    #[cfg(unix)]
    file_opts.mode(0o600);

    let mut file = file_opts.open(path).await?;
    let data = serde_json::to_string_pretty(session)?;
    file.write_all(data.as_bytes()).await?;
    Ok(())
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn read(&self) -> Session {
        self.session.read().await.clone()
    }

    async fn update(&self, patch: SessionPatch) -> Session {
        let mut session = self.session.write().await;
        session.apply(patch);
        if let Err(error) = write_session(&self.path, &session).await {
            tracing::warn!(
                error = &error as &dyn std::error::Error,
                "unable to persist session to disk"
            );
        }
        session.clone()
    }
}

#[cfg(test)]
mod tests {
    use aliri_clock::UnixTime;

    use super::*;
    use crate::{AccessToken, RefreshToken, SessionState, TokenSet, UserId, UserIdentity};

    fn signed_in_patch() -> SessionPatch {
        SessionPatch::new()
            .identity(UserIdentity {
                user_id: UserId::from_static("u-14"),
                display_name: "Yard Lead".to_owned(),
                email: "yard@example.com".to_owned(),
            })
            .tokens(TokenSet::from_parts(
                AccessToken::from_static("access"),
                RefreshToken::from_static("refresh"),
                UnixTime(1_726_000_000),
                UnixTime(1_726_100_000),
            ))
            .state(SessionState::Valid)
    }

    #[tokio::test]
    async fn a_persisted_session_survives_reopening() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let store = FileSessionStore::open(path.clone()).await.unwrap();
        store.update(signed_in_patch()).await;

        let reopened = FileSessionStore::open(path).await.unwrap();
        let session = reopened.read().await;

        assert_eq!(session.state, SessionState::Valid);
        assert_eq!(
            session.tokens.map(|t| t.access_expiry()),
            Some(UnixTime(1_726_000_000))
        );
    }

    #[tokio::test]
    async fn a_missing_file_opens_as_signed_out() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::open(dir.path().join("absent.json"))
            .await
            .unwrap();

        let session = store.read().await;
        assert_eq!(session.state, SessionState::Unauthenticated);
        assert!(session.tokens.is_none());
    }

    #[tokio::test]
    async fn a_corrupt_file_refuses_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{not json").unwrap();

        assert!(FileSessionStore::open(path).await.is_err());
    }
}
