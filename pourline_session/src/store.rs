//! Session stores
//!
//! The session record is the only shared mutable resource in this crate.
//! Reads may come from any request handler at any time; every write is
//! funneled through the session manager, which serializes mutation behind
//! its single-flight gate. Stores therefore implement a plain last-writer-
//! wins merge and need no optimistic-concurrency token.

use async_trait::async_trait;

use crate::{Session, SessionPatch};

pub mod in_memory;

#[cfg(feature = "file")]
pub mod file;

pub use in_memory::InMemorySessionStore;

#[cfg(feature = "file")]
pub use file::FileSessionStore;

/// Durable storage for one browser session
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Reads the current session
    async fn read(&self) -> Session;

    /// Applies a partial update and returns the post-merge session
    ///
    /// The merge is atomic with respect to concurrent reads: a reader sees
    /// the session either before or after the whole patch, never in
    /// between.
    async fn update(&self, patch: SessionPatch) -> Session;
}
