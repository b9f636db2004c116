//! Durable storage of conversations, keyed by thread id.

mod fs;
mod memory;

use async_trait::async_trait;

use crate::conversation::Conversation;

pub use fs::FsStateStore;
pub use memory::MemoryStateStore;

/// An error returned by a [`StateStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The thread id cannot be used as a storage key.
    #[error("invalid thread id `{0}`")]
    InvalidThreadId(String),
    /// The underlying storage failed.
    #[error("I/O error on thread `{thread_id}`: {source}")]
    Io {
        /// The thread being accessed.
        thread_id: String,
        /// The cause.
        #[source]
        source: std::io::Error,
    },
    /// The stored state cannot be decoded or encoded.
    #[error("malformed state of thread `{thread_id}`: {source}")]
    Malformed {
        /// The thread being accessed.
        thread_id: String,
        /// The cause.
        #[source]
        source: serde_json::Error,
    },
}

/// Persists [`Conversation`]s across process restarts.
///
/// Implementations only need to be consistent per key. The orchestrator
/// never accesses the same thread concurrently.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the state of a thread, `None` if it was never stored or has
    /// been deleted.
    async fn get(
        &self,
        thread_id: &str,
    ) -> Result<Option<Conversation>, StoreError>;

    /// Replaces the state of a thread.
    async fn put(
        &self,
        thread_id: &str,
        conversation: &Conversation,
    ) -> Result<(), StoreError>;

    /// Deletes the state of a thread. Deleting an unknown thread is not an
    /// error.
    async fn delete(&self, thread_id: &str) -> Result<(), StoreError>;
}
