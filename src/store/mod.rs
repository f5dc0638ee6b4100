//! Poll persistence contract
//!
//! The engine only ever mutates a poll through `record_vote`, which must apply
//! the whole compound update (option counter, total, both dedup sets) as one
//! conditional operation.

pub mod export;
mod memory;

use async_trait::async_trait;

use crate::types::{DuplicateSignal, Poll, PollId};

pub use export::{PollStoreExport, SnapshotError, SnapshotFile, EXPORT_SCHEMA_VERSION};
pub use memory::InMemoryPollStore;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("poll {0} not found")]
    NotFound(PollId),

    /// The conditional write lost a race. Carries the colliding signal when the
    /// store can tell which one it was.
    #[error("vote conflicts with a concurrent write ({0:?})")]
    Conflict(Option<DuplicateSignal>),

    #[error("option index {index} out of range for {option_count} options")]
    InvalidOption { index: i64, option_count: usize },

    #[error("poll {0} already exists")]
    AlreadyExists(PollId),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait PollStore: Send + Sync {
    async fn find_poll(&self, id: &str) -> StoreResult<Poll>;

    /// Atomically count one vote for `option_index`.
    ///
    /// Succeeds only if neither `origin` nor `fingerprint` has voted on this
    /// poll yet; otherwise returns `Conflict` and leaves the poll untouched.
    async fn record_vote(
        &self,
        id: &str,
        option_index: i64,
        origin: &str,
        fingerprint: Option<&str>,
    ) -> StoreResult<Poll>;

    async fn insert_poll(&self, poll: Poll) -> StoreResult<Poll>;

    /// Newest first
    async fn list_polls(&self, limit: usize) -> StoreResult<Vec<Poll>>;
}
