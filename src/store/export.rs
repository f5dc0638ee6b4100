//! Poll store snapshots.
//!
//! Lets the in-memory store survive a restart: `main` loads a snapshot at
//! startup and writes one on graceful shutdown.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::InMemoryPollStore;
use crate::types::{Poll, PollId};

/// Schema version for snapshot format compatibility
pub const EXPORT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported snapshot schema version {0}")]
    UnsupportedVersion(u32),

    #[error("poll {0} has totalVotes out of sync with its option counts")]
    TallyMismatch(PollId),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollStoreExport {
    pub schema_version: u32,
    /// ISO8601
    pub exported_at: String,
    pub polls: Vec<Poll>,
}

impl PollStoreExport {
    pub fn new(polls: Vec<Poll>) -> Self {
        Self {
            schema_version: EXPORT_SCHEMA_VERSION,
            exported_at: chrono::Utc::now().to_rfc3339(),
            polls,
        }
    }

    /// Reject snapshots we can't load without breaking tally invariants
    pub fn check(&self) -> Result<(), SnapshotError> {
        if self.schema_version > EXPORT_SCHEMA_VERSION {
            return Err(SnapshotError::UnsupportedVersion(self.schema_version));
        }
        if let Some(bad) = self
            .polls
            .iter()
            .find(|p| p.tallied_votes() != p.total_votes)
        {
            return Err(SnapshotError::TallyMismatch(bad.id.clone()));
        }
        Ok(())
    }

    pub async fn read_from(path: &Path) -> Result<Self, SnapshotError> {
        let bytes = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Write via a sibling temp file so a crash never leaves half a snapshot
    pub async fn write_to(&self, path: &Path) -> Result<(), SnapshotError> {
        let json = serde_json::to_vec_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

/// A snapshot location this process may write back to.
///
/// Only obtainable through `load`, which fails if an existing file can't be
/// imported. A snapshot we couldn't read is never overwritten with an empty
/// export.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    /// Import the snapshot at `path` into `store`. A missing file is an empty start.
    pub async fn load(
        path: impl Into<PathBuf>,
        store: &InMemoryPollStore,
    ) -> Result<(Self, usize), SnapshotError> {
        let path = path.into();
        if !tokio::fs::try_exists(&path).await? {
            tracing::info!(path = %path.display(), "No poll snapshot yet, starting empty");
            return Ok((Self { path }, 0));
        }

        let export = PollStoreExport::read_from(&path).await?;
        let count = store.import(export).await?;
        tracing::info!(path = %path.display(), count, "Loaded poll snapshot");
        Ok((Self { path }, count))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the store's current contents back. Returns the poll count.
    pub async fn save(&self, store: &InMemoryPollStore) -> Result<usize, SnapshotError> {
        let export = store.export().await;
        let count = export.polls.len();
        export.write_to(&self.path).await?;
        tracing::info!(path = %self.path.display(), count, "Saved poll snapshot");
        Ok(count)
    }
}
