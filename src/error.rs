//! Error taxonomy for the vote pipeline
//!
//! Every failure ends a single vote attempt and is reported privately to the
//! submitter with a stable reason code.

use crate::types::DuplicateSignal;
use std::time::Duration;

/// Result type for vote processing
pub type VoteResult<T> = Result<T, VoteError>;

#[derive(Debug, thiserror::Error)]
pub enum VoteError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Poll not found")]
    PollNotFound,

    #[error("Invalid option selected")]
    InvalidOption,

    #[error("You have already voted in this poll")]
    AlreadyVoted(DuplicateSignal),

    #[error("Too many voting attempts. Please try again later.")]
    RateLimited { retry_after: Duration },

    #[error("Vote conflicted with a concurrent submission")]
    StorageConflict,

    #[error("Poll storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Unexpected failure: {0}")]
    Internal(String),
}

impl VoteError {
    /// Stable reason code sent to clients
    pub fn reason(&self) -> &'static str {
        match self {
            VoteError::InvalidRequest(_) => "invalid_request",
            VoteError::PollNotFound => "poll_not_found",
            VoteError::InvalidOption => "invalid_option",
            VoteError::AlreadyVoted(DuplicateSignal::Origin) => "ip_already_voted",
            VoteError::AlreadyVoted(DuplicateSignal::Fingerprint) => "browser_already_voted",
            VoteError::RateLimited { .. } => "rate_limited",
            VoteError::StorageConflict => "storage_conflict",
            VoteError::StorageUnavailable(_) => "storage_unavailable",
            VoteError::Internal(_) => "internal_error",
        }
    }

    /// Message safe to show the submitter. Storage and internal details stay in the logs.
    pub fn client_message(&self) -> String {
        match self {
            VoteError::StorageUnavailable(_) | VoteError::Internal(_) => {
                "Failed to record vote".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Whole seconds to wait before retrying, rounded up
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            VoteError::RateLimited { retry_after } => Some(ceil_secs(*retry_after)),
            _ => None,
        }
    }
}

fn ceil_secs(d: Duration) -> u64 {
    let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
    secs.max(1)
}
