//! Vote processing pipeline
//!
//! `Received -> Validated -> DedupChecked -> TallyCommitted -> Broadcast ->
//! Acknowledged`, short-circuiting to a rejection from any checking step.
//! A rejection never mutates the poll and never reaches the room.

use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::broadcast::RoomBroadcaster;
use crate::error::{VoteError, VoteResult};
use crate::protocol::ServerMessage;
use crate::store::{PollStore, StoreError};
use crate::types::{OriginAddress, Poll, PollSnapshot};
use crate::validate::{self, VoteRequest};

/// How many times a lost conditional write is re-checked before giving up
const CONFLICT_RETRIES: usize = 1;

#[derive(Clone)]
pub struct VotingEngine {
    store: Arc<dyn PollStore>,
    rooms: RoomBroadcaster,
}

impl VotingEngine {
    pub fn new(store: Arc<dyn PollStore>, rooms: RoomBroadcaster) -> Self {
        Self { store, rooms }
    }

    pub fn rooms(&self) -> &RoomBroadcaster {
        &self.rooms
    }

    /// Run one vote through the pipeline.
    ///
    /// On success the new snapshot has already been published to the poll's
    /// room; the caller owes the submitter a private ack with the same snapshot.
    pub async fn submit_vote(
        &self,
        poll_id: &Value,
        option_index: &Value,
        fingerprint: Option<&Value>,
        origin: OriginAddress,
    ) -> VoteResult<PollSnapshot> {
        let request = validate::validate(poll_id, option_index, fingerprint, origin)?;

        let updated = self.guarded_commit(&request).await?;
        debug_assert_eq!(updated.total_votes, updated.tallied_votes());

        let snapshot = PollSnapshot::from_poll(&updated);
        let delivered = self
            .rooms
            .publish(&request.poll_id, ServerMessage::Update(snapshot.clone()))
            .await;

        tracing::info!(
            poll_id = %request.poll_id,
            option_index = request.option_index,
            origin = %request.origin,
            total_votes = snapshot.total_votes,
            delivered,
            "Vote recorded"
        );

        Ok(snapshot)
    }

    /// Run `commit`, turning a panic anywhere in the store calls into an
    /// internal error so it ends this vote, not the connection.
    async fn guarded_commit(&self, request: &VoteRequest) -> VoteResult<Poll> {
        match AssertUnwindSafe(self.commit(request)).catch_unwind().await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(poll_id = %request.poll_id, "Poll store panicked while recording vote");
                Err(VoteError::Internal("store panicked".to_string()))
            }
        }
    }

    /// Dedup check followed by the conditional write, re-checking once if the
    /// write loses a race against a concurrent vote.
    async fn commit(&self, request: &VoteRequest) -> VoteResult<Poll> {
        let mut attempts = 0;
        loop {
            self.dedup_check(request).await?;

            match self.record(request).await {
                Ok(poll) => return Ok(poll),
                Err(StoreError::Conflict(signal)) => {
                    tracing::debug!(
                        poll_id = %request.poll_id,
                        origin = %request.origin,
                        ?signal,
                        attempts,
                        "Conditional write lost a race"
                    );
                    if attempts >= CONFLICT_RETRIES {
                        return Err(match signal {
                            Some(signal) => VoteError::AlreadyVoted(signal),
                            None => VoteError::StorageConflict,
                        });
                    }
                    attempts += 1;
                }
                Err(e) => return Err(self.store_failure(request, e)),
            }
        }
    }

    /// Fetch the poll and reject out-of-range options and repeat voters
    async fn dedup_check(&self, request: &VoteRequest) -> VoteResult<Poll> {
        let poll = self
            .store
            .find_poll(&request.poll_id)
            .await
            .map_err(|e| self.store_failure(request, e))?;

        let in_range = usize::try_from(request.option_index)
            .map(|i| i < poll.options.len())
            .unwrap_or(false);
        if !in_range {
            return Err(VoteError::InvalidOption);
        }

        if let Some(signal) =
            poll.duplicate_signal(&request.origin, request.fingerprint.as_deref())
        {
            tracing::info!(
                poll_id = %request.poll_id,
                origin = %request.origin,
                ?signal,
                "Repeat vote rejected"
            );
            return Err(VoteError::AlreadyVoted(signal));
        }

        Ok(poll)
    }

    async fn record(&self, request: &VoteRequest) -> Result<Poll, StoreError> {
        self.store
            .record_vote(
                &request.poll_id,
                request.option_index,
                &request.origin,
                request.fingerprint.as_deref(),
            )
            .await
    }

    fn store_failure(&self, request: &VoteRequest, err: StoreError) -> VoteError {
        match err {
            StoreError::NotFound(_) => VoteError::PollNotFound,
            StoreError::InvalidOption { .. } => VoteError::InvalidOption,
            StoreError::Conflict(Some(signal)) => VoteError::AlreadyVoted(signal),
            StoreError::Conflict(None) => VoteError::StorageConflict,
            StoreError::Unavailable(detail) => {
                tracing::error!(poll_id = %request.poll_id, %detail, "Poll store unavailable");
                VoteError::StorageUnavailable(detail)
            }
            StoreError::AlreadyExists(id) => {
                tracing::error!(poll_id = %id, "Unexpected store response while voting");
                VoteError::Internal(format!("unexpected store response for poll {}", id))
            }
        }
    }
}
