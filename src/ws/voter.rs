//! Voter message handlers
//!
//! Room membership and vote submission. Room edits are silent unless the poll
//! id is malformed; votes always get exactly one private reply.

use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

use super::handlers::Connection;
use crate::abuse::Admission;
use crate::error::VoteError;
use crate::protocol::ServerMessage;
use crate::state::AppState;
use crate::validate;

pub async fn handle_join_room(
    state: &Arc<AppState>,
    conn: &Connection,
    poll_id: String,
) -> Option<ServerMessage> {
    if !validate::is_poll_id(&poll_id) {
        tracing::debug!(connection = %conn.subscriber.id, poll_id, "Refused join for malformed poll id");
        return Some(ServerMessage::Error {
            code: "INVALID_POLL_ID".to_string(),
            msg: "Invalid poll ID".to_string(),
        });
    }

    state.rooms.join(&poll_id, &conn.subscriber).await;
    tracing::info!(connection = %conn.subscriber.id, poll_id, "Joined poll room");
    None
}

pub async fn handle_leave_room(
    state: &Arc<AppState>,
    conn: &Connection,
    poll_id: String,
) -> Option<ServerMessage> {
    if state.rooms.leave(&poll_id, &conn.subscriber.id).await {
        tracing::info!(connection = %conn.subscriber.id, poll_id, "Left poll room");
    }
    None
}

pub async fn handle_vote(
    state: &Arc<AppState>,
    conn: &Connection,
    poll_id: Value,
    option_index: Value,
    fingerprint: Option<Value>,
) -> Option<ServerMessage> {
    tracing::debug!(
        origin = %conn.origin,
        %poll_id,
        %option_index,
        "Vote received"
    );

    // Outermost check: a denied origin never reaches validation
    if let Some(ref limiter) = state.rate_limiter {
        if let Admission::Deny { retry_after } = limiter.admit(&conn.origin, Instant::now()) {
            tracing::warn!(origin = %conn.origin, ?retry_after, "Vote rate limited");
            return Some(ServerMessage::from(&VoteError::RateLimited { retry_after }));
        }
    }

    match state
        .engine
        .submit_vote(
            &poll_id,
            &option_index,
            fingerprint.as_ref(),
            conn.origin.clone(),
        )
        .await
    {
        Ok(snapshot) => Some(ServerMessage::vote_success(snapshot)),
        Err(e) => {
            tracing::debug!(origin = %conn.origin, reason = e.reason(), "Vote rejected: {}", e);
            Some(ServerMessage::from(&e))
        }
    }
}
