//! WebSocket message dispatch
//!
//! This module provides the main entry point for handling client messages.
//! The transport resolves the connection's origin once at upgrade time; every
//! handler sees it through `Connection`.

use crate::broadcast::Subscriber;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::AppState;
use crate::types::OriginAddress;
use std::sync::Arc;

use super::voter;

/// Per-connection context handed to every handler
#[derive(Debug, Clone)]
pub struct Connection {
    pub subscriber: Subscriber,
    pub origin: OriginAddress,
}

impl Connection {
    pub fn new(subscriber: Subscriber, origin: OriginAddress) -> Self {
        Self { subscriber, origin }
    }
}

/// Handle client messages and return optional private response
pub async fn handle_message(
    msg: ClientMessage,
    conn: &Connection,
    state: &Arc<AppState>,
) -> Option<ServerMessage> {
    match msg {
        ClientMessage::JoinRoom { poll_id } => voter::handle_join_room(state, conn, poll_id).await,

        ClientMessage::LeaveRoom { poll_id } => {
            voter::handle_leave_room(state, conn, poll_id).await
        }

        ClientMessage::Vote {
            poll_id,
            option_index,
            fingerprint,
        } => voter::handle_vote(state, conn, poll_id, option_index, fingerprint).await,
    }
}

/// Drop the connection from every room. Committed votes stay committed.
pub async fn handle_disconnect(conn: &Connection, state: &Arc<AppState>) {
    let rooms = state.rooms.disconnect(&conn.subscriber.id).await;
    tracing::debug!(connection = %conn.subscriber.id, rooms, "Connection left all rooms");
}
