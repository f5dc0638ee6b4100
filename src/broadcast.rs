//! Room-based fan-out of poll updates
//!
//! Each connection owns an outbox channel; rooms map a poll id to the outboxes
//! of the connections watching it. Publishing is fire-and-forget: a full
//! outbox drops the update, a closed one is pruned, nothing is retried.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;

use crate::protocol::ServerMessage;
use crate::types::{ConnectionId, PollId};

/// Updates a connection may have queued before further ones are dropped
pub const OUTBOX_CAPACITY: usize = 64;

/// Sending half of a connection's outbound queue
pub type Outbox = mpsc::Sender<ServerMessage>;

/// A connection as seen by the broadcaster
#[derive(Debug, Clone)]
pub struct Subscriber {
    pub id: ConnectionId,
    pub outbox: Outbox,
}

impl Subscriber {
    /// New subscriber with a fresh id, plus the receiving half of its outbox
    pub fn channel() -> (Self, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
        let subscriber = Self {
            id: ulid::Ulid::new().to_string(),
            outbox: tx,
        };
        (subscriber, rx)
    }
}

#[derive(Default)]
struct Rooms {
    by_poll: HashMap<PollId, HashMap<ConnectionId, Outbox>>,
    by_connection: HashMap<ConnectionId, HashSet<PollId>>,
}

impl Rooms {
    fn remove(&mut self, poll_id: &str, conn_id: &str) -> bool {
        let mut removed = false;
        if let Some(members) = self.by_poll.get_mut(poll_id) {
            removed = members.remove(conn_id).is_some();
            if members.is_empty() {
                self.by_poll.remove(poll_id);
            }
        }
        if let Some(rooms) = self.by_connection.get_mut(conn_id) {
            rooms.remove(poll_id);
            if rooms.is_empty() {
                self.by_connection.remove(conn_id);
            }
        }
        removed
    }
}

#[derive(Clone, Default)]
pub struct RoomBroadcaster {
    rooms: Arc<RwLock<Rooms>>,
}

impl RoomBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a poll's room. Joining twice is a no-op.
    pub async fn join(&self, poll_id: &str, subscriber: &Subscriber) {
        let mut rooms = self.rooms.write().await;
        rooms
            .by_poll
            .entry(poll_id.to_string())
            .or_default()
            .insert(subscriber.id.clone(), subscriber.outbox.clone());
        rooms
            .by_connection
            .entry(subscriber.id.clone())
            .or_default()
            .insert(poll_id.to_string());
    }

    /// Remove a connection from a poll's room. Returns whether it was a member.
    pub async fn leave(&self, poll_id: &str, conn_id: &str) -> bool {
        self.rooms.write().await.remove(poll_id, conn_id)
    }

    /// Remove a connection from every room it joined
    pub async fn disconnect(&self, conn_id: &str) -> usize {
        let mut rooms = self.rooms.write().await;
        let joined = rooms.by_connection.remove(conn_id).unwrap_or_default();
        for poll_id in &joined {
            if let Some(members) = rooms.by_poll.get_mut(poll_id) {
                members.remove(conn_id);
                if members.is_empty() {
                    rooms.by_poll.remove(poll_id);
                }
            }
        }
        joined.len()
    }

    /// Deliver `msg` to everyone currently in the room. Returns the delivery count.
    pub async fn publish(&self, poll_id: &str, msg: ServerMessage) -> usize {
        let mut delivered = 0;
        let mut dropped = 0;
        let mut closed = Vec::new();

        {
            let rooms = self.rooms.read().await;
            let Some(members) = rooms.by_poll.get(poll_id) else {
                return 0;
            };
            for (conn_id, outbox) in members {
                match outbox.try_send(msg.clone()) {
                    Ok(()) => delivered += 1,
                    // Slow reader; it catches up from the next update
                    Err(TrySendError::Full(_)) => dropped += 1,
                    Err(TrySendError::Closed(_)) => closed.push(conn_id.clone()),
                }
            }
        }

        if dropped > 0 {
            tracing::debug!(poll_id, dropped, "Dropped update for lagging subscribers");
        }

        if !closed.is_empty() {
            tracing::debug!(poll_id, closed = closed.len(), "Pruning closed subscribers");
            let mut rooms = self.rooms.write().await;
            for conn_id in &closed {
                rooms.remove(poll_id, conn_id);
            }
        }

        delivered
    }

    pub async fn room_size(&self, poll_id: &str) -> usize {
        self.rooms
            .read()
            .await
            .by_poll
            .get(poll_id)
            .map(|m| m.len())
            .unwrap_or(0)
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.by_poll.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ping(code: &str) -> ServerMessage {
        ServerMessage::Error {
            code: code.to_string(),
            msg: String::new(),
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_only_room_members() {
        let rooms = RoomBroadcaster::new();
        let (a, mut rx_a) = Subscriber::channel();
        let (b, mut rx_b) = Subscriber::channel();
        let (outsider, mut rx_out) = Subscriber::channel();

        rooms.join("poll-1", &a).await;
        rooms.join("poll-1", &b).await;
        rooms.join("poll-2", &outsider).await;

        assert_eq!(rooms.publish("poll-1", ping("x")).await, 2);

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_out.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_join_is_idempotent() {
        let rooms = RoomBroadcaster::new();
        let (a, mut rx) = Subscriber::channel();

        rooms.join("poll-1", &a).await;
        rooms.join("poll-1", &a).await;
        assert_eq!(rooms.room_size("poll-1").await, 1);

        rooms.publish("poll-1", ping("x")).await;
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_leave_is_idempotent_and_prunes_room() {
        let rooms = RoomBroadcaster::new();
        let (a, _rx) = Subscriber::channel();

        rooms.join("poll-1", &a).await;
        assert!(rooms.leave("poll-1", &a.id).await);
        assert!(!rooms.leave("poll-1", &a.id).await);
        assert_eq!(rooms.room_count().await, 0);
        assert_eq!(rooms.publish("poll-1", ping("x")).await, 0);
    }

    #[tokio::test]
    async fn test_disconnect_leaves_every_room() {
        let rooms = RoomBroadcaster::new();
        let (a, _rx_a) = Subscriber::channel();
        let (b, _rx_b) = Subscriber::channel();

        rooms.join("poll-1", &a).await;
        rooms.join("poll-2", &a).await;
        rooms.join("poll-2", &b).await;

        assert_eq!(rooms.disconnect(&a.id).await, 2);
        assert_eq!(rooms.room_size("poll-1").await, 0);
        assert_eq!(rooms.room_size("poll-2").await, 1);
        assert_eq!(rooms.room_count().await, 1);
    }

    #[tokio::test]
    async fn test_publish_prunes_closed_outboxes() {
        let rooms = RoomBroadcaster::new();
        let (a, rx_a) = Subscriber::channel();
        let (b, mut rx_b) = Subscriber::channel();

        rooms.join("poll-1", &a).await;
        rooms.join("poll-1", &b).await;
        drop(rx_a);

        assert_eq!(rooms.publish("poll-1", ping("x")).await, 1);
        assert!(rx_b.try_recv().is_ok());
        assert_eq!(rooms.room_size("poll-1").await, 1);
    }

    #[tokio::test]
    async fn test_stalled_subscriber_queue_is_bounded() {
        let rooms = RoomBroadcaster::new();
        let (stalled, mut rx_stalled) = Subscriber::channel();
        let (live, mut rx_live) = Subscriber::channel();

        rooms.join("poll-1", &stalled).await;
        rooms.join("poll-1", &live).await;

        let mut delivered = 0;
        for _ in 0..OUTBOX_CAPACITY * 3 {
            delivered += rooms.publish("poll-1", ping("x")).await;
            // Only the live subscriber keeps reading
            assert!(rx_live.try_recv().is_ok());
        }

        assert_eq!(delivered, OUTBOX_CAPACITY * 3 + OUTBOX_CAPACITY);
        let mut queued = 0;
        while rx_stalled.try_recv().is_ok() {
            queued += 1;
        }
        assert_eq!(queued, OUTBOX_CAPACITY);

        // Lagging is not leaving: the stalled subscriber stays in the room
        assert_eq!(rooms.room_size("poll-1").await, 2);
        assert_eq!(rooms.publish("poll-1", ping("y")).await, 2);
    }
}
