use crate::abuse::{AbuseConfig, RateLimiter};
use crate::broadcast::RoomBroadcaster;
use crate::engine::VotingEngine;
use crate::store::{InMemoryPollStore, PollStore};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn PollStore>,
    pub rooms: RoomBroadcaster,
    pub engine: VotingEngine,
    /// Per-origin vote limiter (None = disabled)
    pub rate_limiter: Option<RateLimiter>,
    /// Cancelled once the server stops accepting connections
    pub shutdown: CancellationToken,
    /// Live WebSocket connection tasks
    pub connections: TaskTracker,
}

impl AppState {
    pub fn new(store: Arc<dyn PollStore>, rate_limiter: Option<RateLimiter>) -> Self {
        let rooms = RoomBroadcaster::new();
        let engine = VotingEngine::new(store.clone(), rooms.clone());
        Self {
            store,
            rooms,
            engine,
            rate_limiter,
            shutdown: CancellationToken::new(),
            connections: TaskTracker::new(),
        }
    }

    pub fn with_abuse_config(store: Arc<dyn PollStore>, abuse: &AbuseConfig) -> Self {
        Self::new(store, abuse.rate_limiter.clone())
    }

    /// In-memory store and default limiter, mainly for tests
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryPollStore::new()),
            Some(RateLimiter::default()),
        )
    }

    /// Ask every connection to close and wait until their tasks have finished.
    /// A vote already being processed completes first.
    pub async fn close_connections(&self) {
        self.shutdown.cancel();
        self.connections.close();
        self.connections.wait().await;
        tracing::debug!("All WebSocket connections closed");
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::in_memory()
    }
}
