use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{PollStore, PollStoreExport, SnapshotError, StoreError, StoreResult};
use crate::types::{Poll, PollId};

/// Process-local poll store.
///
/// `record_vote` does its dedup check and its mutation under one write-lock
/// acquisition, which is what makes it a conditional update.
#[derive(Clone, Default)]
pub struct InMemoryPollStore {
    polls: Arc<RwLock<HashMap<PollId, Poll>>>,
}

impl InMemoryPollStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serializable copy of every poll
    pub async fn export(&self) -> PollStoreExport {
        let polls = self.polls.read().await;
        let mut list: Vec<Poll> = polls.values().cloned().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        PollStoreExport::new(list)
    }

    /// Replace the store's contents with a snapshot
    pub async fn import(&self, export: PollStoreExport) -> Result<usize, SnapshotError> {
        export.check()?;
        let count = export.polls.len();
        let map: HashMap<PollId, Poll> = export
            .polls
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();
        *self.polls.write().await = map;
        Ok(count)
    }
}

#[async_trait]
impl PollStore for InMemoryPollStore {
    async fn find_poll(&self, id: &str) -> StoreResult<Poll> {
        self.polls
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn record_vote(
        &self,
        id: &str,
        option_index: i64,
        origin: &str,
        fingerprint: Option<&str>,
    ) -> StoreResult<Poll> {
        let mut polls = self.polls.write().await;
        let poll = polls
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let option_count = poll.options.len();
        let index = usize::try_from(option_index)
            .ok()
            .filter(|i| *i < option_count)
            .ok_or(StoreError::InvalidOption {
                index: option_index,
                option_count,
            })?;

        if let Some(signal) = poll.duplicate_signal(origin, fingerprint) {
            return Err(StoreError::Conflict(Some(signal)));
        }

        poll.options[index].votes += 1;
        poll.total_votes += 1;
        poll.voted_origins.insert(origin.to_string());
        if let Some(fp) = fingerprint {
            poll.voted_fingerprints.insert(fp.to_string());
        }
        poll.version += 1;
        poll.updated_at = Utc::now();

        Ok(poll.clone())
    }

    async fn insert_poll(&self, poll: Poll) -> StoreResult<Poll> {
        let mut polls = self.polls.write().await;
        if polls.contains_key(&poll.id) {
            return Err(StoreError::AlreadyExists(poll.id));
        }
        polls.insert(poll.id.clone(), poll.clone());
        Ok(poll)
    }

    async fn list_polls(&self, limit: usize) -> StoreResult<Vec<Poll>> {
        let polls = self.polls.read().await;
        let mut list: Vec<Poll> = polls.values().cloned().collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        list.truncate(limit);
        Ok(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DuplicateSignal;

    async fn store_with_poll(options: &[&str]) -> (InMemoryPollStore, Poll) {
        let store = InMemoryPollStore::new();
        let poll = Poll::new(
            "Favourite?".to_string(),
            options.iter().map(|s| s.to_string()).collect(),
            None,
        );
        let poll = store.insert_poll(poll).await.unwrap();
        (store, poll)
    }

    #[tokio::test]
    async fn test_record_vote_applies_compound_update() {
        let (store, poll) = store_with_poll(&["A", "B"]).await;

        let updated = store
            .record_vote(&poll.id, 1, "1.1.1.1", Some("fp-1"))
            .await
            .unwrap();

        assert_eq!(updated.options[1].votes, 1);
        assert_eq!(updated.total_votes, 1);
        assert!(updated.has_voted_by_origin("1.1.1.1"));
        assert!(updated.has_voted_by_fingerprint("fp-1"));
        assert_eq!(updated.version, poll.version + 1);
    }

    #[tokio::test]
    async fn test_record_vote_conflicts_on_origin() {
        let (store, poll) = store_with_poll(&["A", "B"]).await;
        store.record_vote(&poll.id, 0, "1.1.1.1", None).await.unwrap();

        let result = store.record_vote(&poll.id, 1, "1.1.1.1", Some("x")).await;
        assert!(matches!(
            result,
            Err(StoreError::Conflict(Some(DuplicateSignal::Origin)))
        ));

        let current = store.find_poll(&poll.id).await.unwrap();
        assert_eq!(current.total_votes, 1);
        assert!(!current.has_voted_by_fingerprint("x"));
    }

    #[tokio::test]
    async fn test_record_vote_conflicts_on_fingerprint() {
        let (store, poll) = store_with_poll(&["A", "B"]).await;
        store
            .record_vote(&poll.id, 0, "1.1.1.1", Some("fp"))
            .await
            .unwrap();

        let result = store.record_vote(&poll.id, 0, "2.2.2.2", Some("fp")).await;
        assert!(matches!(
            result,
            Err(StoreError::Conflict(Some(DuplicateSignal::Fingerprint)))
        ));
    }

    #[tokio::test]
    async fn test_record_vote_rejects_out_of_range() {
        let (store, poll) = store_with_poll(&["A", "B", "C"]).await;

        for index in [3, 99, -1] {
            let result = store.record_vote(&poll.id, index, "o", None).await;
            assert!(matches!(result, Err(StoreError::InvalidOption { .. })));
        }
        assert_eq!(store.find_poll(&poll.id).await.unwrap().total_votes, 0);
    }

    #[tokio::test]
    async fn test_missing_poll() {
        let store = InMemoryPollStore::new();
        assert!(matches!(
            store.find_poll("01ARZ3NDEKTSV4RRFFQ69G5FAV").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_insert_twice_rejected() {
        let (store, poll) = store_with_poll(&["A", "B"]).await;
        assert!(matches!(
            store.insert_poll(poll).await,
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_votes_do_not_lose_increments() {
        let (store, poll) = store_with_poll(&["A", "B"]).await;

        let mut handles = Vec::new();
        for i in 0..100 {
            let store = store.clone();
            let id = poll.id.clone();
            handles.push(tokio::spawn(async move {
                store
                    .record_vote(&id, i % 2, &format!("10.0.0.{}", i), None)
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let current = store.find_poll(&poll.id).await.unwrap();
        assert_eq!(current.total_votes, 100);
        assert_eq!(current.options[0].votes, 50);
        assert_eq!(current.options[1].votes, 50);
        assert_eq!(current.tallied_votes(), current.total_votes);
    }

    #[tokio::test]
    async fn test_list_polls_newest_first() {
        let store = InMemoryPollStore::new();
        let mut older = Poll::new("Old?".into(), vec!["a".into(), "b".into()], None);
        older.created_at = older.created_at - chrono::Duration::minutes(5);
        let newer = Poll::new("New?".into(), vec!["a".into(), "b".into()], None);

        store.insert_poll(older.clone()).await.unwrap();
        store.insert_poll(newer.clone()).await.unwrap();

        let list = store.list_polls(50).await.unwrap();
        assert_eq!(list[0].id, newer.id);
        assert_eq!(list[1].id, older.id);

        assert_eq!(store.list_polls(1).await.unwrap().len(), 1);
    }
}
