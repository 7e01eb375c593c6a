//! In-memory [`SocialStore`] adapter. Backs the social engine's tests and
//! lets embedders run without a PostgreSQL instance; keeps the same conflict
//! semantics as the SQL statements (canonical edge pair, unique codes,
//! pending-only request deletes).

use crate::{
    BlockRecord, FriendEdgeRecord, FriendRequestRecord, PlayerId, PreferenceRow, RequestStatus,
    SocialStore, StorageError, edge_key,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Default)]
struct Inner {
    edges: Vec<FriendEdgeRecord>,
    requests: HashMap<(PlayerId, PlayerId), FriendRequestRecord>,
    blocks: HashMap<(PlayerId, PlayerId), BlockRecord>,
    codes_by_owner: HashMap<PlayerId, String>,
    owners_by_code: HashMap<String, PlayerId>,
    preferences: HashMap<PlayerId, PreferenceRow>,
}

#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Inner {
    fn edge_index(&self, a: &PlayerId, b: &PlayerId) -> Option<usize> {
        let (low, high) = edge_key(a, b);
        self.edges
            .iter()
            .position(|edge| edge.player_low == low && edge.player_high == high)
    }
}

#[async_trait]
impl SocialStore for MemoryStorage {
    async fn load_friendships(
        &self,
        player: &PlayerId,
    ) -> Result<Vec<FriendEdgeRecord>, StorageError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .edges
            .iter()
            .filter(|edge| edge.other(player).is_some())
            .cloned()
            .collect())
    }

    async fn friendship_exists(&self, a: &PlayerId, b: &PlayerId) -> Result<bool, StorageError> {
        let inner = self.inner.lock().await;
        Ok(inner.edge_index(a, b).is_some())
    }

    async fn delete_friendship(&self, a: &PlayerId, b: &PlayerId) -> Result<bool, StorageError> {
        let mut inner = self.inner.lock().await;
        match inner.edge_index(a, b) {
            Some(index) => {
                inner.edges.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_favorite(
        &self,
        owner: &PlayerId,
        friend: &PlayerId,
        favorite: bool,
    ) -> Result<bool, StorageError> {
        let mut inner = self.inner.lock().await;
        let Some(index) = inner.edge_index(owner, friend) else {
            return Ok(false);
        };
        let edge = &mut inner.edges[index];
        if &edge.player_low == owner {
            edge.favorite_of_low = favorite;
        } else {
            edge.favorite_of_high = favorite;
        }
        Ok(true)
    }

    async fn bump_interactions(&self, a: &PlayerId, b: &PlayerId) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;
        if let Some(index) = inner.edge_index(a, b) {
            inner.edges[index].interactions += 1;
        }
        Ok(())
    }

    async fn upsert_pending_request(
        &self,
        request: &FriendRequestRecord,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;
        let mut record = request.clone();
        record.status = RequestStatus::Pending;
        inner
            .requests
            .insert((record.sender.clone(), record.receiver.clone()), record);
        Ok(())
    }

    async fn pending_request_exists(
        &self,
        sender: &PlayerId,
        receiver: &PlayerId,
    ) -> Result<bool, StorageError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .requests
            .get(&(sender.clone(), receiver.clone()))
            .map(|request| request.status == RequestStatus::Pending)
            .unwrap_or(false))
    }

    async fn load_pending_requests(
        &self,
        receiver: &PlayerId,
    ) -> Result<Vec<FriendRequestRecord>, StorageError> {
        let inner = self.inner.lock().await;
        let mut requests: Vec<FriendRequestRecord> = inner
            .requests
            .values()
            .filter(|request| {
                &request.receiver == receiver && request.status == RequestStatus::Pending
            })
            .cloned()
            .collect();
        requests.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(requests)
    }

    async fn accept_request(
        &self,
        sender: &PlayerId,
        receiver: &PlayerId,
        accepted_at: DateTime<Utc>,
    ) -> Result<Option<FriendEdgeRecord>, StorageError> {
        let mut inner = self.inner.lock().await;
        let key = (sender.clone(), receiver.clone());
        let pending = inner
            .requests
            .get(&key)
            .map(|request| request.status == RequestStatus::Pending)
            .unwrap_or(false);
        if !pending {
            return Ok(None);
        }
        if let Some(request) = inner.requests.get_mut(&key) {
            request.status = RequestStatus::Accepted;
        }
        if inner.edge_index(sender, receiver).is_some() {
            return Ok(None);
        }
        let (low, high) = edge_key(sender, receiver);
        let edge = FriendEdgeRecord {
            player_low: low,
            player_high: high,
            favorite_of_low: false,
            favorite_of_high: false,
            interactions: 0,
            created_at: accepted_at,
        };
        inner.edges.push(edge.clone());
        Ok(Some(edge))
    }

    async fn delete_pending_request(
        &self,
        sender: &PlayerId,
        receiver: &PlayerId,
    ) -> Result<bool, StorageError> {
        let mut inner = self.inner.lock().await;
        let key = (sender.clone(), receiver.clone());
        let pending = inner
            .requests
            .get(&key)
            .map(|request| request.status == RequestStatus::Pending)
            .unwrap_or(false);
        if pending {
            inner.requests.remove(&key);
        }
        Ok(pending)
    }

    async fn load_all_blocks(&self) -> Result<Vec<BlockRecord>, StorageError> {
        let inner = self.inner.lock().await;
        Ok(inner.blocks.values().cloned().collect())
    }

    async fn upsert_block(&self, record: &BlockRecord) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;
        let key = (record.blocker.clone(), record.blocked.clone());
        match inner.blocks.get_mut(&key) {
            Some(existing) => {
                existing.reason = record.reason.clone();
                existing.updated_at = record.updated_at;
            }
            None => {
                inner.blocks.insert(key, record.clone());
            }
        }
        Ok(())
    }

    async fn delete_block(
        &self,
        blocker: &PlayerId,
        blocked: &PlayerId,
    ) -> Result<bool, StorageError> {
        let mut inner = self.inner.lock().await;
        Ok(inner
            .blocks
            .remove(&(blocker.clone(), blocked.clone()))
            .is_some())
    }

    async fn load_code(&self, owner: &PlayerId) -> Result<Option<String>, StorageError> {
        let inner = self.inner.lock().await;
        Ok(inner.codes_by_owner.get(owner).cloned())
    }

    async fn resolve_code(&self, code: &str) -> Result<Option<PlayerId>, StorageError> {
        let inner = self.inner.lock().await;
        Ok(inner.owners_by_code.get(code).cloned())
    }

    async fn try_insert_code(
        &self,
        owner: &PlayerId,
        code: &str,
        _created_at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let mut inner = self.inner.lock().await;
        if inner.owners_by_code.contains_key(code) || inner.codes_by_owner.contains_key(owner) {
            return Ok(false);
        }
        inner.codes_by_owner.insert(owner.clone(), code.to_string());
        inner.owners_by_code.insert(code.to_string(), owner.clone());
        Ok(true)
    }

    async fn delete_code(&self, owner: &PlayerId) -> Result<bool, StorageError> {
        let mut inner = self.inner.lock().await;
        match inner.codes_by_owner.remove(owner) {
            Some(code) => {
                inner.owners_by_code.remove(&code);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn load_preferences(
        &self,
        owner: &PlayerId,
    ) -> Result<Option<PreferenceRow>, StorageError> {
        let inner = self.inner.lock().await;
        Ok(inner.preferences.get(owner).cloned())
    }

    async fn upsert_preferences(&self, row: &PreferenceRow) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;
        inner.preferences.insert(row.owner.clone(), row.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(sender: &str, receiver: &str) -> FriendRequestRecord {
        FriendRequestRecord {
            sender: PlayerId::from(sender),
            receiver: PlayerId::from(receiver),
            message: String::new(),
            status: RequestStatus::Pending,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn accept_consumes_pending_and_creates_edge() {
        let store = MemoryStorage::new();
        let alice = PlayerId::from("alice");
        let bob = PlayerId::from("bob");
        store
            .upsert_pending_request(&pending("alice", "bob"))
            .await
            .unwrap();
        let edge = store
            .accept_request(&alice, &bob, Utc::now())
            .await
            .unwrap()
            .expect("edge");
        assert_eq!(edge.other(&alice), Some(&bob));
        assert!(!store.pending_request_exists(&alice, &bob).await.unwrap());
        assert!(
            store
                .accept_request(&alice, &bob, Utc::now())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn code_uniqueness_is_enforced() {
        let store = MemoryStorage::new();
        let alice = PlayerId::from("alice");
        let bob = PlayerId::from("bob");
        assert!(
            store
                .try_insert_code(&alice, "AAAA-0000", Utc::now())
                .await
                .unwrap()
        );
        assert!(
            !store
                .try_insert_code(&bob, "AAAA-0000", Utc::now())
                .await
                .unwrap()
        );
        assert!(store.delete_code(&alice).await.unwrap());
        assert!(
            store
                .try_insert_code(&bob, "AAAA-0000", Utc::now())
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn delete_pending_ignores_terminal_rows() {
        let store = MemoryStorage::new();
        let alice = PlayerId::from("alice");
        let bob = PlayerId::from("bob");
        store
            .upsert_pending_request(&pending("alice", "bob"))
            .await
            .unwrap();
        store
            .accept_request(&alice, &bob, Utc::now())
            .await
            .unwrap();
        assert!(!store.delete_pending_request(&alice, &bob).await.unwrap());
    }
}
