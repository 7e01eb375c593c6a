use crate::SocialError;
use crate::friends::FriendRoster;
use camarade_storage::{BlockRecord, PlayerId, SocialStore};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

/// Reason recorded when the blocker gives none.
pub const DEFAULT_BLOCK_REASON: &str = "Aucune raison spécifiée";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    Blocked,
    ReasonUpdated,
    SelfTarget,
}

impl Display for BlockOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Blocked => write!(f, "player blocked"),
            Self::ReasonUpdated => write!(f, "block reason updated"),
            Self::SelfTarget => write!(f, "you cannot block yourself"),
        }
    }
}

/// Directed block relationships with a fully resident cache.
///
/// The cache is loaded in one pass at startup ([`BlockRegistry::warm`]) and
/// maintained write-through afterwards, so [`BlockRegistry::is_blocked`] is a
/// synchronous lookup usable on every interaction hot path. Mutations take
/// the registry-level `mutation` lock, which keeps the block-plus-unfriend
/// sequence for one pair from interleaving with another mutation of the same
/// pair.
pub struct BlockRegistry {
    store: Arc<dyn SocialStore>,
    sets: RwLock<HashMap<PlayerId, HashSet<PlayerId>>>,
    entries: RwLock<HashMap<(PlayerId, PlayerId), BlockRecord>>,
    mutation: Mutex<()>,
}

fn normalize_reason(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        DEFAULT_BLOCK_REASON.to_string()
    } else {
        trimmed.to_string()
    }
}

impl BlockRegistry {
    pub fn new(store: Arc<dyn SocialStore>) -> Self {
        Self {
            store,
            sets: RwLock::new(HashMap::new()),
            entries: RwLock::new(HashMap::new()),
            mutation: Mutex::new(()),
        }
    }

    /// Full-table load into the cache. Called once at startup; the cache is
    /// authoritative from then on.
    pub async fn warm(&self) -> Result<usize, SocialError> {
        let records = self.store.load_all_blocks().await.map_err(|e| {
            error!(error = %e, "block cache warm failed");
            SocialError::from(e)
        })?;
        let mut sets: HashMap<PlayerId, HashSet<PlayerId>> = HashMap::new();
        let mut entries = HashMap::new();
        for record in records {
            sets.entry(record.blocker.clone())
                .or_default()
                .insert(record.blocked.clone());
            entries.insert((record.blocker.clone(), record.blocked.clone()), record);
        }
        let count = entries.len();
        *self.sets.write() = sets;
        *self.entries.write() = entries;
        info!(entries = count, "block cache warmed");
        Ok(count)
    }

    /// Blocks `blocked` on behalf of `blocker`. An existing entry only gets
    /// its reason refreshed. A new entry removes any friendship and cancels
    /// pending requests between the pair before success is reported; the
    /// side effect is part of the operation's contract, not a follow-up.
    pub async fn block(
        &self,
        roster: &FriendRoster,
        blocker: &PlayerId,
        blocked: &PlayerId,
        reason: &str,
    ) -> Result<BlockOutcome, SocialError> {
        if blocker == blocked {
            return Ok(BlockOutcome::SelfTarget);
        }
        let _guard = self.mutation.lock().await;
        if self
            .entries
            .read()
            .contains_key(&(blocker.clone(), blocked.clone()))
        {
            self.update_reason_locked(blocker, blocked, reason).await?;
            return Ok(BlockOutcome::ReasonUpdated);
        }
        let now = Utc::now();
        let record = BlockRecord {
            blocker: blocker.clone(),
            blocked: blocked.clone(),
            reason: normalize_reason(reason),
            blocked_at: now,
            updated_at: now,
        };
        self.store.upsert_block(&record).await.map_err(|e| {
            error!(blocker = %blocker, blocked = %blocked, error = %e, "block store failed");
            SocialError::from(e)
        })?;
        self.sets
            .write()
            .entry(blocker.clone())
            .or_default()
            .insert(blocked.clone());
        self.entries
            .write()
            .insert((blocker.clone(), blocked.clone()), record);
        roster.remove_friendship(blocker, blocked).await?;
        roster.cancel_requests_between(blocker, blocked).await?;
        info!(blocker = %blocker, blocked = %blocked, "player blocked");
        Ok(BlockOutcome::Blocked)
    }

    /// Refreshes the reason on an existing entry. Returns false when no
    /// entry exists for the pair.
    pub async fn update_reason(
        &self,
        blocker: &PlayerId,
        blocked: &PlayerId,
        reason: &str,
    ) -> Result<bool, SocialError> {
        let _guard = self.mutation.lock().await;
        self.update_reason_locked(blocker, blocked, reason).await
    }

    async fn update_reason_locked(
        &self,
        blocker: &PlayerId,
        blocked: &PlayerId,
        reason: &str,
    ) -> Result<bool, SocialError> {
        let key = (blocker.clone(), blocked.clone());
        let Some(mut record) = self.entries.read().get(&key).cloned() else {
            return Ok(false);
        };
        record.reason = normalize_reason(reason);
        record.updated_at = Utc::now();
        self.store.upsert_block(&record).await.map_err(|e| {
            error!(blocker = %blocker, blocked = %blocked, error = %e, "block reason update failed");
            SocialError::from(e)
        })?;
        self.entries.write().insert(key, record);
        Ok(true)
    }

    /// Removes the directed entry. Returns false when nothing was blocked.
    pub async fn unblock(
        &self,
        blocker: &PlayerId,
        blocked: &PlayerId,
    ) -> Result<bool, SocialError> {
        let _guard = self.mutation.lock().await;
        let removed = self.store.delete_block(blocker, blocked).await.map_err(|e| {
            error!(blocker = %blocker, blocked = %blocked, error = %e, "unblock store failed");
            SocialError::from(e)
        })?;
        if removed {
            if let Some(set) = self.sets.write().get_mut(blocker) {
                set.remove(blocked);
            }
            self.entries
                .write()
                .remove(&(blocker.clone(), blocked.clone()));
            info!(blocker = %blocker, blocked = %blocked, "player unblocked");
        }
        Ok(removed)
    }

    /// Synchronous, allocation-light cache probe. The cache is authoritative
    /// after [`BlockRegistry::warm`]; there is no store fallback.
    pub fn is_blocked(&self, blocker: &PlayerId, blocked: &PlayerId) -> bool {
        self.sets
            .read()
            .get(blocker)
            .map(|set| set.contains(blocked))
            .unwrap_or(false)
    }

    /// True when either direction of the pair carries a block.
    pub fn is_blocked_either(&self, a: &PlayerId, b: &PlayerId) -> bool {
        self.is_blocked(a, b) || self.is_blocked(b, a)
    }

    /// Snapshot of everyone `blocker` has blocked. Empty set when none.
    pub fn list_blocked(&self, blocker: &PlayerId) -> HashSet<PlayerId> {
        self.sets.read().get(blocker).cloned().unwrap_or_default()
    }

    /// Cached metadata for one directed pair.
    pub fn block_info(&self, blocker: &PlayerId, blocked: &PlayerId) -> Option<BlockRecord> {
        self.entries
            .read()
            .get(&(blocker.clone(), blocked.clone()))
            .cloned()
    }

    pub fn clear(&self) {
        self.sets.write().clear();
        self.entries.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::SilentNotifier;
    use camarade_storage::memory::MemoryStorage;

    fn fixture() -> (FriendRoster, BlockRegistry) {
        let store: Arc<dyn SocialStore> = Arc::new(MemoryStorage::new());
        let roster = FriendRoster::new(Arc::clone(&store), Arc::new(SilentNotifier));
        let blocks = BlockRegistry::new(store);
        (roster, blocks)
    }

    #[tokio::test]
    async fn self_block_is_rejected() {
        let (roster, blocks) = fixture();
        let alice = PlayerId::from("alice");
        assert_eq!(
            blocks.block(&roster, &alice, &alice, "nope").await.unwrap(),
            BlockOutcome::SelfTarget
        );
    }

    #[tokio::test]
    async fn blank_reason_normalizes_to_default() {
        let (roster, blocks) = fixture();
        let alice = PlayerId::from("alice");
        let bob = PlayerId::from("bob");
        blocks.block(&roster, &alice, &bob, "   ").await.unwrap();
        let info = blocks.block_info(&alice, &bob).expect("entry cached");
        assert_eq!(info.reason, DEFAULT_BLOCK_REASON);
    }

    #[tokio::test]
    async fn reblock_updates_reason_in_place() {
        let (roster, blocks) = fixture();
        let alice = PlayerId::from("alice");
        let bob = PlayerId::from("bob");
        assert_eq!(
            blocks.block(&roster, &alice, &bob, "spam").await.unwrap(),
            BlockOutcome::Blocked
        );
        assert_eq!(
            blocks
                .block(&roster, &alice, &bob, "harassment")
                .await
                .unwrap(),
            BlockOutcome::ReasonUpdated
        );
        let info = blocks.block_info(&alice, &bob).expect("entry cached");
        assert_eq!(info.reason, "harassment");
        assert_eq!(blocks.list_blocked(&alice).len(), 1);
    }

    #[tokio::test]
    async fn update_reason_requires_existing_entry() {
        let (_, blocks) = fixture();
        let alice = PlayerId::from("alice");
        let bob = PlayerId::from("bob");
        assert!(!blocks.update_reason(&alice, &bob, "late").await.unwrap());
    }

    #[tokio::test]
    async fn unblock_clears_cache_and_store() {
        let (roster, blocks) = fixture();
        let alice = PlayerId::from("alice");
        let bob = PlayerId::from("bob");
        blocks.block(&roster, &alice, &bob, "spam").await.unwrap();
        assert!(blocks.is_blocked(&alice, &bob));
        assert!(blocks.unblock(&alice, &bob).await.unwrap());
        assert!(!blocks.is_blocked(&alice, &bob));
        assert!(!blocks.unblock(&alice, &bob).await.unwrap());
    }

    #[tokio::test]
    async fn block_is_directional_but_either_probe_is_not() {
        let (roster, blocks) = fixture();
        let alice = PlayerId::from("alice");
        let bob = PlayerId::from("bob");
        blocks.block(&roster, &alice, &bob, "spam").await.unwrap();
        assert!(blocks.is_blocked(&alice, &bob));
        assert!(!blocks.is_blocked(&bob, &alice));
        assert!(blocks.is_blocked_either(&bob, &alice));
    }

    #[tokio::test]
    async fn snapshot_is_detached_from_later_mutation() {
        let (roster, blocks) = fixture();
        let alice = PlayerId::from("alice");
        let bob = PlayerId::from("bob");
        blocks.block(&roster, &alice, &bob, "spam").await.unwrap();
        let snapshot = blocks.list_blocked(&alice);
        blocks.unblock(&alice, &bob).await.unwrap();
        assert!(snapshot.contains(&bob));
        assert!(blocks.list_blocked(&alice).is_empty());
    }

    #[tokio::test]
    async fn warm_rebuilds_cache_from_store() {
        let store: Arc<dyn SocialStore> = Arc::new(MemoryStorage::new());
        let record = BlockRecord {
            blocker: PlayerId::from("alice"),
            blocked: PlayerId::from("bob"),
            reason: "spam".to_string(),
            blocked_at: Utc::now(),
            updated_at: Utc::now(),
        };
        store.upsert_block(&record).await.unwrap();
        let blocks = BlockRegistry::new(store);
        assert!(!blocks.is_blocked(&record.blocker, &record.blocked));
        assert_eq!(blocks.warm().await.unwrap(), 1);
        assert!(blocks.is_blocked(&record.blocker, &record.blocked));
    }
}
