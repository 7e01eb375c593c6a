pub mod blocks;
pub mod bridge;
pub mod codes;
pub mod friends;
pub mod notify;
pub mod prefs;
pub mod views;

pub use camarade_storage::{PlayerId, SocialStore, StorageError};

use crate::blocks::{BlockOutcome, BlockRegistry};
use crate::codes::InviteCodeRegistry;
use crate::friends::{FriendRoster, SendOutcome};
use crate::notify::Notifier;
use crate::prefs::PreferenceStore;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use tracing::info;

#[derive(Debug)]
pub enum SocialError {
    Storage,
    CodeSpaceExhausted,
}

impl Display for SocialError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Storage => write!(f, "storage failure"),
            Self::CodeSpaceExhausted => write!(f, "invite code space exhausted"),
        }
    }
}

impl Error for SocialError {}

impl From<StorageError> for SocialError {
    fn from(_: StorageError) -> Self {
        Self::Storage
    }
}

/// Owns the engine's components and their shared lifecycle: one store, one
/// notifier seam, warm at startup, cache teardown at shutdown. Cross-entity
/// invariants are composed here by sequencing whole-component calls, never
/// by locking across entities.
pub struct SocialDirectory {
    pub friends: FriendRoster,
    pub blocks: BlockRegistry,
    pub codes: InviteCodeRegistry,
    pub preferences: PreferenceStore,
}

impl SocialDirectory {
    pub fn new(store: Arc<dyn SocialStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            friends: FriendRoster::new(Arc::clone(&store), notifier),
            blocks: BlockRegistry::new(Arc::clone(&store)),
            codes: InviteCodeRegistry::new(Arc::clone(&store)),
            preferences: PreferenceStore::new(store),
        }
    }

    /// Startup warm: the block cache must be fully resident before any hot
    /// path runs. Other caches fill lazily. Returns the number of block
    /// entries loaded.
    pub async fn warm(&self) -> Result<usize, SocialError> {
        self.blocks.warm().await
    }

    /// Blocking composes the cross-entity invariant: the friendship and any
    /// pending requests between the pair are gone before success is
    /// reported.
    pub async fn block(
        &self,
        blocker: &PlayerId,
        blocked: &PlayerId,
        reason: &str,
    ) -> Result<BlockOutcome, SocialError> {
        self.blocks.block(&self.friends, blocker, blocked, reason).await
    }

    pub async fn send_request(
        &self,
        sender: &PlayerId,
        receiver: &PlayerId,
        message: &str,
    ) -> Result<SendOutcome, SocialError> {
        self.friends
            .send_request(&self.blocks, sender, receiver, message)
            .await
    }

    /// Drops the player's lazily cached state on disconnect.
    pub async fn forget_session(&self, player: &PlayerId) {
        self.friends.invalidate(player).await;
        self.preferences.invalidate(player).await;
    }

    /// Shutdown teardown. The caches are owned, lifecycle-managed state,
    /// not ambient globals.
    pub async fn clear_caches(&self) {
        self.friends.clear().await;
        self.blocks.clear();
        self.codes.clear().await;
        self.preferences.clear().await;
        info!("social caches cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::friends::AcceptOutcome;
    use crate::notify::SilentNotifier;
    use camarade_storage::memory::MemoryStorage;

    fn directory() -> SocialDirectory {
        SocialDirectory::new(Arc::new(MemoryStorage::new()), Arc::new(SilentNotifier))
    }

    #[tokio::test]
    async fn block_supersedes_friendship() {
        let directory = directory();
        let alice = PlayerId::from("alice");
        let bob = PlayerId::from("bob");
        directory.send_request(&alice, &bob, "hi").await.unwrap();
        assert!(matches!(
            directory.friends.accept_request(&bob, &alice).await.unwrap(),
            AcceptOutcome::Accepted(_)
        ));
        assert_eq!(
            directory.block(&alice, &bob, "enough").await.unwrap(),
            BlockOutcome::Blocked
        );
        // once block() returned, neither side may still observe the edge
        assert!(directory.friends.list_friends(&alice).await.unwrap().is_empty());
        assert!(directory.friends.list_friends(&bob).await.unwrap().is_empty());
        assert!(directory.blocks.is_blocked(&alice, &bob));
    }

    #[tokio::test]
    async fn blocking_cancels_pending_requests_both_ways() {
        let directory = directory();
        let alice = PlayerId::from("alice");
        let bob = PlayerId::from("bob");
        directory.send_request(&bob, &alice, "please").await.unwrap();
        directory.block(&alice, &bob, "no").await.unwrap();
        assert!(directory.friends.pending_requests(&alice).await.unwrap().is_empty());
        assert_eq!(
            directory.friends.accept_request(&alice, &bob).await.unwrap(),
            AcceptOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn unblock_reopens_the_request_path() {
        let directory = directory();
        let alice = PlayerId::from("alice");
        let bob = PlayerId::from("bob");
        directory.block(&alice, &bob, "spam").await.unwrap();
        assert_eq!(
            directory.send_request(&bob, &alice, "hi").await.unwrap(),
            SendOutcome::Blocked
        );
        directory.blocks.unblock(&alice, &bob).await.unwrap();
        assert_eq!(
            directory.send_request(&bob, &alice, "hi").await.unwrap(),
            SendOutcome::Sent
        );
    }

    #[tokio::test]
    async fn teardown_clears_every_cache() {
        let directory = directory();
        let alice = PlayerId::from("alice");
        let bob = PlayerId::from("bob");
        directory.block(&alice, &bob, "spam").await.unwrap();
        directory.codes.get_or_create(&alice).await.unwrap();
        directory.preferences.get(&alice).await.unwrap();
        directory.clear_caches().await;
        assert!(!directory.blocks.is_blocked(&alice, &bob));
        assert_eq!(directory.blocks.warm().await.unwrap(), 1);
        assert!(directory.blocks.is_blocked(&alice, &bob));
    }
}
