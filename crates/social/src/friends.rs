use crate::SocialError;
use crate::blocks::BlockRegistry;
use crate::notify::{Notifier, SocialNotice};
use camarade_storage::{FriendEdgeRecord, FriendRequestRecord, PlayerId, RequestStatus, SocialStore};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

/// One friendship edge as seen from its owner: the other endpoint, the
/// owner's own favorite flag and the shared counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FriendView {
    pub friend: PlayerId,
    pub favorite: bool,
    pub interactions: i64,
    pub since: DateTime<Utc>,
}

impl FriendView {
    fn from_edge(owner: &PlayerId, edge: &FriendEdgeRecord) -> Option<Self> {
        let friend = edge.other(owner)?.clone();
        Some(Self {
            friend,
            favorite: edge.favorite_of(owner),
            interactions: edge.interactions,
            since: edge.created_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FriendRequestView {
    pub sender: PlayerId,
    pub message: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    SelfTarget,
    AlreadyFriends,
    AlreadyPending,
    Blocked,
}

impl Display for SendOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sent => write!(f, "friend request sent"),
            Self::SelfTarget => write!(f, "you cannot send a request to yourself"),
            Self::AlreadyFriends => write!(f, "already friends"),
            Self::AlreadyPending => write!(f, "request already pending"),
            Self::Blocked => write!(f, "request not allowed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptOutcome {
    Accepted(FriendView),
    NotFound,
}

/// Write-through view of the friendship graph and the pending-request inbox.
///
/// Friend lists and inboxes are cached per player and loaded lazily; every
/// mutating operation keeps the affected cache entries coherent before it
/// reports success, so a read that follows a write never observes stale
/// state from this component.
pub struct FriendRoster {
    store: Arc<dyn SocialStore>,
    notifier: Arc<dyn Notifier>,
    friends: RwLock<HashMap<PlayerId, Vec<FriendView>>>,
    pending: RwLock<HashMap<PlayerId, Vec<FriendRequestView>>>,
}

impl FriendRoster {
    pub fn new(store: Arc<dyn SocialStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            notifier,
            friends: RwLock::new(HashMap::new()),
            pending: RwLock::new(HashMap::new()),
        }
    }

    /// Cache-first friend list, insertion-ordered.
    pub async fn list_friends(&self, player: &PlayerId) -> Result<Vec<FriendView>, SocialError> {
        if let Some(views) = self.friends.read().await.get(player) {
            return Ok(views.clone());
        }
        let edges = self.store.load_friendships(player).await.map_err(|e| {
            error!(player = %player, error = %e, "friend list load failed");
            SocialError::from(e)
        })?;
        let views: Vec<FriendView> = edges
            .iter()
            .filter_map(|edge| FriendView::from_edge(player, edge))
            .collect();
        self.friends
            .write()
            .await
            .insert(player.clone(), views.clone());
        Ok(views)
    }

    /// Cache-first pending inbox for `receiver`, oldest first.
    pub async fn pending_requests(
        &self,
        receiver: &PlayerId,
    ) -> Result<Vec<FriendRequestView>, SocialError> {
        if let Some(views) = self.pending.read().await.get(receiver) {
            return Ok(views.clone());
        }
        let records = self.store.load_pending_requests(receiver).await.map_err(|e| {
            error!(receiver = %receiver, error = %e, "pending request load failed");
            SocialError::from(e)
        })?;
        let views: Vec<FriendRequestView> = records
            .into_iter()
            .map(|record| FriendRequestView {
                sender: record.sender,
                message: record.message,
                sent_at: record.created_at,
            })
            .collect();
        self.pending
            .write()
            .await
            .insert(receiver.clone(), views.clone());
        Ok(views)
    }

    /// Validates and persists a pending request. The block check runs against
    /// the warm cache before any storage round trip.
    pub async fn send_request(
        &self,
        blocks: &BlockRegistry,
        sender: &PlayerId,
        receiver: &PlayerId,
        message: &str,
    ) -> Result<SendOutcome, SocialError> {
        if sender == receiver {
            return Ok(SendOutcome::SelfTarget);
        }
        if blocks.is_blocked_either(sender, receiver) {
            return Ok(SendOutcome::Blocked);
        }
        let already_friends = self
            .store
            .friendship_exists(sender, receiver)
            .await
            .map_err(|e| {
                error!(sender = %sender, receiver = %receiver, error = %e, "friendship lookup failed");
                SocialError::from(e)
            })?;
        if already_friends {
            return Ok(SendOutcome::AlreadyFriends);
        }
        let already_pending = self
            .store
            .pending_request_exists(sender, receiver)
            .await
            .map_err(|e| {
                error!(sender = %sender, receiver = %receiver, error = %e, "pending request lookup failed");
                SocialError::from(e)
            })?;
        if already_pending {
            return Ok(SendOutcome::AlreadyPending);
        }
        let record = FriendRequestRecord {
            sender: sender.clone(),
            receiver: receiver.clone(),
            message: message.trim().to_string(),
            status: RequestStatus::Pending,
            created_at: Utc::now(),
        };
        self.store.upsert_pending_request(&record).await.map_err(|e| {
            error!(sender = %sender, receiver = %receiver, error = %e, "friend request store failed");
            SocialError::from(e)
        })?;
        self.pending.write().await.remove(receiver);
        info!(sender = %sender, receiver = %receiver, "friend request sent");
        if self.notifier.is_online(receiver) {
            self.notifier.notify(
                receiver,
                SocialNotice::RequestReceived {
                    from: sender.clone(),
                    message: record.message,
                },
            );
        }
        Ok(SendOutcome::Sent)
    }

    /// Atomically converts the pending request from `sender` into a
    /// friendship. Retries of an already-accepted request report `NotFound`.
    pub async fn accept_request(
        &self,
        receiver: &PlayerId,
        sender: &PlayerId,
    ) -> Result<AcceptOutcome, SocialError> {
        let edge = self
            .store
            .accept_request(sender, receiver, Utc::now())
            .await
            .map_err(|e| {
                error!(sender = %sender, receiver = %receiver, error = %e, "request accept failed");
                SocialError::from(e)
            })?;
        let Some(edge) = edge else {
            return Ok(AcceptOutcome::NotFound);
        };
        {
            let mut friends = self.friends.write().await;
            friends.remove(sender);
            friends.remove(receiver);
        }
        {
            let mut pending = self.pending.write().await;
            pending.remove(sender);
            pending.remove(receiver);
        }
        info!(sender = %sender, receiver = %receiver, "friend request accepted");
        for (party, other) in [(sender, receiver), (receiver, sender)] {
            if self.notifier.is_online(party) {
                self.notifier.notify(
                    party,
                    SocialNotice::FriendAdded {
                        friend: other.clone(),
                    },
                );
            }
        }
        match FriendView::from_edge(receiver, &edge) {
            Some(view) => Ok(AcceptOutcome::Accepted(view)),
            None => Ok(AcceptOutcome::NotFound),
        }
    }

    /// Deletes the pending request from `sender`. Returns false when none
    /// was pending.
    pub async fn reject_request(
        &self,
        receiver: &PlayerId,
        sender: &PlayerId,
    ) -> Result<bool, SocialError> {
        let removed = self
            .store
            .delete_pending_request(sender, receiver)
            .await
            .map_err(|e| {
                error!(sender = %sender, receiver = %receiver, error = %e, "request rejection failed");
                SocialError::from(e)
            })?;
        if removed {
            self.pending.write().await.remove(receiver);
            info!(sender = %sender, receiver = %receiver, "friend request rejected");
        }
        Ok(removed)
    }

    /// Identifier-only removal; also invoked as the block side effect, so it
    /// must work when neither party has a live session.
    pub async fn remove_friendship(&self, a: &PlayerId, b: &PlayerId) -> Result<bool, SocialError> {
        let removed = self.store.delete_friendship(a, b).await.map_err(|e| {
            error!(a = %a, b = %b, error = %e, "friendship removal failed");
            SocialError::from(e)
        })?;
        if removed {
            let mut friends = self.friends.write().await;
            friends.remove(a);
            friends.remove(b);
            info!(a = %a, b = %b, "friendship removed");
        }
        Ok(removed)
    }

    /// Flips the caller's favorite flag on the edge to `friend`. Returns the
    /// new state, `None` when no friendship exists. Only the caller's cached
    /// list is touched; the flag is per direction.
    pub async fn toggle_favorite(
        &self,
        player: &PlayerId,
        friend: &PlayerId,
    ) -> Result<Option<bool>, SocialError> {
        let views = self.list_friends(player).await?;
        let Some(current) = views
            .iter()
            .find(|view| &view.friend == friend)
            .map(|view| view.favorite)
        else {
            return Ok(None);
        };
        let next = !current;
        if !self.store.set_favorite(player, friend, next).await? {
            // edge vanished between the cached read and the write
            self.friends.write().await.remove(player);
            return Ok(None);
        }
        if let Some(list) = self.friends.write().await.get_mut(player) {
            if let Some(view) = list.iter_mut().find(|view| &view.friend == friend) {
                view.favorite = next;
            }
        }
        Ok(Some(next))
    }

    /// Bumps the shared interaction counter on the pair's edge.
    pub async fn record_interaction(&self, a: &PlayerId, b: &PlayerId) -> Result<(), SocialError> {
        self.store.bump_interactions(a, b).await.map_err(|e| {
            error!(a = %a, b = %b, error = %e, "interaction bump failed");
            SocialError::from(e)
        })?;
        let mut friends = self.friends.write().await;
        for (owner, other) in [(a, b), (b, a)] {
            if let Some(list) = friends.get_mut(owner) {
                if let Some(view) = list.iter_mut().find(|view| &view.friend == other) {
                    view.interactions += 1;
                }
            }
        }
        Ok(())
    }

    /// Drops any pending request between the pair in both directions. Part
    /// of the block side-effect sequence.
    pub(crate) async fn cancel_requests_between(
        &self,
        a: &PlayerId,
        b: &PlayerId,
    ) -> Result<(), SocialError> {
        let first = self.store.delete_pending_request(a, b).await.map_err(|e| {
            error!(sender = %a, receiver = %b, error = %e, "request cancellation failed");
            SocialError::from(e)
        })?;
        let second = self.store.delete_pending_request(b, a).await.map_err(|e| {
            error!(sender = %b, receiver = %a, error = %e, "request cancellation failed");
            SocialError::from(e)
        })?;
        if first || second {
            let mut pending = self.pending.write().await;
            pending.remove(a);
            pending.remove(b);
        }
        Ok(())
    }

    /// Drops the player's cached friend list and inbox, forcing a reload on
    /// the next read. Used on disconnect and by external write paths.
    pub async fn invalidate(&self, player: &PlayerId) {
        self.friends.write().await.remove(player);
        self.pending.write().await.remove(player);
    }

    pub async fn clear(&self) {
        self.friends.write().await.clear();
        self.pending.write().await.clear();
    }
}
