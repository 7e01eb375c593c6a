pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls};

const INIT_SQL: &str = include_str!("../migrations/001_init.sql");

#[derive(Debug)]
pub enum StorageError {
    Postgres,
    Serialization,
}

impl Display for StorageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Postgres => write!(f, "postgres failure"),
            Self::Serialization => write!(f, "serialization failure"),
        }
    }
}

impl Error for StorageError {}

/// Opaque stable player identifier. Persists across sessions; the referenced
/// player may be offline.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlayerId(String);

impl PlayerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for PlayerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PlayerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for PlayerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Canonical key for the unordered friendship pair: lexicographically
/// smaller identifier first.
pub fn edge_key(a: &PlayerId, b: &PlayerId) -> (PlayerId, PlayerId) {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FriendEdgeRecord {
    pub player_low: PlayerId,
    pub player_high: PlayerId,
    pub favorite_of_low: bool,
    pub favorite_of_high: bool,
    pub interactions: i64,
    pub created_at: DateTime<Utc>,
}

impl FriendEdgeRecord {
    /// Returns the other endpoint as seen from `player`, or `None` when the
    /// edge does not involve that player.
    pub fn other(&self, player: &PlayerId) -> Option<&PlayerId> {
        if &self.player_low == player {
            Some(&self.player_high)
        } else if &self.player_high == player {
            Some(&self.player_low)
        } else {
            None
        }
    }

    /// Favorite flag for the direction owned by `player`.
    pub fn favorite_of(&self, player: &PlayerId) -> bool {
        if &self.player_low == player {
            self.favorite_of_low
        } else {
            self.favorite_of_high
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Pending,
    Accepted,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
        }
    }
}

impl FromStr for RequestStatus {
    type Err = StorageError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(RequestStatus::Pending),
            "accepted" => Ok(RequestStatus::Accepted),
            _ => Err(StorageError::Serialization),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FriendRequestRecord {
    pub sender: PlayerId,
    pub receiver: PlayerId,
    pub message: String,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRecord {
    pub blocker: PlayerId,
    pub blocked: PlayerId,
    pub reason: String,
    pub blocked_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Raw per-player settings row. Values are stored as text; the social layer
/// normalizes unknown values to defaults on load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreferenceRow {
    pub owner: PlayerId,
    pub notifications: String,
    pub visibility: String,
    pub auto_requests: String,
    pub sounds: String,
    pub private_messages: String,
    pub teleportation: String,
    pub updated_at: DateTime<Utc>,
}

/// Durable-store port consumed by the social engine. Implemented over
/// PostgreSQL for production and by [`memory::MemoryStorage`] for tests and
/// embedders without a database.
#[async_trait]
pub trait SocialStore: Send + Sync {
    async fn load_friendships(
        &self,
        player: &PlayerId,
    ) -> Result<Vec<FriendEdgeRecord>, StorageError>;

    async fn friendship_exists(&self, a: &PlayerId, b: &PlayerId) -> Result<bool, StorageError>;

    async fn delete_friendship(&self, a: &PlayerId, b: &PlayerId) -> Result<bool, StorageError>;

    /// Sets the per-direction favorite flag owned by `owner` on the edge to
    /// `friend`. Returns false when no such edge exists.
    async fn set_favorite(
        &self,
        owner: &PlayerId,
        friend: &PlayerId,
        favorite: bool,
    ) -> Result<bool, StorageError>;

    async fn bump_interactions(&self, a: &PlayerId, b: &PlayerId) -> Result<(), StorageError>;

    async fn upsert_pending_request(
        &self,
        request: &FriendRequestRecord,
    ) -> Result<(), StorageError>;

    async fn pending_request_exists(
        &self,
        sender: &PlayerId,
        receiver: &PlayerId,
    ) -> Result<bool, StorageError>;

    async fn load_pending_requests(
        &self,
        receiver: &PlayerId,
    ) -> Result<Vec<FriendRequestRecord>, StorageError>;

    /// Atomically converts a pending request into a friendship edge. Returns
    /// the created edge, or `None` when no pending request matched.
    async fn accept_request(
        &self,
        sender: &PlayerId,
        receiver: &PlayerId,
        accepted_at: DateTime<Utc>,
    ) -> Result<Option<FriendEdgeRecord>, StorageError>;

    async fn delete_pending_request(
        &self,
        sender: &PlayerId,
        receiver: &PlayerId,
    ) -> Result<bool, StorageError>;

    async fn load_all_blocks(&self) -> Result<Vec<BlockRecord>, StorageError>;

    async fn upsert_block(&self, record: &BlockRecord) -> Result<(), StorageError>;

    async fn delete_block(
        &self,
        blocker: &PlayerId,
        blocked: &PlayerId,
    ) -> Result<bool, StorageError>;

    async fn load_code(&self, owner: &PlayerId) -> Result<Option<String>, StorageError>;

    async fn resolve_code(&self, code: &str) -> Result<Option<PlayerId>, StorageError>;

    /// Inserts a code for `owner` unless the code is already taken anywhere.
    /// Returns false on collision so the caller can retry with a fresh draw.
    async fn try_insert_code(
        &self,
        owner: &PlayerId,
        code: &str,
        created_at: DateTime<Utc>,
    ) -> Result<bool, StorageError>;

    async fn delete_code(&self, owner: &PlayerId) -> Result<bool, StorageError>;

    async fn load_preferences(
        &self,
        owner: &PlayerId,
    ) -> Result<Option<PreferenceRow>, StorageError>;

    async fn upsert_preferences(&self, row: &PreferenceRow) -> Result<(), StorageError>;
}

pub struct PgStorage {
    client: Client,
    _pg_task: JoinHandle<()>,
}

/// Establishes connectivity to the PostgreSQL backend.
pub async fn connect(postgres_dsn: &str) -> Result<PgStorage, StorageError> {
    let (client, connection) = tokio_postgres::connect(postgres_dsn, NoTls)
        .await
        .map_err(|_| StorageError::Postgres)?;
    let task = tokio::spawn(async move {
        if let Err(error) = connection.await {
            tracing::error!("postgres connection stopped: {}", error);
        }
    });
    Ok(PgStorage {
        client,
        _pg_task: task,
    })
}

impl PgStorage {
    /// Applies bundled migrations to PostgreSQL.
    pub async fn migrate(&self) -> Result<(), StorageError> {
        self.client
            .batch_execute(INIT_SQL)
            .await
            .map_err(|_| StorageError::Postgres)
    }
}

fn edge_from_row(row: &tokio_postgres::Row) -> FriendEdgeRecord {
    let low: String = row.get(0);
    let high: String = row.get(1);
    FriendEdgeRecord {
        player_low: PlayerId::new(low),
        player_high: PlayerId::new(high),
        favorite_of_low: row.get(2),
        favorite_of_high: row.get(3),
        interactions: row.get(4),
        created_at: row.get(5),
    }
}

fn request_from_row(row: &tokio_postgres::Row) -> Result<FriendRequestRecord, StorageError> {
    let sender: String = row.get(0);
    let receiver: String = row.get(1);
    let status: String = row.get(3);
    Ok(FriendRequestRecord {
        sender: PlayerId::new(sender),
        receiver: PlayerId::new(receiver),
        message: row.get(2),
        status: RequestStatus::from_str(status.as_str())?,
        created_at: row.get(4),
    })
}

#[async_trait]
impl SocialStore for PgStorage {
    async fn load_friendships(
        &self,
        player: &PlayerId,
    ) -> Result<Vec<FriendEdgeRecord>, StorageError> {
        let rows = self
            .client
            .query(
                "SELECT player_low, player_high, favorite_of_low, favorite_of_high, interactions, created_at
                FROM friend_edge WHERE player_low = $1 OR player_high = $1 ORDER BY created_at ASC",
                &[&player.as_str()],
            )
            .await
            .map_err(|_| StorageError::Postgres)?;
        Ok(rows.iter().map(edge_from_row).collect())
    }

    async fn friendship_exists(&self, a: &PlayerId, b: &PlayerId) -> Result<bool, StorageError> {
        let (low, high) = edge_key(a, b);
        let row = self
            .client
            .query_opt(
                "SELECT 1 FROM friend_edge WHERE player_low = $1 AND player_high = $2",
                &[&low.as_str(), &high.as_str()],
            )
            .await
            .map_err(|_| StorageError::Postgres)?;
        Ok(row.is_some())
    }

    async fn delete_friendship(&self, a: &PlayerId, b: &PlayerId) -> Result<bool, StorageError> {
        let (low, high) = edge_key(a, b);
        let affected = self
            .client
            .execute(
                "DELETE FROM friend_edge WHERE player_low = $1 AND player_high = $2",
                &[&low.as_str(), &high.as_str()],
            )
            .await
            .map_err(|_| StorageError::Postgres)?;
        Ok(affected > 0)
    }

    async fn set_favorite(
        &self,
        owner: &PlayerId,
        friend: &PlayerId,
        favorite: bool,
    ) -> Result<bool, StorageError> {
        let (low, high) = edge_key(owner, friend);
        let affected = self
            .client
            .execute(
                "UPDATE friend_edge
                SET favorite_of_low = CASE WHEN player_low = $3 THEN $4 ELSE favorite_of_low END,
                    favorite_of_high = CASE WHEN player_high = $3 THEN $4 ELSE favorite_of_high END
                WHERE player_low = $1 AND player_high = $2",
                &[&low.as_str(), &high.as_str(), &owner.as_str(), &favorite],
            )
            .await
            .map_err(|_| StorageError::Postgres)?;
        Ok(affected > 0)
    }

    async fn bump_interactions(&self, a: &PlayerId, b: &PlayerId) -> Result<(), StorageError> {
        let (low, high) = edge_key(a, b);
        self.client
            .execute(
                "UPDATE friend_edge SET interactions = interactions + 1
                WHERE player_low = $1 AND player_high = $2",
                &[&low.as_str(), &high.as_str()],
            )
            .await
            .map_err(|_| StorageError::Postgres)?;
        Ok(())
    }

    async fn upsert_pending_request(
        &self,
        request: &FriendRequestRecord,
    ) -> Result<(), StorageError> {
        self.client
            .execute(
                "INSERT INTO friend_request (sender, receiver, message, status, created_at)
                VALUES ($1, $2, $3, 'pending', $4)
                ON CONFLICT (sender, receiver) DO UPDATE
                SET message = excluded.message, status = 'pending', created_at = excluded.created_at",
                &[
                    &request.sender.as_str(),
                    &request.receiver.as_str(),
                    &request.message,
                    &request.created_at,
                ],
            )
            .await
            .map_err(|_| StorageError::Postgres)?;
        Ok(())
    }

    async fn pending_request_exists(
        &self,
        sender: &PlayerId,
        receiver: &PlayerId,
    ) -> Result<bool, StorageError> {
        let row = self
            .client
            .query_opt(
                "SELECT 1 FROM friend_request WHERE sender = $1 AND receiver = $2 AND status = 'pending'",
                &[&sender.as_str(), &receiver.as_str()],
            )
            .await
            .map_err(|_| StorageError::Postgres)?;
        Ok(row.is_some())
    }

    async fn load_pending_requests(
        &self,
        receiver: &PlayerId,
    ) -> Result<Vec<FriendRequestRecord>, StorageError> {
        let rows = self
            .client
            .query(
                "SELECT sender, receiver, message, status, created_at
                FROM friend_request WHERE receiver = $1 AND status = 'pending'
                ORDER BY created_at ASC",
                &[&receiver.as_str()],
            )
            .await
            .map_err(|_| StorageError::Postgres)?;
        let mut requests = Vec::with_capacity(rows.len());
        for row in &rows {
            requests.push(request_from_row(row)?);
        }
        Ok(requests)
    }

    async fn accept_request(
        &self,
        sender: &PlayerId,
        receiver: &PlayerId,
        accepted_at: DateTime<Utc>,
    ) -> Result<Option<FriendEdgeRecord>, StorageError> {
        let stmt = "WITH consumed AS (
                UPDATE friend_request
                SET status = 'accepted'
                WHERE sender = $1 AND receiver = $2 AND status = 'pending'
                RETURNING sender, receiver
            ),
            edge AS (
                INSERT INTO friend_edge (player_low, player_high, favorite_of_low, favorite_of_high, interactions, created_at)
                SELECT LEAST(sender, receiver), GREATEST(sender, receiver), FALSE, FALSE, 0, $3 FROM consumed
                ON CONFLICT (player_low, player_high) DO NOTHING
                RETURNING player_low, player_high, favorite_of_low, favorite_of_high, interactions, created_at
            )
            SELECT player_low, player_high, favorite_of_low, favorite_of_high, interactions, created_at FROM edge";
        let row = self
            .client
            .query_opt(stmt, &[&sender.as_str(), &receiver.as_str(), &accepted_at])
            .await
            .map_err(|_| StorageError::Postgres)?;
        Ok(row.as_ref().map(edge_from_row))
    }

    async fn delete_pending_request(
        &self,
        sender: &PlayerId,
        receiver: &PlayerId,
    ) -> Result<bool, StorageError> {
        let affected = self
            .client
            .execute(
                "DELETE FROM friend_request WHERE sender = $1 AND receiver = $2 AND status = 'pending'",
                &[&sender.as_str(), &receiver.as_str()],
            )
            .await
            .map_err(|_| StorageError::Postgres)?;
        Ok(affected > 0)
    }

    async fn load_all_blocks(&self) -> Result<Vec<BlockRecord>, StorageError> {
        let rows = self
            .client
            .query(
                "SELECT blocker, blocked, reason, blocked_at, updated_at FROM player_block",
                &[],
            )
            .await
            .map_err(|_| StorageError::Postgres)?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let blocker: String = row.get(0);
                let blocked: String = row.get(1);
                BlockRecord {
                    blocker: PlayerId::new(blocker),
                    blocked: PlayerId::new(blocked),
                    reason: row.get(2),
                    blocked_at: row.get(3),
                    updated_at: row.get(4),
                }
            })
            .collect())
    }

    async fn upsert_block(&self, record: &BlockRecord) -> Result<(), StorageError> {
        self.client
            .execute(
                "INSERT INTO player_block (blocker, blocked, reason, blocked_at, updated_at)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (blocker, blocked) DO UPDATE
                SET reason = excluded.reason, updated_at = excluded.updated_at",
                &[
                    &record.blocker.as_str(),
                    &record.blocked.as_str(),
                    &record.reason,
                    &record.blocked_at,
                    &record.updated_at,
                ],
            )
            .await
            .map_err(|_| StorageError::Postgres)?;
        Ok(())
    }

    async fn delete_block(
        &self,
        blocker: &PlayerId,
        blocked: &PlayerId,
    ) -> Result<bool, StorageError> {
        let affected = self
            .client
            .execute(
                "DELETE FROM player_block WHERE blocker = $1 AND blocked = $2",
                &[&blocker.as_str(), &blocked.as_str()],
            )
            .await
            .map_err(|_| StorageError::Postgres)?;
        Ok(affected > 0)
    }

    async fn load_code(&self, owner: &PlayerId) -> Result<Option<String>, StorageError> {
        let row = self
            .client
            .query_opt(
                "SELECT code FROM invite_code WHERE owner = $1",
                &[&owner.as_str()],
            )
            .await
            .map_err(|_| StorageError::Postgres)?;
        Ok(row.map(|row| row.get(0)))
    }

    async fn resolve_code(&self, code: &str) -> Result<Option<PlayerId>, StorageError> {
        let row = self
            .client
            .query_opt("SELECT owner FROM invite_code WHERE code = $1", &[&code])
            .await
            .map_err(|_| StorageError::Postgres)?;
        Ok(row.map(|row| {
            let owner: String = row.get(0);
            PlayerId::new(owner)
        }))
    }

    async fn try_insert_code(
        &self,
        owner: &PlayerId,
        code: &str,
        created_at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let inserted = self
            .client
            .execute(
                "INSERT INTO invite_code (owner, code, created_at) VALUES ($1, $2, $3)
                ON CONFLICT DO NOTHING",
                &[&owner.as_str(), &code, &created_at],
            )
            .await
            .map_err(|_| StorageError::Postgres)?;
        Ok(inserted == 1)
    }

    async fn delete_code(&self, owner: &PlayerId) -> Result<bool, StorageError> {
        let affected = self
            .client
            .execute(
                "DELETE FROM invite_code WHERE owner = $1",
                &[&owner.as_str()],
            )
            .await
            .map_err(|_| StorageError::Postgres)?;
        Ok(affected > 0)
    }

    async fn load_preferences(
        &self,
        owner: &PlayerId,
    ) -> Result<Option<PreferenceRow>, StorageError> {
        let row = self
            .client
            .query_opt(
                "SELECT owner, notifications, visibility, auto_requests, sounds, private_messages, teleportation, updated_at
                FROM player_settings WHERE owner = $1",
                &[&owner.as_str()],
            )
            .await
            .map_err(|_| StorageError::Postgres)?;
        Ok(row.map(|row| {
            let owner: String = row.get(0);
            PreferenceRow {
                owner: PlayerId::new(owner),
                notifications: row.get(1),
                visibility: row.get(2),
                auto_requests: row.get(3),
                sounds: row.get(4),
                private_messages: row.get(5),
                teleportation: row.get(6),
                updated_at: row.get(7),
            }
        }))
    }

    async fn upsert_preferences(&self, row: &PreferenceRow) -> Result<(), StorageError> {
        self.client
            .execute(
                "INSERT INTO player_settings (owner, notifications, visibility, auto_requests, sounds, private_messages, teleportation, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (owner) DO UPDATE
                SET notifications = excluded.notifications,
                    visibility = excluded.visibility,
                    auto_requests = excluded.auto_requests,
                    sounds = excluded.sounds,
                    private_messages = excluded.private_messages,
                    teleportation = excluded.teleportation,
                    updated_at = excluded.updated_at",
                &[
                    &row.owner.as_str(),
                    &row.notifications,
                    &row.visibility,
                    &row.auto_requests,
                    &row.sounds,
                    &row.private_messages,
                    &row.teleportation,
                    &row.updated_at,
                ],
            )
            .await
            .map_err(|_| StorageError::Postgres)?;
        Ok(())
    }
}
