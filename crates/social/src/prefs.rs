use crate::SocialError;
use camarade_storage::{PlayerId, PreferenceRow, SocialStore};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Notifications {
    All,
    #[default]
    Important,
    Favorites,
    None,
}

impl Notifications {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Important => "important",
            Self::Favorites => "favorites",
            Self::None => "none",
        }
    }

    pub fn parse_or_default(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "all" => Self::All,
            "important" => Self::Important,
            "favorites" => Self::Favorites,
            "none" => Self::None,
            _ => Self::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    Public,
    #[default]
    Friends,
    Favorites,
    Invisible,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Friends => "friends",
            Self::Favorites => "favorites",
            Self::Invisible => "invisible",
        }
    }

    pub fn parse_or_default(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "public" => Self::Public,
            "friends" => Self::Friends,
            "favorites" => Self::Favorites,
            "invisible" => Self::Invisible,
            _ => Self::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoRequests {
    Accept,
    Mutual,
    #[default]
    Manual,
    Reject,
}

impl AutoRequests {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Mutual => "mutual",
            Self::Manual => "manual",
            Self::Reject => "reject",
        }
    }

    pub fn parse_or_default(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "accept" => Self::Accept,
            "mutual" => Self::Mutual,
            "manual" => Self::Manual,
            "reject" => Self::Reject,
            _ => Self::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sounds {
    #[default]
    Enabled,
    Disabled,
}

impl Sounds {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
        }
    }

    pub fn parse_or_default(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "enabled" => Self::Enabled,
            "disabled" => Self::Disabled,
            _ => Self::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrivateMessages {
    All,
    #[default]
    Friends,
    Favorites,
    Disabled,
}

impl PrivateMessages {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Friends => "friends",
            Self::Favorites => "favorites",
            Self::Disabled => "disabled",
        }
    }

    pub fn parse_or_default(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "all" => Self::All,
            "friends" => Self::Friends,
            "favorites" => Self::Favorites,
            "disabled" => Self::Disabled,
            _ => Self::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Teleportation {
    Free,
    #[default]
    AskPermission,
    Favorites,
    Disabled,
}

impl Teleportation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::AskPermission => "ask_permission",
            Self::Favorites => "favorites",
            Self::Disabled => "disabled",
        }
    }

    pub fn parse_or_default(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "free" => Self::Free,
            "ask_permission" => Self::AskPermission,
            "favorites" => Self::Favorites,
            "disabled" => Self::Disabled,
            _ => Self::default(),
        }
    }
}

/// Fully resolved per-player settings. Every key always carries a value;
/// unknown or blank stored values fall back to the documented defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreferenceRecord {
    pub player: PlayerId,
    pub notifications: Notifications,
    pub visibility: Visibility,
    pub auto_requests: AutoRequests,
    pub sounds: Sounds,
    pub private_messages: PrivateMessages,
    pub teleportation: Teleportation,
    pub updated_at: DateTime<Utc>,
}

impl PreferenceRecord {
    pub fn defaults(player: PlayerId) -> Self {
        Self {
            player,
            notifications: Notifications::default(),
            visibility: Visibility::default(),
            auto_requests: AutoRequests::default(),
            sounds: Sounds::default(),
            private_messages: PrivateMessages::default(),
            teleportation: Teleportation::default(),
            updated_at: Utc::now(),
        }
    }

    fn from_row(row: PreferenceRow) -> Self {
        Self {
            player: row.owner,
            notifications: Notifications::parse_or_default(&row.notifications),
            visibility: Visibility::parse_or_default(&row.visibility),
            auto_requests: AutoRequests::parse_or_default(&row.auto_requests),
            sounds: Sounds::parse_or_default(&row.sounds),
            private_messages: PrivateMessages::parse_or_default(&row.private_messages),
            teleportation: Teleportation::parse_or_default(&row.teleportation),
            updated_at: row.updated_at,
        }
    }

    fn to_row(&self) -> PreferenceRow {
        PreferenceRow {
            owner: self.player.clone(),
            notifications: self.notifications.as_str().to_string(),
            visibility: self.visibility.as_str().to_string(),
            auto_requests: self.auto_requests.as_str().to_string(),
            sounds: self.sounds.as_str().to_string(),
            private_messages: self.private_messages.as_str().to_string(),
            teleportation: self.teleportation.as_str().to_string(),
            updated_at: self.updated_at,
        }
    }
}

/// Cached settings records with defaulting and full-record upserts.
pub struct PreferenceStore {
    store: Arc<dyn SocialStore>,
    cache: RwLock<HashMap<PlayerId, PreferenceRecord>>,
}

impl PreferenceStore {
    pub fn new(store: Arc<dyn SocialStore>) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Always resolves to a full record: cache, then store, then a persisted
    /// default record for first-time players.
    pub async fn get(&self, player: &PlayerId) -> Result<PreferenceRecord, SocialError> {
        if let Some(record) = self.cache.read().await.get(player) {
            return Ok(record.clone());
        }
        let loaded = self.store.load_preferences(player).await.map_err(|e| {
            error!(player = %player, error = %e, "preference load failed");
            SocialError::from(e)
        })?;
        let record = match loaded {
            Some(row) => PreferenceRecord::from_row(row),
            None => {
                let record = PreferenceRecord::defaults(player.clone());
                self.store.upsert_preferences(&record.to_row()).await?;
                record
            }
        };
        self.cache
            .write()
            .await
            .insert(player.clone(), record.clone());
        Ok(record)
    }

    /// Full-record upsert; stamps `updated_at` and refreshes the cache.
    pub async fn save(&self, mut record: PreferenceRecord) -> Result<(), SocialError> {
        record.updated_at = Utc::now();
        self.store
            .upsert_preferences(&record.to_row())
            .await
            .map_err(|e| {
                error!(player = %record.player, error = %e, "preference save failed");
                SocialError::from(e)
            })?;
        self.cache
            .write()
            .await
            .insert(record.player.clone(), record);
        Ok(())
    }

    /// Drops the cache entry so the next `get` reloads from the store. Used
    /// when another path wrote the row.
    pub async fn invalidate(&self, player: &PlayerId) {
        self.cache.write().await.remove(player);
    }

    pub async fn clear(&self) {
        self.cache.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camarade_storage::memory::MemoryStorage;

    #[tokio::test]
    async fn first_get_synthesizes_and_persists_defaults() {
        let store: Arc<dyn SocialStore> = Arc::new(MemoryStorage::new());
        let prefs = PreferenceStore::new(Arc::clone(&store));
        let alice = PlayerId::from("alice");
        let record = prefs.get(&alice).await.unwrap();
        assert_eq!(record.notifications, Notifications::Important);
        assert_eq!(record.visibility, Visibility::Friends);
        assert_eq!(record.auto_requests, AutoRequests::Manual);
        assert_eq!(record.sounds, Sounds::Enabled);
        assert_eq!(record.private_messages, PrivateMessages::Friends);
        assert_eq!(record.teleportation, Teleportation::AskPermission);
        assert!(store.load_preferences(&alice).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn save_round_trips_through_invalidation() {
        let prefs = PreferenceStore::new(Arc::new(MemoryStorage::new()));
        let alice = PlayerId::from("alice");
        let mut record = prefs.get(&alice).await.unwrap();
        record.visibility = Visibility::Invisible;
        record.sounds = Sounds::Disabled;
        prefs.save(record).await.unwrap();
        prefs.invalidate(&alice).await;
        let reloaded = prefs.get(&alice).await.unwrap();
        assert_eq!(reloaded.visibility, Visibility::Invisible);
        assert_eq!(reloaded.sounds, Sounds::Disabled);
    }

    #[tokio::test]
    async fn unknown_stored_values_normalize_to_defaults() {
        let store: Arc<dyn SocialStore> = Arc::new(MemoryStorage::new());
        let alice = PlayerId::from("alice");
        store
            .upsert_preferences(&PreferenceRow {
                owner: alice.clone(),
                notifications: "shouting".to_string(),
                visibility: "".to_string(),
                auto_requests: "MANUAL".to_string(),
                sounds: " enabled ".to_string(),
                private_messages: "???".to_string(),
                teleportation: "ask_permission".to_string(),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
        let prefs = PreferenceStore::new(store);
        let record = prefs.get(&alice).await.unwrap();
        assert_eq!(record.notifications, Notifications::Important);
        assert_eq!(record.visibility, Visibility::Friends);
        assert_eq!(record.auto_requests, AutoRequests::Manual);
        assert_eq!(record.sounds, Sounds::Enabled);
        assert_eq!(record.private_messages, PrivateMessages::Friends);
        assert_eq!(record.teleportation, Teleportation::AskPermission);
    }
}
