use crate::SocialError;
use camarade_storage::{PlayerId, SocialStore};
use chrono::Utc;
use rand::Rng;
use rand::rngs::OsRng;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error};

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const CODE_GROUP: usize = 4;
const CODE_LENGTH: usize = CODE_GROUP * 2 + 1;
const MAX_GENERATION_ATTEMPTS: usize = 100;

/// Per-player invitation codes in the `XXXX-XXXX` shape over `[A-Z0-9]`.
///
/// Codes are short, so collisions across the whole population are expected
/// at scale; allocation draws a candidate and relies on the store's global
/// uniqueness constraint, retrying up to a fixed bound instead of using a
/// central sequence.
pub struct InviteCodeRegistry {
    store: Arc<dyn SocialStore>,
    cache: RwLock<HashMap<PlayerId, String>>,
}

fn generate_code() -> String {
    let mut rng = OsRng;
    let mut code = String::with_capacity(CODE_LENGTH);
    for index in 0..CODE_GROUP * 2 {
        if index == CODE_GROUP {
            code.push('-');
        }
        let symbol = CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char;
        code.push(symbol);
    }
    code
}

/// Canonicalizes raw user input: trims, uppercases, and checks the
/// `XXXX-XXXX` shape. Malformed input yields `None`.
pub fn normalize_code(raw: &str) -> Option<String> {
    let candidate = raw.trim().to_ascii_uppercase();
    if candidate.len() != CODE_LENGTH {
        return None;
    }
    for (index, byte) in candidate.as_bytes().iter().enumerate() {
        if index == CODE_GROUP {
            if *byte != b'-' {
                return None;
            }
        } else if !byte.is_ascii_uppercase() && !byte.is_ascii_digit() {
            return None;
        }
    }
    Some(candidate)
}

impl InviteCodeRegistry {
    pub fn new(store: Arc<dyn SocialStore>) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the player's code, allocating one on first use.
    pub async fn get_or_create(&self, player: &PlayerId) -> Result<String, SocialError> {
        if let Some(code) = self.cache.read().await.get(player) {
            return Ok(code.clone());
        }
        if let Some(code) = self.store.load_code(player).await? {
            self.cache
                .write()
                .await
                .insert(player.clone(), code.clone());
            return Ok(code);
        }
        self.allocate(player).await
    }

    /// Resolves a shared code to its owner. Malformed input never reaches
    /// the store.
    pub async fn resolve(&self, raw: &str) -> Result<Option<PlayerId>, SocialError> {
        let Some(code) = normalize_code(raw) else {
            return Ok(None);
        };
        Ok(self.store.resolve_code(&code).await?)
    }

    /// Retires the player's current code and issues a fresh one. The delete
    /// is durable before the new code exists, so the old code stops
    /// resolving as soon as this call returns.
    pub async fn regenerate(&self, player: &PlayerId) -> Result<String, SocialError> {
        self.store.delete_code(player).await.map_err(|e| {
            error!(player = %player, error = %e, "invite code retirement failed");
            SocialError::from(e)
        })?;
        self.cache.write().await.remove(player);
        self.allocate(player).await
    }

    async fn allocate(&self, player: &PlayerId) -> Result<String, SocialError> {
        for attempt in 1..=MAX_GENERATION_ATTEMPTS {
            let code = generate_code();
            if self
                .store
                .try_insert_code(player, &code, Utc::now())
                .await?
            {
                if attempt > 1 {
                    debug!(player = %player, attempts = attempt, "invite code allocated after collisions");
                }
                self.cache
                    .write()
                    .await
                    .insert(player.clone(), code.clone());
                return Ok(code);
            }
            // a false insert also covers the owner key: a concurrent
            // allocation for this player may have won, and its code is the
            // one to hand out, not a fresh draw
            if let Some(existing) = self.store.load_code(player).await? {
                self.cache
                    .write()
                    .await
                    .insert(player.clone(), existing.clone());
                return Ok(existing);
            }
        }
        error!(
            player = %player,
            attempts = MAX_GENERATION_ATTEMPTS,
            "invite code space exhausted"
        );
        Err(SocialError::CodeSpaceExhausted)
    }

    pub async fn clear(&self) {
        self.cache.write().await.clear();
    }
}
