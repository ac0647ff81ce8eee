//! Key-value cache used for token-decimals memoization and block cursors.
//!
//! Only the [`CacheStore`] contract is relied upon by the processors. The
//! bundled [`MemoryCache`] keeps everything in process memory.

use alloy::primitives::Address;
use async_trait::async_trait;
use paywatch_sdk::objects::Network;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;

pub const LATEST_BLOCK_PREFIX: &str = "latest_block_";
pub const LAST_PROCESSED_BLOCK_PREFIX: &str = "last_processed_block_";
pub const TOKEN_DECIMALS_PREFIX: &str = "token_decimals_";

pub fn latest_block_key(network: Network) -> String {
    format!("{LATEST_BLOCK_PREFIX}{network}")
}

pub fn last_processed_block_key(network: Network) -> String {
    format!("{LAST_PROCESSED_BLOCK_PREFIX}{network}")
}

pub fn token_decimals_key(network: Network, contract: &Address) -> String {
    format!("{TOKEN_DECIMALS_PREFIX}{network}_{contract:#x}")
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cache backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Store a value. `None` means it never expires.
    async fn save(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError>;

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Every live value whose key starts with `prefix`.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<serde_json::Value>, CacheError>;
}

/// Typed helpers over [`CacheStore`].
pub async fn save_typed<T: Serialize + Sync>(
    cache: &dyn CacheStore,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<(), CacheError> {
    cache.save(key, serde_json::to_value(value)?, ttl).await
}

pub async fn get_typed<T: DeserializeOwned>(
    cache: &dyn CacheStore,
    key: &str,
) -> Result<Option<T>, CacheError> {
    match cache.get(key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

struct Entry {
    value: serde_json::Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// In-process [`CacheStore`] with lazy TTL eviction.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn save(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .write()
            .await
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, CacheError> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.is_live(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }
        self.entries.write().await.remove(key);
        Ok(None)
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<serde_json::Value>, CacheError> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && entry.is_live(now))
            .map(|(_, entry)| entry.value.clone())
            .collect())
    }
}
