//! Application state shared across all request handlers.

use paywatch_core::cache::CacheStore;
use paywatch_sdk::objects::Network;
use sqlx::PgPool;
use std::sync::Arc;

/// Application state that is shared across all request handlers.
///
/// This is cloneable and cheap to pass around (everything is behind Arc).
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub db: PgPool,
    /// Cache the latest-block workers publish into.
    pub cache: Arc<dyn CacheStore>,
    /// Networks being watched.
    pub networks: Arc<[Network]>,
}

impl AppState {
    pub fn new(db: PgPool, cache: Arc<dyn CacheStore>, networks: Vec<Network>) -> Self {
        Self {
            db,
            cache,
            networks: networks.into(),
        }
    }
}
