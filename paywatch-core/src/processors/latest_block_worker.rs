//! LatestBlockWorker processor.
//!
//! Polls `eth_blockNumber` on an interval and publishes the chain head to the
//! cache (short TTL) and to `block_states`. Readers go through
//! [`cached_latest_block`], which falls back to RPC on a cache miss.

use crate::cache::{CacheStore, get_typed, latest_block_key, save_typed};
use crate::chain::{RoundRobinClient, RpcError};
use crate::repositories::BlockStateRepository;
use paywatch_sdk::objects::Network;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Chain head from the cache, or from RPC when the cached value is missing or stale.
pub async fn cached_latest_block(
    network: Network,
    cache: &dyn CacheStore,
    client: &RoundRobinClient,
) -> Result<u64, RpcError> {
    match get_typed::<u64>(cache, &latest_block_key(network)).await {
        Ok(Some(block)) => return Ok(block),
        Ok(None) => {}
        Err(e) => warn!(network = %network, error = %e, "Failed to read latest block from cache"),
    }
    client.latest_block_number().await
}

pub struct LatestBlockWorker {
    network: Network,
    client: Arc<RoundRobinClient>,
    cache: Arc<dyn CacheStore>,
    block_states: Arc<dyn BlockStateRepository>,
    interval: Duration,
    ttl: Duration,
}

impl LatestBlockWorker {
    pub fn new(
        network: Network,
        client: Arc<RoundRobinClient>,
        cache: Arc<dyn CacheStore>,
        block_states: Arc<dyn BlockStateRepository>,
        interval: Duration,
        ttl: Duration,
    ) -> Self {
        Self {
            network,
            client,
            cache,
            block_states,
            interval,
            ttl,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(network = %self.network, "LatestBlockWorker started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!(network = %self.network, "LatestBlockWorker received shutdown signal");
                        break;
                    }
                }

                _ = ticker.tick() => {
                    if let Err(e) = self.refresh().await {
                        error!(network = %self.network, error = %e, "Failed to refresh latest block");
                    }
                }
            }
        }

        info!(network = %self.network, "LatestBlockWorker shutdown complete");
    }

    /// Fetch the chain head once and publish it.
    pub async fn refresh(&self) -> Result<u64, RpcError> {
        let latest = self.client.latest_block_number().await?;
        debug!(network = %self.network, latest, "Latest block refreshed");

        if let Err(e) = save_typed(
            self.cache.as_ref(),
            &latest_block_key(self.network),
            &latest,
            Some(self.ttl),
        )
        .await
        {
            warn!(network = %self.network, error = %e, "Failed to cache latest block");
        }
        if let Err(e) = self
            .block_states
            .update_latest_block(self.network, latest)
            .await
        {
            warn!(network = %self.network, error = %e, "Failed to persist latest block");
        }
        Ok(latest)
    }
}
