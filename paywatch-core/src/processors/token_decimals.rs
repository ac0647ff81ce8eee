use crate::cache::{CacheStore, get_typed, save_typed, token_decimals_key};
use crate::chain::{RoundRobinClient, RpcError};
use alloy::primitives::Address;
use paywatch_sdk::objects::Network;
use std::sync::Arc;
use tracing::{debug, warn};

/// Token precision lookups, memoized in the cache without expiry.
#[derive(Clone)]
pub struct TokenDecimals {
    network: Network,
    client: Arc<RoundRobinClient>,
    cache: Arc<dyn CacheStore>,
}

impl TokenDecimals {
    pub fn new(network: Network, client: Arc<RoundRobinClient>, cache: Arc<dyn CacheStore>) -> Self {
        Self {
            network,
            client,
            cache,
        }
    }

    pub async fn get(&self, contract: Address) -> Result<u8, RpcError> {
        let key = token_decimals_key(self.network, &contract);
        match get_typed::<u8>(self.cache.as_ref(), &key).await {
            Ok(Some(decimals)) => return Ok(decimals),
            Ok(None) => {}
            Err(e) => warn!(key = %key, error = %e, "Failed to read token decimals from cache"),
        }

        let decimals = self.client.token_decimals(contract).await?;
        debug!(network = %self.network, contract = %contract, decimals, "Fetched token decimals");
        if let Err(e) = save_typed(self.cache.as_ref(), &key, &decimals, None).await {
            warn!(key = %key, error = %e, "Failed to cache token decimals");
        }
        Ok(decimals)
    }

    /// Seed the cache, e.g. from configuration.
    pub async fn preload(&self, contract: Address, decimals: u8) {
        let key = token_decimals_key(self.network, &contract);
        if let Err(e) = save_typed(self.cache.as_ref(), &key, &decimals, None).await {
            warn!(key = %key, error = %e, "Failed to cache token decimals");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::chain::rpc::mock::{MockNode, client, fast_settings, word};

    #[tokio::test]
    async fn test_decimals_are_fetched_once() {
        let node = MockNode::new(|_, _| Ok(word(18)));
        let client = Arc::new(client(&[node.clone()], fast_settings()));
        let decimals = TokenDecimals::new(Network::Bsc, client, Arc::new(MemoryCache::new()));

        assert_eq!(decimals.get(Address::repeat_byte(1)).await.unwrap(), 18);
        assert_eq!(decimals.get(Address::repeat_byte(1)).await.unwrap(), 18);
        assert_eq!(node.calls(), 1);
    }
}
