//! Per-network chain configuration.

use alloy::primitives::Address;
use compact_str::CompactString;
use paywatch_sdk::objects::Network;
use rust_decimal::Decimal;
use std::time::Duration;
use url::Url;

/// A watched ERC-20 token contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenConfig {
    pub symbol: CompactString,
    pub contract_address: Address,
    /// Known precision; fetched with `decimals()` when absent.
    pub decimals: Option<u8>,
}

/// Retry and gas behaviour of the round-robin RPC client.
#[derive(Debug, Clone)]
pub struct RpcSettings {
    /// Base delay of the per-endpoint exponential backoff.
    pub retry_delay: Duration,
    /// Attempts against one endpoint before it is put on cooldown.
    pub max_attempts: u32,
    /// How long a failed endpoint is skipped by the rotation.
    pub endpoint_cooldown: Duration,
    /// Applied to `eth_gasPrice` before signing.
    pub gas_price_multiplier: Decimal,
    pub request_timeout: Duration,
    pub receipt_poll_interval: Duration,
    pub receipt_timeout: Duration,
    /// JSON-RPC batch size for bulk balance queries.
    pub batch_size: usize,
    pub batch_delay: Duration,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(3),
            max_attempts: 3,
            endpoint_cooldown: Duration::from_secs(60),
            gas_price_multiplier: Decimal::TWO,
            request_timeout: Duration::from_secs(30),
            receipt_poll_interval: Duration::from_secs(2),
            receipt_timeout: Duration::from_secs(120),
            batch_size: 250,
            batch_delay: Duration::from_millis(250),
        }
    }
}

/// Block scanning behaviour of the dual-track listener.
#[derive(Debug, Clone)]
pub struct ListenerSettings {
    /// Blocks per `eth_getLogs` request.
    pub chunk_size: u64,
    /// Provider limit on blocks per request; one outer iteration covers an eighth of it.
    pub api_max_blocks: u64,
    /// Sleep between polls when there is nothing new to scan, and between chunk retries.
    pub poll_interval: Duration,
    /// Attempts per chunk before it is skipped.
    pub max_chunk_retries: u32,
    /// Capacity of the listener's dispatch channel.
    pub event_buffer: usize,
    /// Period of the latest-block refresher.
    pub latest_block_interval: Duration,
    /// How long a refreshed latest block stays valid in the cache.
    pub latest_block_ttl: Duration,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            chunk_size: 10,
            api_max_blocks: 2048,
            poll_interval: Duration::from_secs(3),
            max_chunk_retries: 3,
            event_buffer: 100,
            latest_block_interval: Duration::from_secs(3),
            latest_block_ttl: Duration::from_secs(60),
        }
    }
}

impl ListenerSettings {
    /// Blocks covered by one outer confirmed-track iteration.
    pub fn window(&self) -> u64 {
        (self.api_max_blocks / 8).max(1)
    }
}

/// Everything needed to watch one network.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub network: Network,
    pub chain_id: u64,
    pub rpc_urls: Vec<Url>,
    pub confirmation_depth: u64,
    /// Resume point used when it is ahead of the persisted cursor.
    pub start_block: Option<u64>,
    pub tokens: Vec<TokenConfig>,
    pub rpc: RpcSettings,
    pub listener: ListenerSettings,
}

impl NetworkConfig {
    pub fn token_by_contract(&self, contract: &Address) -> Option<&TokenConfig> {
        self.tokens.iter().find(|t| t.contract_address == *contract)
    }

    pub fn token_by_symbol(&self, symbol: &str) -> Option<&TokenConfig> {
        self.tokens
            .iter()
            .find(|t| t.symbol.eq_ignore_ascii_case(symbol))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use alloy::primitives::address;

    pub const USDT: Address = address!("55d398326f99059fF775485246999027B3197955");

    /// BSC with USDT at 6 decimals and instant retries.
    pub fn bsc_network() -> NetworkConfig {
        NetworkConfig {
            network: Network::Bsc,
            chain_id: 56,
            rpc_urls: Vec::new(),
            confirmation_depth: 20,
            start_block: None,
            tokens: vec![TokenConfig {
                symbol: CompactString::const_new("USDT"),
                contract_address: USDT,
                decimals: Some(6),
            }],
            rpc: RpcSettings {
                retry_delay: Duration::ZERO,
                batch_delay: Duration::ZERO,
                receipt_poll_interval: Duration::ZERO,
                ..RpcSettings::default()
            },
            listener: ListenerSettings {
                poll_interval: Duration::from_millis(5),
                ..ListenerSettings::default()
            },
        }
    }
}
