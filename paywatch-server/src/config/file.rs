//! TOML file configuration structures.
//!
//! These structs directly map to the `paywatch.toml` file format.

use alloy::primitives::Address;
use compact_str::CompactString;
use paywatch_sdk::objects::Network;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddr};
use url::Url;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub payment: PaymentConfig,
    #[serde(default)]
    pub networks: Vec<NetworkConfig>,
    #[serde(default)]
    pub catchup: CatchupConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub order_cleaner: OrderCleanerConfig,
    #[serde(default)]
    pub balance_refresh: BalanceRefreshConfig,
}

/// Server configuration section.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address of the health endpoint (e.g., "0.0.0.0:8080").
    #[serde(default = "default_listen_addr")]
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

/// HD wallet seed. The mnemonic may also come from `PAYWATCH_MNEMONIC`.
#[derive(Clone, Default, Deserialize)]
pub struct WalletConfig {
    #[serde(default)]
    pub mnemonic: String,
    #[serde(default)]
    pub passphrase: String,
    #[serde(default)]
    pub salt: String,
}

impl std::fmt::Debug for WalletConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletConfig").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoveringKind {
    #[default]
    Absolute,
    Percentage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    #[serde(default)]
    pub covering_strategy: CoveringKind,
    /// Whole tokens for `absolute`, percent for `percentage`.
    #[serde(default)]
    pub covering_value: Decimal,
    #[serde(default = "default_order_capacity")]
    pub order_capacity: usize,
    #[serde(default = "default_dequeue_interval_secs")]
    pub dequeue_interval_secs: u64,
    #[serde(default = "default_webhook_concurrency")]
    pub webhook_concurrency: usize,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            covering_strategy: CoveringKind::default(),
            covering_value: Decimal::ZERO,
            order_capacity: default_order_capacity(),
            dequeue_interval_secs: default_dequeue_interval_secs(),
            webhook_concurrency: default_webhook_concurrency(),
        }
    }
}

fn default_order_capacity() -> usize {
    1000
}

fn default_dequeue_interval_secs() -> u64 {
    5
}

fn default_webhook_concurrency() -> usize {
    10
}

/// One watched network.
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    pub network: Network,
    pub chain_id: u64,
    pub rpc_urls: Vec<Url>,
    /// Defaults to the network's usual finality depth.
    pub confirmation_depth: Option<u64>,
    pub start_block: Option<u64>,
    pub gas_price_multiplier: Option<Decimal>,
    pub endpoint_cooldown_secs: Option<u64>,
    pub retry_delay_ms: Option<u64>,
    pub chunk_size: Option<u64>,
    #[serde(default)]
    pub tokens: Vec<TokenConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub symbol: CompactString,
    pub contract_address: Address,
    pub decimals: Option<u8>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatchupConfig {
    #[serde(default = "default_catchup_interval_secs")]
    pub interval_secs: u64,
}

impl Default for CatchupConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_catchup_interval_secs(),
        }
    }
}

fn default_catchup_interval_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_sweep_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_gas_buffer")]
    pub gas_buffer: Decimal,
    #[serde(default)]
    pub minimum_withdraw: Decimal,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_sweep_interval_secs(),
            gas_buffer: default_gas_buffer(),
            minimum_withdraw: Decimal::ZERO,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_sweep_interval_secs() -> u64 {
    24 * 60 * 60
}

fn default_gas_buffer() -> Decimal {
    Decimal::new(115, 2)
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderCleanerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_cleaner_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_pending_timeout_secs")]
    pub pending_timeout_secs: u64,
}

impl Default for OrderCleanerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_cleaner_interval_secs(),
            pending_timeout_secs: default_pending_timeout_secs(),
        }
    }
}

fn default_cleaner_interval_secs() -> u64 {
    60
}

fn default_pending_timeout_secs() -> u64 {
    24 * 60 * 60
}

#[derive(Debug, Clone, Deserialize)]
pub struct BalanceRefreshConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_balance_refresh_interval_secs")]
    pub interval_secs: u64,
}

impl Default for BalanceRefreshConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_balance_refresh_interval_secs(),
        }
    }
}

fn default_balance_refresh_interval_secs() -> u64 {
    60
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_full_config_parsing() {
        let toml_str = r#"
[server]
listen = "127.0.0.1:3000"

[log]
json = true

[wallet]
mnemonic = "test test test test test test test test test test test junk"
salt = "shop"

[payment]
covering_strategy = "percentage"
covering_value = "1.5"
order_capacity = 200

[[networks]]
network = "BSC"
chain_id = 56
rpc_urls = ["https://bsc-dataseed.bnbchain.org", "https://bsc.publicnode.com"]
start_block = 40000000

[[networks.tokens]]
symbol = "USDT"
contract_address = "0x55d398326f99059fF775485246999027B3197955"
decimals = 18

[sweep]
enabled = false

[balance_refresh]
interval_secs = 300
"#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen.port(), 3000);
        assert!(config.log.json);
        assert_eq!(config.payment.covering_strategy, CoveringKind::Percentage);
        assert_eq!(config.payment.covering_value, Decimal::from_str("1.5").unwrap());
        assert_eq!(config.payment.order_capacity, 200);
        assert_eq!(config.payment.dequeue_interval_secs, 5);

        let bsc = &config.networks[0];
        assert_eq!(bsc.network, Network::Bsc);
        assert_eq!(bsc.rpc_urls.len(), 2);
        assert_eq!(bsc.start_block, Some(40_000_000));
        assert_eq!(bsc.confirmation_depth, None);
        assert_eq!(bsc.tokens[0].symbol, "USDT");
        assert_eq!(bsc.tokens[0].decimals, Some(18));

        assert!(!config.sweep.enabled);
        assert_eq!(config.sweep.gas_buffer, Decimal::new(115, 2));
        assert_eq!(config.catchup.interval_secs, 60);
        assert!(!config.order_cleaner.enabled);
        assert!(config.balance_refresh.enabled);
        assert_eq!(config.balance_refresh.interval_secs, 300);
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: FileConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.listen, default_listen_addr());
        assert!(!config.log.json);
        assert_eq!(config.payment.covering_strategy, CoveringKind::Absolute);
        assert_eq!(config.payment.order_capacity, 1000);
        assert!(config.networks.is_empty());
        assert!(config.sweep.enabled);
        assert_eq!(config.balance_refresh.interval_secs, 60);
    }
}
