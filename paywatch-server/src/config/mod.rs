//! Configuration module for paywatch-server.
//!
//! Handles loading configuration from the TOML file, CLI arguments,
//! and environment variables, and converts it into the settings the
//! core processors take.

pub mod file;

use crate::config::file::{
    CoveringKind, FileConfig, NetworkConfig as FileNetworkConfig, TokenConfig as FileTokenConfig,
};
use paywatch_core::config::{
    BalanceRefreshSettings, CatchupSettings, CleanerSettings, ListenerSettings, NetworkConfig,
    PaymentSettings, RpcSettings, SweepSettings, TokenConfig, WalletSeed,
};
use paywatch_core::settlement::{AbsoluteDiscount, CoveringStrategy, PercentageDiscount};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment variable that overrides `[wallet].mnemonic`.
pub const MNEMONIC_ENV: &str = "PAYWATCH_MNEMONIC";

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("DATABASE_URL environment variable not set")]
    MissingDatabaseUrl,
}

/// Validated configuration, ready to hand to the processors.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub listen: SocketAddr,
    pub json_logs: bool,
    pub seed: WalletSeed,
    pub payment: PaymentSettings,
    pub networks: Vec<NetworkConfig>,
    pub catchup: CatchupSettings,
    pub sweep: SweepSettings,
    pub cleaner: CleanerSettings,
    pub balance_refresh: BalanceRefreshSettings,
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: std::path::PathBuf,
    listen_override: Option<SocketAddr>,
}

impl ConfigLoader {
    /// Create a new config loader.
    pub fn new(config_path: impl AsRef<Path>, listen_override: Option<SocketAddr>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            listen_override,
        }
    }

    /// Load and process the configuration.
    ///
    /// This will:
    /// 1. Read the TOML file
    /// 2. Apply CLI and environment overrides
    /// 3. Validate the configuration
    /// 4. Build the processor settings
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let config_content = std::fs::read_to_string(&self.config_path)?;
        let mnemonic_override = std::env::var(MNEMONIC_ENV).ok();
        self.load_str(&config_content, mnemonic_override)
    }

    fn load_str(
        &self,
        content: &str,
        mnemonic_override: Option<String>,
    ) -> Result<LoadedConfig, ConfigError> {
        let mut file_config: FileConfig = toml::from_str(content)?;

        if let Some(listen) = self.listen_override {
            file_config.server.listen = listen;
        }
        if let Some(mnemonic) = mnemonic_override.filter(|m| !m.trim().is_empty()) {
            file_config.wallet.mnemonic = mnemonic;
        }

        validate(&file_config)?;
        Ok(build_loaded_config(file_config))
    }
}

fn validate(config: &FileConfig) -> Result<(), ConfigError> {
    if config.wallet.mnemonic.trim().is_empty() {
        return Err(ConfigError::ValidationError(format!(
            "wallet mnemonic is empty; set [wallet].mnemonic or {MNEMONIC_ENV}"
        )));
    }
    if config.networks.is_empty() {
        return Err(ConfigError::ValidationError(
            "no [[networks]] configured".to_string(),
        ));
    }
    if config.payment.order_capacity == 0 {
        return Err(ConfigError::ValidationError(
            "payment.order_capacity must be greater than 0".to_string(),
        ));
    }
    match config.payment.covering_strategy {
        CoveringKind::Percentage
            if config.payment.covering_value < Decimal::ZERO
                || config.payment.covering_value > Decimal::ONE_HUNDRED =>
        {
            return Err(ConfigError::ValidationError(format!(
                "percentage covering value {} is outside [0, 100]",
                config.payment.covering_value
            )));
        }
        CoveringKind::Absolute if config.payment.covering_value < Decimal::ZERO => {
            return Err(ConfigError::ValidationError(format!(
                "absolute covering value {} is negative",
                config.payment.covering_value
            )));
        }
        _ => {}
    }
    if config.sweep.gas_buffer < Decimal::ONE {
        return Err(ConfigError::ValidationError(format!(
            "sweep.gas_buffer {} must be at least 1",
            config.sweep.gas_buffer
        )));
    }

    let mut seen = HashSet::new();
    for network in &config.networks {
        if !seen.insert(network.network) {
            return Err(ConfigError::ValidationError(format!(
                "network {} is configured more than once",
                network.network
            )));
        }
        if network.rpc_urls.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "network {} has no rpc_urls",
                network.network
            )));
        }
        if network.tokens.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "network {} has no tokens",
                network.network
            )));
        }
        if network.chunk_size == Some(0) {
            return Err(ConfigError::ValidationError(format!(
                "network {} has a chunk_size of 0",
                network.network
            )));
        }
        let mut contracts = HashSet::new();
        for token in &network.tokens {
            if !contracts.insert(token.contract_address) {
                return Err(ConfigError::ValidationError(format!(
                    "token contract {} is listed twice on {}",
                    token.contract_address, network.network
                )));
            }
        }
    }
    Ok(())
}

fn build_loaded_config(file_config: FileConfig) -> LoadedConfig {
    let covering = match file_config.payment.covering_strategy {
        CoveringKind::Absolute => CoveringStrategy::Absolute(AbsoluteDiscount {
            discount: file_config.payment.covering_value,
        }),
        CoveringKind::Percentage => CoveringStrategy::Percentage(PercentageDiscount {
            percent: file_config.payment.covering_value,
        }),
    };

    LoadedConfig {
        listen: file_config.server.listen,
        json_logs: file_config.log.json,
        seed: WalletSeed {
            mnemonic: file_config.wallet.mnemonic,
            passphrase: file_config.wallet.passphrase,
            salt: file_config.wallet.salt,
        },
        payment: PaymentSettings {
            covering,
            order_capacity: file_config.payment.order_capacity,
            dequeue_interval: Duration::from_secs(file_config.payment.dequeue_interval_secs),
            webhook_concurrency: file_config.payment.webhook_concurrency,
        },
        networks: file_config
            .networks
            .into_iter()
            .map(convert_network)
            .collect(),
        catchup: CatchupSettings {
            interval: Duration::from_secs(file_config.catchup.interval_secs),
            ..CatchupSettings::default()
        },
        sweep: SweepSettings {
            enabled: file_config.sweep.enabled,
            interval: Duration::from_secs(file_config.sweep.interval_secs),
            gas_buffer: file_config.sweep.gas_buffer,
            minimum_withdraw: file_config.sweep.minimum_withdraw,
        },
        cleaner: CleanerSettings {
            enabled: file_config.order_cleaner.enabled,
            interval: Duration::from_secs(file_config.order_cleaner.interval_secs),
            pending_timeout: Duration::from_secs(file_config.order_cleaner.pending_timeout_secs),
        },
        balance_refresh: BalanceRefreshSettings {
            enabled: file_config.balance_refresh.enabled,
            interval: Duration::from_secs(file_config.balance_refresh.interval_secs),
        },
    }
}

fn convert_network(n: FileNetworkConfig) -> NetworkConfig {
    let mut rpc = RpcSettings::default();
    if let Some(multiplier) = n.gas_price_multiplier {
        rpc.gas_price_multiplier = multiplier;
    }
    if let Some(secs) = n.endpoint_cooldown_secs {
        rpc.endpoint_cooldown = Duration::from_secs(secs);
    }
    if let Some(ms) = n.retry_delay_ms {
        rpc.retry_delay = Duration::from_millis(ms);
    }

    let mut listener = ListenerSettings::default();
    if let Some(chunk_size) = n.chunk_size {
        listener.chunk_size = chunk_size;
    }

    NetworkConfig {
        network: n.network,
        chain_id: n.chain_id,
        rpc_urls: n.rpc_urls,
        confirmation_depth: n
            .confirmation_depth
            .unwrap_or_else(|| n.network.default_confirmation_depth()),
        start_block: n.start_block,
        tokens: n.tokens.into_iter().map(convert_token).collect(),
        rpc,
        listener,
    }
}

fn convert_token(t: FileTokenConfig) -> TokenConfig {
    TokenConfig {
        symbol: t.symbol,
        contract_address: t.contract_address,
        decimals: t.decimals,
    }
}

/// Get the database URL from the environment.
pub fn get_database_url() -> Result<String, ConfigError> {
    std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)
}
