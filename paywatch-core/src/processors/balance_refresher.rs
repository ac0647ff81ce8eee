//! BalanceRefresher processor.
//!
//! Payments credit and sweeps debit the tracked wallet balances, which drift
//! from the chain whenever funds arrive outside an order or a transfer fails
//! half-way. Every tick this worker reads the token and native balances of all
//! deposit wallets in JSON-RPC batches and overwrites the tracked values.
//!
//! Wallets whose individual balance call failed keep their previous value.

use crate::chain::{RoundRobinClient, RpcError};
use crate::config::{BalanceRefreshSettings, NetworkConfig, TokenConfig};
use crate::processors::token_decimals::TokenDecimals;
use crate::repositories::WalletRepository;
use crate::units::{UnitError, from_smallest_unit};
use alloy::primitives::{Address, U256};
use compact_str::CompactString;
use paywatch_sdk::objects::Network;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum BalanceRefreshError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("unit conversion error: {0}")]
    Units(#[from] UnitError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub wallets: usize,
    /// Balance rows written, across all assets.
    pub updated: u64,
}

pub struct BalanceRefresher {
    network: Network,
    tokens: Vec<TokenConfig>,
    client: Arc<RoundRobinClient>,
    wallets: Arc<dyn WalletRepository>,
    decimals: TokenDecimals,
    settings: BalanceRefreshSettings,
}

impl BalanceRefresher {
    pub fn new(
        config: &NetworkConfig,
        client: Arc<RoundRobinClient>,
        wallets: Arc<dyn WalletRepository>,
        decimals: TokenDecimals,
        settings: BalanceRefreshSettings,
    ) -> Self {
        Self {
            network: config.network,
            tokens: config.tokens.clone(),
            client,
            wallets,
            decimals,
            settings,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(network = %self.network, interval = ?self.settings.interval, "BalanceRefresher started");
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!(network = %self.network, "BalanceRefresher received shutdown signal");
                        break;
                    }
                }

                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(report) => debug!(
                            network = %self.network,
                            wallets = report.wallets,
                            updated = report.updated,
                            "Wallet balances refreshed"
                        ),
                        Err(e) => error!(network = %self.network, error = %e, "Wallet balance refresh failed"),
                    }
                }
            }
        }

        info!(network = %self.network, "BalanceRefresher shutdown complete");
    }

    pub async fn run_once(&self) -> Result<RefreshReport, BalanceRefreshError> {
        let owners: Vec<(i64, Address)> = self
            .wallets
            .list_wallets()
            .await?
            .into_iter()
            .filter_map(|w| match w.address.parse() {
                Ok(address) => Some((w.id, address)),
                Err(e) => {
                    warn!(wallet_id = w.id, address = %w.address, error = %e, "Skipping wallet with invalid address");
                    None
                }
            })
            .collect();
        let mut report = RefreshReport {
            wallets: owners.len(),
            updated: 0,
        };
        if owners.is_empty() {
            return Ok(report);
        }
        let addresses: Vec<Address> = owners.iter().map(|(_, address)| *address).collect();

        for token in &self.tokens {
            let decimals = match token.decimals {
                Some(decimals) => decimals,
                None => self.decimals.get(token.contract_address).await?,
            };
            let on_chain = self
                .client
                .batch_token_balances(token.contract_address, &addresses)
                .await?;
            report.updated += self
                .store(token.symbol.clone(), &owners, &on_chain, decimals)
                .await?;
        }

        let native = self.client.batch_native_balances(&addresses).await?;
        report.updated += self
            .store(
                CompactString::new(self.network.native_symbol()),
                &owners,
                &native,
                self.network.native_decimals(),
            )
            .await?;

        Ok(report)
    }

    async fn store(
        &self,
        symbol: CompactString,
        owners: &[(i64, Address)],
        on_chain: &HashMap<Address, U256>,
        decimals: u8,
    ) -> Result<u64, BalanceRefreshError> {
        let mut balances: Vec<(i64, Decimal)> = Vec::with_capacity(on_chain.len());
        for (wallet_id, address) in owners {
            if let Some(raw) = on_chain.get(address) {
                balances.push((*wallet_id, from_smallest_unit(*raw, decimals)?));
            }
        }
        let missing = owners.len() - balances.len();
        if missing > 0 {
            warn!(network = %self.network, symbol = %symbol, missing, "Some wallet balances could not be read");
        }
        Ok(self
            .wallets
            .set_balances(self.network, symbol, balances)
            .await?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::chain::rpc::mock::{MockNode, call_input, client, fast_settings, word};
    use crate::config::fixtures::bsc_network;
    use crate::repositories::memory::MemoryRepository;
    use serde_json::json;

    fn key(wallet_id: i64, symbol: &'static str) -> (i64, Network, CompactString) {
        (wallet_id, Network::Bsc, CompactString::const_new(symbol))
    }

    /// `balanceOf(0xNN…NN)` answers NN whole USDT; only `0x21…21` holds 1 BNB
    /// and the native balance call of `0x22…22` fails.
    fn balances_chain() -> MockNode {
        MockNode::new(|method, params| match method {
            "eth_call" => {
                let input = call_input(params);
                let byte = u64::from_str_radix(&input[input.len() - 2..], 16).unwrap();
                Ok(word(byte * 1_000_000))
            }
            "eth_getBalance" => {
                let owner: Address = params[0].as_str().unwrap().parse().unwrap();
                if owner == Address::repeat_byte(0x21) {
                    Ok(json!("0xde0b6b3a7640000"))
                } else {
                    Err("header not found".to_string())
                }
            }
            other => Err(format!("unexpected method {other}")),
        })
    }

    #[tokio::test]
    async fn test_refresh_overwrites_tracked_balances() {
        let repo = MemoryRepository::with_orders(vec![]);
        {
            let mut state = repo.state.lock().unwrap();
            state
                .wallet_addresses
                .insert(1, Address::repeat_byte(0x21).to_string());
            state
                .wallet_addresses
                .insert(2, Address::repeat_byte(0x22).to_string());
            state.wallet_addresses.insert(3, "not-an-address".to_string());
            state.balances.insert(key(1, "USDT"), Decimal::from(50));
            state.balances.insert(key(2, "BNB"), Decimal::from(5));
        }

        let client = Arc::new(client(&[balances_chain()], fast_settings()));
        let decimals = TokenDecimals::new(Network::Bsc, client.clone(), Arc::new(MemoryCache::new()));
        let refresher = BalanceRefresher::new(
            &bsc_network(),
            client,
            repo.clone(),
            decimals,
            BalanceRefreshSettings::default(),
        );

        let report = refresher.run_once().await.unwrap();
        assert_eq!(report, RefreshReport { wallets: 2, updated: 3 });

        let state = repo.state.lock().unwrap();
        assert_eq!(state.balances[&key(1, "USDT")], Decimal::from(33));
        assert_eq!(state.balances[&key(2, "USDT")], Decimal::from(34));
        assert_eq!(state.balances[&key(1, "BNB")], Decimal::ONE);
        // Unreadable on chain: left as it was.
        assert_eq!(state.balances[&key(2, "BNB")], Decimal::from(5));
    }

    #[tokio::test]
    async fn test_refresh_without_wallets_makes_no_calls() {
        let repo = MemoryRepository::with_orders(vec![]);
        let node = balances_chain();
        let client = Arc::new(client(&[node.clone()], fast_settings()));
        let decimals = TokenDecimals::new(Network::Bsc, client.clone(), Arc::new(MemoryCache::new()));
        let refresher = BalanceRefresher::new(
            &bsc_network(),
            client,
            repo,
            decimals,
            BalanceRefreshSettings::default(),
        );

        assert_eq!(refresher.run_once().await.unwrap(), RefreshReport::default());
        assert_eq!(node.calls(), 0);
    }
}
