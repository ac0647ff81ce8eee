//! SweepWorker processor.
//!
//! The SweepWorker is responsible for:
//! - Finding payment wallets with a tracked token balance
//! - Reading their on-chain balances in JSON-RPC batches
//! - Funding each wallet's gas from the master wallet
//! - Moving the full token balance to the master wallet
//! - Recording each leg as a `Withdraw` transfer history once it settles,
//!   or as a failed row when the token transfer cannot be sent
//!
//! Wallets are swept one at a time. A failing wallet is logged and skipped.

use crate::chain::{RoundRobinClient, RpcError, WalletDeriver, WalletType};
use crate::chain::hd_wallet::{DeriveError, DerivedAccount};
use crate::config::{NetworkConfig, SweepSettings, TokenConfig};
use crate::entities::TransferType;
use crate::entities::payment_wallet::WalletBalance;
use crate::entities::token_transfer_history::TokenTransferHistoryInsert;
use crate::processors::token_decimals::TokenDecimals;
use crate::repositories::Repositories;
use crate::units::{UnitError, from_smallest_unit, scale_by};
use alloy::primitives::{Address, B256, U256};
use compact_str::CompactString;
use paywatch_sdk::objects::Network;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("wallet derivation error: {0}")]
    Derive(#[from] DeriveError),

    #[error("unit conversion error: {0}")]
    Units(#[from] UnitError),

    #[error("wallet {wallet_id} derives to {derived}, expected {stored}")]
    AddressMismatch {
        wallet_id: i64,
        derived: Address,
        stored: String,
    },

    #[error("token transfer {0} reverted")]
    Reverted(B256),
}

/// Native token the wallet must receive before it can pay for the token transfer.
///
/// `gas × gas_price × buffer`, minus what the wallet already holds, floored at zero.
pub fn gas_top_up(
    gas: u64,
    gas_price: U256,
    buffer: Decimal,
    native_balance: U256,
) -> Result<U256, UnitError> {
    let cost = U256::from(gas)
        .checked_mul(gas_price)
        .ok_or(UnitError::Overflow)?;
    Ok(scale_by(cost, buffer)?.saturating_sub(native_balance))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub swept: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct SweepWorker {
    network: Network,
    tokens: Vec<TokenConfig>,
    client: Arc<RoundRobinClient>,
    repositories: Repositories,
    deriver: Arc<dyn WalletDeriver>,
    decimals: TokenDecimals,
    settings: SweepSettings,
}

impl SweepWorker {
    pub fn new(
        config: &NetworkConfig,
        client: Arc<RoundRobinClient>,
        repositories: Repositories,
        deriver: Arc<dyn WalletDeriver>,
        decimals: TokenDecimals,
        settings: SweepSettings,
    ) -> Self {
        Self {
            network: config.network,
            tokens: config.tokens.clone(),
            client,
            repositories,
            deriver,
            decimals,
            settings,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(network = %self.network, interval = ?self.settings.interval, "SweepWorker started");
        let start = tokio::time::Instant::now() + self.settings.interval;
        let mut ticker = tokio::time::interval_at(start, self.settings.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!(network = %self.network, "SweepWorker received shutdown signal");
                        break;
                    }
                }

                _ = ticker.tick() => {
                    let report = self.sweep_all().await;
                    info!(
                        network = %self.network,
                        swept = report.swept,
                        skipped = report.skipped,
                        failed = report.failed,
                        "Sweep finished"
                    );
                }
            }
        }

        info!(network = %self.network, "SweepWorker shutdown complete");
    }

    /// Sweep every configured token once.
    pub async fn sweep_all(&self) -> SweepReport {
        let mut report = SweepReport::default();

        let master = match self.deriver.master() {
            Ok(master) => master,
            Err(e) => {
                error!(network = %self.network, error = %e, "Failed to derive master wallet");
                return report;
            }
        };

        for token in &self.tokens {
            let wallets = match self
                .repositories
                .wallets
                .get_wallets_with_balance(self.network, token.symbol.clone())
                .await
            {
                Ok(wallets) => wallets,
                Err(e) => {
                    error!(network = %self.network, symbol = %token.symbol, error = %e, "Failed to list wallets to sweep");
                    continue;
                }
            };

            let (eligible, below_minimum): (Vec<_>, Vec<_>) = wallets.into_iter().partition(|w| {
                !w.balance.is_zero() && w.balance >= self.settings.minimum_withdraw
            });
            report.skipped += below_minimum.len();
            if eligible.is_empty() {
                continue;
            }

            let owners: Vec<Address> = eligible
                .iter()
                .filter_map(|w| w.address.parse().ok())
                .collect();
            let on_chain = match self
                .client
                .batch_token_balances(token.contract_address, &owners)
                .await
            {
                Ok(balances) => balances,
                Err(e) => {
                    warn!(network = %self.network, symbol = %token.symbol, error = %e, "Batch balance query failed, falling back to single calls");
                    HashMap::new()
                }
            };

            for wallet in eligible {
                match self.sweep_wallet(&master, token, &wallet, &on_chain).await {
                    Ok(true) => report.swept += 1,
                    Ok(false) => report.skipped += 1,
                    Err(e) => {
                        report.failed += 1;
                        error!(
                            network = %self.network,
                            symbol = %token.symbol,
                            wallet_id = wallet.wallet_id,
                            address = %wallet.address,
                            error = %e,
                            "Failed to sweep wallet"
                        );
                    }
                }
            }
        }

        report
    }

    /// Returns `false` when the wallet holds nothing on chain.
    async fn sweep_wallet(
        &self,
        master: &DerivedAccount,
        token: &TokenConfig,
        wallet: &WalletBalance,
        on_chain: &HashMap<Address, U256>,
    ) -> Result<bool, SweepError> {
        let index = u64::try_from(wallet.wallet_id).unwrap_or(0);
        let account = self.deriver.derive(WalletType::Payment, index)?;
        if !wallet
            .address
            .eq_ignore_ascii_case(&account.address.to_string())
        {
            return Err(SweepError::AddressMismatch {
                wallet_id: wallet.wallet_id,
                derived: account.address,
                stored: wallet.address.clone(),
            });
        }

        let amount = match on_chain.get(&account.address) {
            Some(amount) => *amount,
            None => {
                self.client
                    .token_balance(token.contract_address, account.address)
                    .await?
            }
        };
        if amount.is_zero() {
            debug!(wallet_id = wallet.wallet_id, symbol = %token.symbol, "Nothing to sweep on chain");
            return Ok(false);
        }
        let decimals = match token.decimals {
            Some(decimals) => decimals,
            None => self.decimals.get(token.contract_address).await?,
        };
        let native_decimals = self.network.native_decimals();

        let gas = self
            .client
            .estimate_token_transfer_gas(token.contract_address, account.address, master.address, amount)
            .await?;
        let (_, gas_price) = self.client.transaction_params(account.address).await?;
        let native_balance = self.client.native_balance(account.address).await?;
        let top_up = gas_top_up(gas, gas_price, self.settings.gas_buffer, native_balance)?;

        if !top_up.is_zero() {
            let receipt = self
                .client
                .transfer_native(&master.signer, account.address, top_up)
                .await?;
            let gas_leg = TokenTransferHistoryInsert {
                transaction_hash: format!("{:#x}", receipt.tx_hash),
                fee: fee(receipt.gas_used, receipt.gas_price, native_decimals)?,
                ..self.withdrawal(
                    master.address,
                    account.address,
                    CompactString::new(self.network.native_symbol()),
                    from_smallest_unit(top_up, native_decimals)?,
                )
            };
            self.repositories.transfers.record_many(vec![gas_leg]).await?;
            debug!(wallet_id = wallet.wallet_id, top_up = %top_up, tx_hash = %receipt.tx_hash, "Gas funded");
        }

        let swept = from_smallest_unit(amount, decimals)?;
        let token_leg = self.withdrawal(account.address, master.address, token.symbol.clone(), swept);
        let receipt = match self
            .client
            .transfer_token(&account.signer, token.contract_address, master.address, amount)
            .await
        {
            Ok(receipt) => receipt,
            Err(e) => {
                let failed = TokenTransferHistoryInsert {
                    status: false,
                    error_message: Some(e.to_string()),
                    ..token_leg
                };
                if let Err(db) = self.repositories.transfers.record_many(vec![failed]).await {
                    error!(wallet_id = wallet.wallet_id, error = %db, "Failed to record failed token transfer");
                }
                return Err(e.into());
            }
        };
        self.repositories
            .transfers
            .record_many(vec![TokenTransferHistoryInsert {
                transaction_hash: format!("{:#x}", receipt.tx_hash),
                fee: fee(receipt.gas_used, receipt.gas_price, native_decimals)?,
                status: receipt.status,
                error_message: (!receipt.status).then(|| "transaction reverted".to_string()),
                ..token_leg
            }])
            .await?;

        if !receipt.status {
            return Err(SweepError::Reverted(receipt.tx_hash));
        }
        if let Err(e) = self
            .repositories
            .wallets
            .debit_balance(wallet.wallet_id, self.network, token.symbol.clone(), swept)
            .await
        {
            warn!(wallet_id = wallet.wallet_id, error = %e, "Swept, but failed to debit tracked balance");
        }

        info!(
            network = %self.network,
            wallet_id = wallet.wallet_id,
            symbol = %token.symbol,
            amount = %swept,
            tx_hash = %receipt.tx_hash,
            "Wallet swept to master"
        );
        Ok(true)
    }

    /// A successful `Withdraw` row without a transaction yet.
    fn withdrawal(
        &self,
        from: Address,
        to: Address,
        symbol: CompactString,
        amount: Decimal,
    ) -> TokenTransferHistoryInsert {
        TokenTransferHistoryInsert {
            network: self.network,
            transaction_hash: String::new(),
            from_address: from.to_string(),
            to_address: to.to_string(),
            symbol,
            token_amount: amount,
            fee: Decimal::ZERO,
            status: true,
            error_message: None,
            transfer_type: TransferType::Withdraw,
        }
    }
}

fn fee(gas_used: u64, gas_price: U256, native_decimals: u8) -> Result<Decimal, UnitError> {
    let wei = U256::from(gas_used)
        .checked_mul(gas_price)
        .ok_or(UnitError::Overflow)?;
    from_smallest_unit(wei, native_decimals)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::chain::rpc::mock::{MockNode, client, fast_settings, receipt, word};
    use crate::config::fixtures::bsc_network;
    use crate::repositories::memory::MemoryRepository;
    use alloy::signers::local::{LocalSignerError, PrivateKeySigner};
    use serde_json::json;
    use std::str::FromStr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_gas_top_up_applies_buffer() {
        // 21_000 gas at 10 gwei with a 15% buffer.
        let gwei = U256::from(1_000_000_000u64);
        let top_up = gas_top_up(21_000, gwei * U256::from(10), dec("1.15"), U256::ZERO).unwrap();
        assert_eq!(top_up, U256::from(241_500_000_000_000u64));
    }

    #[test]
    fn test_gas_top_up_subtracts_existing_balance() {
        let gwei = U256::from(1_000_000_000u64);
        let cost = U256::from(241_500_000_000_000u64);
        let partial = gas_top_up(21_000, gwei * U256::from(10), dec("1.15"), cost - U256::from(1)).unwrap();
        assert_eq!(partial, U256::from(1));
        let covered = gas_top_up(21_000, gwei * U256::from(10), dec("1.15"), cost * U256::from(2)).unwrap();
        assert_eq!(covered, U256::ZERO);
    }

    /// Keys derived from the wallet index; the master is key `0x7f…7f`.
    struct FixedKeys;

    impl WalletDeriver for FixedKeys {
        fn derive(&self, wallet_type: WalletType, index: u64) -> Result<DerivedAccount, DeriveError> {
            let byte = match wallet_type {
                WalletType::Receiving => 0x7f,
                _ => u8::try_from(index + 1).map_err(|_| DeriveError::IndexOutOfRange(index))?,
            };
            let signer = PrivateKeySigner::from_bytes(&B256::repeat_byte(byte))
                .map_err(LocalSignerError::from)?;
            Ok(DerivedAccount {
                address: signer.address(),
                signer,
            })
        }
    }

    #[test]
    fn test_fixed_keys_are_valid() {
        let deriver = FixedKeys;
        let master = deriver.master().unwrap();
        let deposit = deriver.derive(WalletType::Payment, 1).unwrap();
        assert_ne!(master.address, deposit.address);
    }

    /// A node that funds `master` with 1 BNB and holds 50 USDT in every wallet.
    /// `eth_sendRawTransaction` calls after the first `accepted_sends` fail.
    fn funded_chain(master: Address, accepted_sends: usize) -> MockNode {
        let sends = Arc::new(AtomicUsize::new(0));
        let tx_hash = B256::repeat_byte(0x11);
        MockNode::new(move |method, params| match method {
            "eth_call" => Ok(word(50_000_000)),
            "eth_estimateGas" => Ok(json!("0xea60")),
            "eth_getTransactionCount" => Ok(json!("0x0")),
            "eth_gasPrice" => Ok(json!("0x3b9aca00")),
            "eth_chainId" => Ok(json!("0x38")),
            "eth_getBalance" => {
                let owner = params[0].as_str().unwrap_or_default();
                if owner.eq_ignore_ascii_case(&master.to_string()) {
                    Ok(json!("0xde0b6b3a7640000"))
                } else {
                    Ok(json!("0x0"))
                }
            }
            "eth_sendRawTransaction" => {
                if sends.fetch_add(1, Ordering::SeqCst) < accepted_sends {
                    Ok(json!(format!("{tx_hash:#x}")))
                } else {
                    Err("nonce too low".to_string())
                }
            }
            "eth_getTransactionReceipt" => Ok(receipt(tx_hash, true, 0x5208, 0x77359400)),
            other => Err(format!("unexpected method {other}")),
        })
    }

    fn sweep_fixture(accepted_sends: usize) -> (Arc<MemoryRepository>, SweepWorker) {
        let deriver = Arc::new(FixedKeys);
        let master = deriver.master().unwrap();
        let deposit = deriver.derive(WalletType::Payment, 1).unwrap();

        let repo = MemoryRepository::with_orders(vec![]);
        {
            let mut state = repo.state.lock().unwrap();
            state.wallet_addresses.insert(1, deposit.address.to_string());
            state
                .balances
                .insert((1, Network::Bsc, CompactString::const_new("USDT")), dec("50"));
            // Below the minimum withdraw threshold.
            state.wallet_addresses.insert(2, Address::repeat_byte(2).to_string());
            state
                .balances
                .insert((2, Network::Bsc, CompactString::const_new("USDT")), dec("0.5"));
        }

        let client = Arc::new(client(
            &[funded_chain(master.address, accepted_sends)],
            fast_settings(),
        ));
        let decimals = TokenDecimals::new(Network::Bsc, client.clone(), Arc::new(MemoryCache::new()));
        let worker = SweepWorker::new(
            &bsc_network(),
            client,
            repo.repositories(),
            deriver,
            decimals,
            SweepSettings {
                minimum_withdraw: dec("1"),
                ..SweepSettings::default()
            },
        );
        (repo, worker)
    }

    #[tokio::test]
    async fn test_sweep_funds_gas_and_moves_balance() {
        let (repo, worker) = sweep_fixture(usize::MAX);

        let report = worker.sweep_all().await;
        assert_eq!(
            report,
            SweepReport {
                swept: 1,
                skipped: 1,
                failed: 0
            }
        );

        let state = repo.state.lock().unwrap();
        assert_eq!(state.transfers.len(), 2);
        let gas_leg = &state.transfers[0];
        assert_eq!(gas_leg.symbol, "BNB");
        // 60_000 gas at 1 gwei doubled by the multiplier, plus 15%.
        assert_eq!(gas_leg.token_amount, dec("0.000138"));
        let token_leg = &state.transfers[1];
        assert_eq!(token_leg.symbol, "USDT");
        assert_eq!(token_leg.token_amount, dec("50"));
        assert!(token_leg.status);
        assert!(state
            .transfers
            .iter()
            .all(|t| t.transfer_type == TransferType::Withdraw));
        assert_eq!(
            state.balances[&(1, Network::Bsc, CompactString::const_new("USDT"))],
            Decimal::ZERO
        );
    }

    #[tokio::test]
    async fn test_gas_leg_is_kept_when_token_transfer_fails() {
        let (repo, worker) = sweep_fixture(1);

        let report = worker.sweep_all().await;
        assert_eq!(
            report,
            SweepReport {
                swept: 0,
                skipped: 1,
                failed: 1
            }
        );

        let state = repo.state.lock().unwrap();
        assert_eq!(state.transfers.len(), 2);
        let gas_leg = &state.transfers[0];
        assert_eq!(gas_leg.symbol, "BNB");
        assert!(gas_leg.status);
        assert_eq!(gas_leg.transaction_hash, format!("{:#x}", B256::repeat_byte(0x11)));

        let token_leg = &state.transfers[1];
        assert_eq!(token_leg.symbol, "USDT");
        assert_eq!(token_leg.token_amount, dec("50"));
        assert!(!token_leg.status);
        assert!(token_leg.error_message.is_some());
        assert!(token_leg.transaction_hash.is_empty());
        assert_eq!(
            state.balances[&(1, Network::Bsc, CompactString::const_new("USDT"))],
            dec("50")
        );
    }
}
