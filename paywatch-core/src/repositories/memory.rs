//! In-memory repositories for unit tests.

#![allow(clippy::unwrap_used)]

use super::*;
use crate::entities::{NetworkType, OrderStatus, utc_now};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

#[derive(Default)]
pub(crate) struct MemoryState {
    pub orders: BTreeMap<i64, PaymentOrder>,
    pub histories: Vec<PaymentEventHistoryInsert>,
    pub statistics: Vec<(Network, CompactString, String, Decimal, bool)>,
    pub balances: HashMap<(i64, Network, CompactString), Decimal>,
    pub wallet_addresses: HashMap<i64, String>,
    pub transfers: Vec<TokenTransferHistoryInsert>,
    pub last_processed: HashMap<Network, u64>,
    pub latest: HashMap<Network, u64>,
    pub released_wallets: Vec<i64>,
    pub fail_updates: bool,
}

#[derive(Default)]
pub(crate) struct MemoryRepository {
    pub state: Mutex<MemoryState>,
}

impl MemoryRepository {
    pub fn with_orders(orders: Vec<PaymentOrder>) -> Arc<Self> {
        let repo = Self::default();
        {
            let mut state = repo.state.lock().unwrap();
            for order in orders {
                state
                    .wallet_addresses
                    .insert(order.wallet_id, order.wallet_address.clone());
                state.orders.insert(order.id, order);
            }
        }
        Arc::new(repo)
    }

    pub fn order(&self, id: i64) -> PaymentOrder {
        self.state.lock().unwrap().orders[&id].clone()
    }

    pub fn repositories(self: &Arc<Self>) -> Repositories {
        Repositories {
            orders: self.clone(),
            block_states: self.clone(),
            histories: self.clone(),
            statistics: self.clone(),
            wallets: self.clone(),
            transfers: self.clone(),
        }
    }
}

fn is_active(order: &PaymentOrder, now: PrimitiveDateTime) -> bool {
    match order.status {
        OrderStatus::Processing => true,
        OrderStatus::Pending | OrderStatus::Partial => order.expired_time > now,
        _ => false,
    }
}

#[async_trait]
impl OrderRepository for MemoryRepository {
    async fn get_active_orders(
        &self,
        network: Network,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<PaymentOrder>, sqlx::Error> {
        let now = utc_now();
        let state = self.state.lock().unwrap();
        let mut orders: Vec<PaymentOrder> = state
            .orders
            .values()
            .filter(|o| o.network == NetworkType::from(network) && is_active(o, now))
            .cloned()
            .collect();
        orders.sort_by_key(|o| (o.expired_time, o.id));
        Ok(orders
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<PaymentOrder>, sqlx::Error> {
        Ok(self.state.lock().unwrap().orders.get(&id).cloned())
    }

    async fn update(&self, id: i64, update: OrderUpdate) -> Result<bool, sqlx::Error> {
        let mut state = self.state.lock().unwrap();
        if state.fail_updates {
            return Err(sqlx::Error::PoolTimedOut);
        }
        let Some(order) = state.orders.get_mut(&id) else {
            return Ok(false);
        };
        if !update.applies_to(order.status) {
            return Ok(false);
        }
        if let Some(h) = update.block_height {
            order.block_height = h;
        }
        if let Some(h) = update.upcoming_block_height {
            order.upcoming_block_height = h;
        }
        if let Some(t) = update.transferred {
            order.transferred = order.transferred.max(t);
        }
        if let Some(n) = update.network
            && order.status == OrderStatus::Pending
        {
            order.network = n.into();
        }
        if let Some(s) = update.status {
            order.status = s;
            if s == OrderStatus::Success {
                order.succeeded_at = Some(utc_now());
                let wallet_id = order.wallet_id;
                state.released_wallets.push(wallet_id);
            }
        }
        Ok(true)
    }

    async fn batch_update_to_expired(&self, ids: &[i64]) -> Result<u64, sqlx::Error> {
        let mut state = self.state.lock().unwrap();
        let mut changed = 0;
        for id in ids {
            if let Some(order) = state.orders.get_mut(id)
                && !matches!(order.status, OrderStatus::Success | OrderStatus::Failed)
            {
                order.status = OrderStatus::Expired;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn batch_update_block_heights(&self, heights: &[(i64, i64)]) -> Result<u64, sqlx::Error> {
        let mut state = self.state.lock().unwrap();
        let mut changed = 0;
        for (id, height) in heights {
            if let Some(order) = state.orders.get_mut(id)
                && order.block_height < *height
            {
                order.block_height = *height;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn get_expired_unsettled(
        &self,
        network: Network,
        cutoff: PrimitiveDateTime,
    ) -> Result<Vec<PaymentOrder>, sqlx::Error> {
        let now = utc_now();
        let state = self.state.lock().unwrap();
        let mut orders: Vec<PaymentOrder> = state
            .orders
            .values()
            .filter(|o| {
                o.network == NetworkType::from(network)
                    && !matches!(o.status, OrderStatus::Success | OrderStatus::Failed)
                    && o.expired_time <= now
                    && o.expired_time > cutoff
            })
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.block_height);
        Ok(orders)
    }

    async fn get_stale_pending(
        &self,
        network: Network,
        cutoff: PrimitiveDateTime,
    ) -> Result<Vec<PaymentOrder>, sqlx::Error> {
        let state = self.state.lock().unwrap();
        Ok(state
            .orders
            .values()
            .filter(|o| {
                o.network == NetworkType::from(network)
                    && o.status == OrderStatus::Pending
                    && o.transferred.is_zero()
                    && o.expired_time <= cutoff
            })
            .cloned()
            .collect())
    }

    async fn fail_stale_pending(&self, ids: &[i64]) -> Result<Vec<i64>, sqlx::Error> {
        let mut state = self.state.lock().unwrap();
        let mut failed = Vec::new();
        let mut released = Vec::new();
        for id in ids {
            if let Some(order) = state.orders.get_mut(id)
                && order.status == OrderStatus::Pending
            {
                order.status = OrderStatus::Failed;
                failed.push(*id);
                released.push(order.wallet_id);
            }
        }
        state.released_wallets.extend(released);
        Ok(failed)
    }

    async fn release_expired_wallets(
        &self,
        network: Network,
        cutoff: PrimitiveDateTime,
    ) -> Result<u64, sqlx::Error> {
        let mut state = self.state.lock().unwrap();
        let wallets: Vec<i64> = state
            .orders
            .values()
            .filter(|o| {
                o.network == NetworkType::from(network)
                    && o.status == OrderStatus::Expired
                    && o.expired_time <= cutoff
            })
            .map(|o| o.wallet_id)
            .collect();
        let count = wallets.len() as u64;
        state.released_wallets.extend(wallets);
        Ok(count)
    }
}

#[async_trait]
impl BlockStateRepository for MemoryRepository {
    async fn get_last_processed_block(&self, network: Network) -> Result<Option<u64>, sqlx::Error> {
        Ok(self.state.lock().unwrap().last_processed.get(&network).copied())
    }

    async fn update_last_processed_block(&self, network: Network, block: u64) -> Result<(), sqlx::Error> {
        let mut state = self.state.lock().unwrap();
        let entry = state.last_processed.entry(network).or_insert(0);
        *entry = (*entry).max(block);
        Ok(())
    }

    async fn get_latest_block(&self, network: Network) -> Result<Option<u64>, sqlx::Error> {
        Ok(self.state.lock().unwrap().latest.get(&network).copied())
    }

    async fn update_latest_block(&self, network: Network, block: u64) -> Result<(), sqlx::Error> {
        self.state.lock().unwrap().latest.insert(network, block);
        Ok(())
    }
}

#[async_trait]
impl PaymentHistoryRepository for MemoryRepository {
    async fn exists(
        &self,
        order_id: i64,
        transaction_hash: &str,
        log_index: i64,
    ) -> Result<bool, sqlx::Error> {
        Ok(self.state.lock().unwrap().histories.iter().any(|h| {
            h.payment_order_id == order_id
                && h.transaction_hash == transaction_hash
                && h.log_index == log_index
        }))
    }

    async fn record(&self, event: PaymentEventHistoryInsert) -> Result<bool, sqlx::Error> {
        let mut state = self.state.lock().unwrap();
        let duplicate = state.histories.iter().any(|h| {
            h.payment_order_id == event.payment_order_id
                && h.transaction_hash == event.transaction_hash
                && h.log_index == event.log_index
        });
        if duplicate {
            return Ok(false);
        }
        state.histories.push(event);
        Ok(true)
    }
}

#[async_trait]
impl PaymentStatisticsRepository for MemoryRepository {
    async fn increment(
        &self,
        network: Network,
        symbol: CompactString,
        vendor_id: String,
        amount: Decimal,
        completed_order: bool,
    ) -> Result<(), sqlx::Error> {
        self.state
            .lock()
            .unwrap()
            .statistics
            .push((network, symbol, vendor_id, amount, completed_order));
        Ok(())
    }
}

#[async_trait]
impl WalletRepository for MemoryRepository {
    async fn credit_balance(
        &self,
        wallet_id: i64,
        network: Network,
        symbol: CompactString,
        amount: Decimal,
    ) -> Result<(), sqlx::Error> {
        let mut state = self.state.lock().unwrap();
        *state
            .balances
            .entry((wallet_id, network, symbol))
            .or_insert(Decimal::ZERO) += amount;
        Ok(())
    }

    async fn debit_balance(
        &self,
        wallet_id: i64,
        network: Network,
        symbol: CompactString,
        amount: Decimal,
    ) -> Result<(), sqlx::Error> {
        let mut state = self.state.lock().unwrap();
        if let Some(balance) = state.balances.get_mut(&(wallet_id, network, symbol)) {
            *balance = (*balance - amount).max(Decimal::ZERO);
        }
        Ok(())
    }

    async fn get_wallets_with_balance(
        &self,
        network: Network,
        symbol: CompactString,
    ) -> Result<Vec<WalletBalance>, sqlx::Error> {
        let state = self.state.lock().unwrap();
        let mut wallets: Vec<WalletBalance> = state
            .balances
            .iter()
            .filter(|((_, n, s), balance)| *n == network && *s == symbol && !balance.is_zero())
            .map(|((wallet_id, n, s), balance)| WalletBalance {
                wallet_id: *wallet_id,
                address: state
                    .wallet_addresses
                    .get(wallet_id)
                    .cloned()
                    .unwrap_or_default(),
                network: (*n).into(),
                symbol: s.clone(),
                balance: *balance,
            })
            .collect();
        wallets.sort_by_key(|w| w.wallet_id);
        Ok(wallets)
    }

    async fn list_wallets(&self) -> Result<Vec<PaymentWallet>, sqlx::Error> {
        let state = self.state.lock().unwrap();
        let mut wallets: Vec<PaymentWallet> = state
            .wallet_addresses
            .iter()
            .map(|(id, address)| PaymentWallet {
                id: *id,
                address: address.clone(),
            })
            .collect();
        wallets.sort_by_key(|w| w.id);
        Ok(wallets)
    }

    async fn set_balances(
        &self,
        network: Network,
        symbol: CompactString,
        balances: Vec<(i64, Decimal)>,
    ) -> Result<u64, sqlx::Error> {
        let mut state = self.state.lock().unwrap();
        let count = balances.len() as u64;
        for (wallet_id, balance) in balances {
            state
                .balances
                .insert((wallet_id, network, symbol.clone()), balance);
        }
        Ok(count)
    }
}

#[async_trait]
impl TransferHistoryRepository for MemoryRepository {
    async fn record_many(&self, records: Vec<TokenTransferHistoryInsert>) -> Result<u64, sqlx::Error> {
        let count = records.len() as u64;
        self.state.lock().unwrap().transfers.extend(records);
        Ok(count)
    }
}
