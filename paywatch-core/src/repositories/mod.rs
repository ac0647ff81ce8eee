//! Persistence seams used by the processors.
//!
//! Each trait is implemented on [`DatabaseProcessor`](crate::framework::DatabaseProcessor)
//! by delegating to the query structs in [`crate::entities`]. Processors only hold
//! `Arc<dyn Trait>` handles so tests can swap in the in-memory implementation.

mod postgres;
#[cfg(test)]
pub(crate) mod memory;

use crate::entities::payment_event_history::PaymentEventHistoryInsert;
use crate::entities::payment_order::{OrderUpdate, PaymentOrder};
use crate::entities::payment_wallet::{PaymentWallet, WalletBalance};
use crate::entities::token_transfer_history::TokenTransferHistoryInsert;
use crate::framework::DatabaseProcessor;
use async_trait::async_trait;
use compact_str::CompactString;
use paywatch_sdk::objects::Network;
use rust_decimal::Decimal;
use std::sync::Arc;
use time::PrimitiveDateTime;

#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Page of orders that may still receive payments, oldest deadline first.
    async fn get_active_orders(
        &self,
        network: Network,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<PaymentOrder>, sqlx::Error>;

    async fn get_by_id(&self, id: i64) -> Result<Option<PaymentOrder>, sqlx::Error>;

    /// Returns `false` if the order is missing or the update may not leave
    /// its current status.
    async fn update(&self, id: i64, update: OrderUpdate) -> Result<bool, sqlx::Error>;

    /// Returns the number of rows that changed.
    async fn batch_update_to_expired(&self, ids: &[i64]) -> Result<u64, sqlx::Error>;

    /// `(order_id, block_height)` pairs; heights only move forward.
    async fn batch_update_block_heights(&self, heights: &[(i64, i64)]) -> Result<u64, sqlx::Error>;

    /// Orders past their deadline, unsettled, with a deadline after `cutoff`.
    async fn get_expired_unsettled(
        &self,
        network: Network,
        cutoff: PrimitiveDateTime,
    ) -> Result<Vec<PaymentOrder>, sqlx::Error>;

    /// Untouched Pending orders whose deadline is before `cutoff`.
    async fn get_stale_pending(
        &self,
        network: Network,
        cutoff: PrimitiveDateTime,
    ) -> Result<Vec<PaymentOrder>, sqlx::Error>;

    /// Move Pending orders to Failed, returning the ids that changed.
    async fn fail_stale_pending(&self, ids: &[i64]) -> Result<Vec<i64>, sqlx::Error>;

    async fn release_expired_wallets(
        &self,
        network: Network,
        cutoff: PrimitiveDateTime,
    ) -> Result<u64, sqlx::Error>;
}

#[async_trait]
pub trait BlockStateRepository: Send + Sync {
    async fn get_last_processed_block(&self, network: Network) -> Result<Option<u64>, sqlx::Error>;
    async fn update_last_processed_block(&self, network: Network, block: u64) -> Result<(), sqlx::Error>;
    async fn get_latest_block(&self, network: Network) -> Result<Option<u64>, sqlx::Error>;
    async fn update_latest_block(&self, network: Network, block: u64) -> Result<(), sqlx::Error>;
}

#[async_trait]
pub trait PaymentHistoryRepository: Send + Sync {
    async fn exists(
        &self,
        order_id: i64,
        transaction_hash: &str,
        log_index: i64,
    ) -> Result<bool, sqlx::Error>;

    /// Returns `false` if the same log was already recorded for the order.
    async fn record(&self, event: PaymentEventHistoryInsert) -> Result<bool, sqlx::Error>;
}

#[async_trait]
pub trait PaymentStatisticsRepository: Send + Sync {
    async fn increment(
        &self,
        network: Network,
        symbol: CompactString,
        vendor_id: String,
        amount: Decimal,
        completed_order: bool,
    ) -> Result<(), sqlx::Error>;
}

#[async_trait]
pub trait WalletRepository: Send + Sync {
    async fn credit_balance(
        &self,
        wallet_id: i64,
        network: Network,
        symbol: CompactString,
        amount: Decimal,
    ) -> Result<(), sqlx::Error>;

    async fn debit_balance(
        &self,
        wallet_id: i64,
        network: Network,
        symbol: CompactString,
        amount: Decimal,
    ) -> Result<(), sqlx::Error>;

    async fn get_wallets_with_balance(
        &self,
        network: Network,
        symbol: CompactString,
    ) -> Result<Vec<WalletBalance>, sqlx::Error>;

    async fn list_wallets(&self) -> Result<Vec<PaymentWallet>, sqlx::Error>;

    /// Replace the tracked balance of each `(wallet_id, balance)` pair.
    async fn set_balances(
        &self,
        network: Network,
        symbol: CompactString,
        balances: Vec<(i64, Decimal)>,
    ) -> Result<u64, sqlx::Error>;
}

#[async_trait]
pub trait TransferHistoryRepository: Send + Sync {
    async fn record_many(&self, records: Vec<TokenTransferHistoryInsert>) -> Result<u64, sqlx::Error>;
}

/// Shared repository handles injected into every processor.
#[derive(Clone)]
pub struct Repositories {
    pub orders: Arc<dyn OrderRepository>,
    pub block_states: Arc<dyn BlockStateRepository>,
    pub histories: Arc<dyn PaymentHistoryRepository>,
    pub statistics: Arc<dyn PaymentStatisticsRepository>,
    pub wallets: Arc<dyn WalletRepository>,
    pub transfers: Arc<dyn TransferHistoryRepository>,
}

impl Repositories {
    /// All repositories backed by one Postgres pool.
    pub fn postgres(db: DatabaseProcessor) -> Self {
        let db = Arc::new(db);
        Self {
            orders: db.clone(),
            block_states: db.clone(),
            histories: db.clone(),
            statistics: db.clone(),
            wallets: db.clone(),
            transfers: db,
        }
    }
}
