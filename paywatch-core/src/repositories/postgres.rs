use super::{
    BlockStateRepository, OrderRepository, PaymentHistoryRepository, PaymentStatisticsRepository,
    TransferHistoryRepository, WalletRepository,
};
use crate::entities::block_state::{GetBlockState, UpsertLastProcessedBlock, UpsertLatestBlock};
use crate::entities::payment_event_history::{
    InsertPaymentEventHistory, PaymentEventExists, PaymentEventHistoryInsert,
};
use crate::entities::payment_order::{
    BatchUpdateBlockHeights, BatchUpdateOrdersToExpired, FailStalePendingOrders, GetActiveOrders,
    GetExpiredUnsettledOrders, GetOrderById, GetStalePendingOrders, OrderUpdate, PaymentOrder,
    ReleaseExpiredOrderWallets, UpdateOrder,
};
use crate::entities::payment_statistics::IncrementPaymentStatistics;
use crate::entities::payment_wallet::{
    CreditWalletBalance, DebitWalletBalance, GetWalletsWithBalance, ListPaymentWallets,
    PaymentWallet, SetWalletBalances, WalletBalance,
};
use crate::entities::token_transfer_history::{
    InsertManyTokenTransferHistories, TokenTransferHistoryInsert,
};
use crate::framework::DatabaseProcessor;
use async_trait::async_trait;
use compact_str::CompactString;
use kanau::processor::Processor;
use paywatch_sdk::objects::Network;
use rust_decimal::Decimal;
use time::PrimitiveDateTime;

fn block_to_i64(block: u64) -> Result<i64, sqlx::Error> {
    i64::try_from(block).map_err(|e| sqlx::Error::Encode(Box::new(e)))
}

#[async_trait]
impl OrderRepository for DatabaseProcessor {
    async fn get_active_orders(
        &self,
        network: Network,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<PaymentOrder>, sqlx::Error> {
        self.process(GetActiveOrders {
            network,
            limit,
            offset,
        })
        .await
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<PaymentOrder>, sqlx::Error> {
        self.process(GetOrderById { id }).await
    }

    async fn update(&self, id: i64, update: OrderUpdate) -> Result<bool, sqlx::Error> {
        self.process(UpdateOrder { id, update }).await
    }

    async fn batch_update_to_expired(&self, ids: &[i64]) -> Result<u64, sqlx::Error> {
        self.process(BatchUpdateOrdersToExpired { ids: ids.to_vec() })
            .await
    }

    async fn batch_update_block_heights(&self, heights: &[(i64, i64)]) -> Result<u64, sqlx::Error> {
        self.process(BatchUpdateBlockHeights {
            heights: heights.to_vec(),
        })
        .await
    }

    async fn get_expired_unsettled(
        &self,
        network: Network,
        cutoff: PrimitiveDateTime,
    ) -> Result<Vec<PaymentOrder>, sqlx::Error> {
        self.process(GetExpiredUnsettledOrders { network, cutoff })
            .await
    }

    async fn get_stale_pending(
        &self,
        network: Network,
        cutoff: PrimitiveDateTime,
    ) -> Result<Vec<PaymentOrder>, sqlx::Error> {
        self.process(GetStalePendingOrders { network, cutoff }).await
    }

    async fn fail_stale_pending(&self, ids: &[i64]) -> Result<Vec<i64>, sqlx::Error> {
        self.process(FailStalePendingOrders { ids: ids.to_vec() })
            .await
    }

    async fn release_expired_wallets(
        &self,
        network: Network,
        cutoff: PrimitiveDateTime,
    ) -> Result<u64, sqlx::Error> {
        self.process(ReleaseExpiredOrderWallets { network, cutoff })
            .await
    }
}

#[async_trait]
impl BlockStateRepository for DatabaseProcessor {
    async fn get_last_processed_block(&self, network: Network) -> Result<Option<u64>, sqlx::Error> {
        let state = self.process(GetBlockState { network }).await?;
        Ok(state
            .map(|s| s.last_processed_block)
            .filter(|b| *b > 0)
            .map(|b| b as u64))
    }

    async fn update_last_processed_block(&self, network: Network, block: u64) -> Result<(), sqlx::Error> {
        self.process(UpsertLastProcessedBlock {
            network,
            block: block_to_i64(block)?,
        })
        .await
    }

    async fn get_latest_block(&self, network: Network) -> Result<Option<u64>, sqlx::Error> {
        let state = self.process(GetBlockState { network }).await?;
        Ok(state
            .map(|s| s.latest_block)
            .filter(|b| *b > 0)
            .map(|b| b as u64))
    }

    async fn update_latest_block(&self, network: Network, block: u64) -> Result<(), sqlx::Error> {
        self.process(UpsertLatestBlock {
            network,
            block: block_to_i64(block)?,
        })
        .await
    }
}

#[async_trait]
impl PaymentHistoryRepository for DatabaseProcessor {
    async fn exists(
        &self,
        order_id: i64,
        transaction_hash: &str,
        log_index: i64,
    ) -> Result<bool, sqlx::Error> {
        self.process(PaymentEventExists {
            payment_order_id: order_id,
            transaction_hash: transaction_hash.to_string(),
            log_index,
        })
        .await
    }

    async fn record(&self, event: PaymentEventHistoryInsert) -> Result<bool, sqlx::Error> {
        self.process(InsertPaymentEventHistory { event }).await
    }
}

#[async_trait]
impl PaymentStatisticsRepository for DatabaseProcessor {
    async fn increment(
        &self,
        network: Network,
        symbol: CompactString,
        vendor_id: String,
        amount: Decimal,
        completed_order: bool,
    ) -> Result<(), sqlx::Error> {
        self.process(IncrementPaymentStatistics {
            network,
            symbol,
            vendor_id,
            amount,
            orders: i64::from(completed_order),
        })
        .await
    }
}

#[async_trait]
impl WalletRepository for DatabaseProcessor {
    async fn credit_balance(
        &self,
        wallet_id: i64,
        network: Network,
        symbol: CompactString,
        amount: Decimal,
    ) -> Result<(), sqlx::Error> {
        self.process(CreditWalletBalance {
            wallet_id,
            network,
            symbol,
            amount,
        })
        .await
    }

    async fn debit_balance(
        &self,
        wallet_id: i64,
        network: Network,
        symbol: CompactString,
        amount: Decimal,
    ) -> Result<(), sqlx::Error> {
        self.process(DebitWalletBalance {
            wallet_id,
            network,
            symbol,
            amount,
        })
        .await
    }

    async fn get_wallets_with_balance(
        &self,
        network: Network,
        symbol: CompactString,
    ) -> Result<Vec<WalletBalance>, sqlx::Error> {
        self.process(GetWalletsWithBalance { network, symbol })
            .await
    }

    async fn list_wallets(&self) -> Result<Vec<PaymentWallet>, sqlx::Error> {
        self.process(ListPaymentWallets).await
    }

    async fn set_balances(
        &self,
        network: Network,
        symbol: CompactString,
        balances: Vec<(i64, Decimal)>,
    ) -> Result<u64, sqlx::Error> {
        self.process(SetWalletBalances {
            network,
            symbol,
            balances,
        })
        .await
    }
}

#[async_trait]
impl TransferHistoryRepository for DatabaseProcessor {
    async fn record_many(&self, records: Vec<TokenTransferHistoryInsert>) -> Result<u64, sqlx::Error> {
        self.process(InsertManyTokenTransferHistories { records })
            .await
    }
}
