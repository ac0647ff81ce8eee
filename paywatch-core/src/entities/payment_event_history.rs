use crate::entities::{NetworkType, utc_now};
use crate::framework::DatabaseProcessor;
use compact_str::CompactString;
use kanau::processor::Processor;
use paywatch_sdk::objects::Network;
use rust_decimal::Decimal;

/// Audit trail row written for every accounting-relevant transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentEventHistoryInsert {
    pub payment_order_id: i64,
    pub transaction_hash: String,
    pub log_index: i64,
    pub from_address: String,
    pub to_address: String,
    pub contract_address: String,
    pub token_symbol: CompactString,
    /// Human-readable token amount.
    pub amount: Decimal,
    pub network: Network,
}

#[derive(Debug, Clone)]
/// Whether a log has already been credited to an order.
pub struct PaymentEventExists {
    pub payment_order_id: i64,
    pub transaction_hash: String,
    pub log_index: i64,
}

impl Processor<PaymentEventExists> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:PaymentEventExists")]
    async fn process(&self, query: PaymentEventExists) -> Result<bool, sqlx::Error> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM payment_event_histories
                WHERE payment_order_id = $1 AND transaction_hash = $2 AND log_index = $3
            )
            "#,
        )
        .bind(query.payment_order_id)
        .bind(query.transaction_hash)
        .bind(query.log_index)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}

#[derive(Debug, Clone)]
/// Append a history row. Re-delivered logs are ignored.
///
/// Returns `false` when the row already existed.
pub struct InsertPaymentEventHistory {
    pub event: PaymentEventHistoryInsert,
}

impl Processor<InsertPaymentEventHistory> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:InsertPaymentEventHistory")]
    async fn process(&self, insert: InsertPaymentEventHistory) -> Result<bool, sqlx::Error> {
        let event = insert.event;
        let result = sqlx::query(
            r#"
            INSERT INTO payment_event_histories
                (payment_order_id, transaction_hash, log_index, from_address, to_address,
                 contract_address, token_symbol, amount, network, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (payment_order_id, transaction_hash, log_index) DO NOTHING
            "#,
        )
        .bind(event.payment_order_id)
        .bind(event.transaction_hash)
        .bind(event.log_index)
        .bind(event.from_address)
        .bind(event.to_address)
        .bind(event.contract_address)
        .bind(event.token_symbol)
        .bind(event.amount)
        .bind(NetworkType::from(event.network))
        .bind(utc_now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
