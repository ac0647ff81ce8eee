use crate::entities::{NetworkType, utc_now};
use crate::framework::DatabaseProcessor;
use compact_str::CompactString;
use kanau::processor::Processor;
use paywatch_sdk::objects::Network;
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
/// Add to the daily (network, symbol, vendor) statistics bucket.
///
/// `orders` is 1 when the credit completed an order and 0 otherwise.
pub struct IncrementPaymentStatistics {
    pub network: Network,
    pub symbol: CompactString,
    pub vendor_id: String,
    pub amount: Decimal,
    pub orders: i64,
}

impl Processor<IncrementPaymentStatistics> for DatabaseProcessor {
    type Output = ();
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:IncrementPaymentStatistics")]
    async fn process(&self, query: IncrementPaymentStatistics) -> Result<(), sqlx::Error> {
        let now = utc_now();
        sqlx::query(
            r#"
            INSERT INTO payment_statistics
                (period_start, network, symbol, vendor_id, total_orders, total_transferred, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (period_start, network, symbol, vendor_id) DO UPDATE SET
                total_orders = payment_statistics.total_orders + EXCLUDED.total_orders,
                total_transferred = payment_statistics.total_transferred + EXCLUDED.total_transferred,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(now.date())
        .bind(NetworkType::from(query.network))
        .bind(query.symbol)
        .bind(query.vendor_id)
        .bind(query.orders)
        .bind(query.amount)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
