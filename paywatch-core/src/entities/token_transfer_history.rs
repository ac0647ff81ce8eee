use crate::entities::{NetworkType, TransferType, utc_now};
use crate::framework::DatabaseProcessor;
use compact_str::CompactString;
use kanau::processor::Processor;
use paywatch_sdk::objects::Network;
use rust_decimal::Decimal;

/// One leg of an outgoing transfer sent by the sweep worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenTransferHistoryInsert {
    pub network: Network,
    pub transaction_hash: String,
    pub from_address: String,
    pub to_address: String,
    pub symbol: CompactString,
    /// Human-readable token amount.
    pub token_amount: Decimal,
    /// Fee paid in native token, human-readable.
    pub fee: Decimal,
    pub status: bool,
    pub error_message: Option<String>,
    pub transfer_type: TransferType,
}

#[derive(Debug, Clone)]
/// Insert multiple transfer legs in a single query.
pub struct InsertManyTokenTransferHistories {
    pub records: Vec<TokenTransferHistoryInsert>,
}

impl Processor<InsertManyTokenTransferHistories> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:InsertManyTokenTransferHistories")]
    async fn process(&self, insert: InsertManyTokenTransferHistories) -> Result<u64, sqlx::Error> {
        if insert.records.is_empty() {
            return Ok(0);
        }
        let now = utc_now();

        let mut query_builder = sqlx::QueryBuilder::new(
            "INSERT INTO token_transfer_histories \
            (network, transaction_hash, from_address, to_address, symbol, token_amount, fee, \
             status, error_message, transfer_type, created_at) ",
        );

        query_builder.push_values(insert.records, |mut b, record| {
            b.push_bind(NetworkType::from(record.network))
                .push_bind(record.transaction_hash)
                .push_bind(record.from_address)
                .push_bind(record.to_address)
                .push_bind(record.symbol)
                .push_bind(record.token_amount)
                .push_bind(record.fee)
                .push_bind(record.status)
                .push_bind(record.error_message)
                .push_bind(record.transfer_type)
                .push_bind(now);
        });

        let result = query_builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
