use crate::entities::{NetworkType, utc_now};
use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;
use paywatch_sdk::objects::Network;

/// Per-network block cursor.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct BlockState {
    pub network: NetworkType,
    /// Last block fully handled by the confirmed track.
    pub last_processed_block: i64,
    /// Chain head as last observed by the latest-block refresher.
    pub latest_block: i64,
    pub updated_at: time::PrimitiveDateTime,
}

#[derive(Debug, Clone)]
pub struct GetBlockState {
    pub network: Network,
}

impl Processor<GetBlockState> for DatabaseProcessor {
    type Output = Option<BlockState>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetBlockState")]
    async fn process(&self, query: GetBlockState) -> Result<Option<BlockState>, sqlx::Error> {
        sqlx::query_as::<_, BlockState>(
            r#"
            SELECT network, last_processed_block, latest_block, updated_at
            FROM block_states
            WHERE network = $1
            "#,
        )
        .bind(NetworkType::from(query.network))
        .fetch_optional(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Persist the confirmed-track cursor. The stored value never moves backwards.
pub struct UpsertLastProcessedBlock {
    pub network: Network,
    pub block: i64,
}

impl Processor<UpsertLastProcessedBlock> for DatabaseProcessor {
    type Output = ();
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:UpsertLastProcessedBlock")]
    async fn process(&self, query: UpsertLastProcessedBlock) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO block_states (network, last_processed_block, latest_block, updated_at)
            VALUES ($1, $2, 0, $3)
            ON CONFLICT (network) DO UPDATE SET
                last_processed_block = GREATEST(block_states.last_processed_block, EXCLUDED.last_processed_block),
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(NetworkType::from(query.network))
        .bind(query.block)
        .bind(utc_now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct UpsertLatestBlock {
    pub network: Network,
    pub block: i64,
}

impl Processor<UpsertLatestBlock> for DatabaseProcessor {
    type Output = ();
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:UpsertLatestBlock")]
    async fn process(&self, query: UpsertLatestBlock) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO block_states (network, last_processed_block, latest_block, updated_at)
            VALUES ($1, 0, $2, $3)
            ON CONFLICT (network) DO UPDATE SET
                latest_block = EXCLUDED.latest_block,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(NetworkType::from(query.network))
        .bind(query.block)
        .bind(utc_now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
