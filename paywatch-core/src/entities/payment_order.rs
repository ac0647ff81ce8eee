use crate::entities::{NetworkType, OrderStatus, utc_now};
use crate::framework::DatabaseProcessor;
use compact_str::CompactString;
use kanau::processor::Processor;
use paywatch_sdk::objects::{Network, OrderWebhookPayload};
use rust_decimal::Decimal;
use time::PrimitiveDateTime;

/// A payment order joined with the address of its deposit wallet.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct PaymentOrder {
    pub id: i64,
    pub request_id: String,
    pub vendor_id: String,
    pub wallet_id: i64,
    pub wallet_address: String,
    pub network: NetworkType,
    pub symbol: CompactString,
    pub amount: Decimal,
    pub transferred: Decimal,
    pub status: OrderStatus,
    /// Last block at which `transferred` was updated.
    pub block_height: i64,
    /// Block of the newest tentative (unconfirmed) observation.
    pub upcoming_block_height: i64,
    pub webhook_url: String,
    pub expired_time: PrimitiveDateTime,
    pub succeeded_at: Option<PrimitiveDateTime>,
    pub created_at: PrimitiveDateTime,
}

/// Build the active-order index key for a deposit address and token symbol.
///
/// Addresses are compared case-insensitively, symbols are upper-cased.
pub fn order_key(wallet_address: &str, symbol: &str) -> String {
    format!(
        "{}_{}",
        wallet_address.to_ascii_lowercase(),
        symbol.to_ascii_uppercase()
    )
}

impl PaymentOrder {
    pub fn key(&self) -> String {
        order_key(&self.wallet_address, &self.symbol)
    }

    pub fn network(&self) -> Network {
        self.network.into()
    }

    pub fn is_expired_at(&self, now: PrimitiveDateTime) -> bool {
        self.expired_time <= now
    }

    pub fn webhook_payload(&self) -> OrderWebhookPayload {
        OrderWebhookPayload {
            id: self.id,
            request_id: self.request_id.clone(),
            network: self.network.into(),
            amount: self.amount.normalize().to_string(),
            transferred: self.transferred.normalize().to_string(),
            status: self.status.into(),
            webhook_url: self.webhook_url.clone(),
            symbol: self.symbol.clone(),
            block_height: self.block_height,
            upcoming_block_height: self.upcoming_block_height,
            payment_address: self.wallet_address.clone(),
            succeeded_at: self
                .succeeded_at
                .map(|t| t.assume_utc().unix_timestamp()),
            created_at: self.created_at.assume_utc().unix_timestamp(),
            expired: self.expired_time.assume_utc().unix_timestamp(),
        }
    }
}

const SELECT_ORDER: &str = r#"
    SELECT
        o.id, o.request_id, o.vendor_id, o.wallet_id, w.address AS wallet_address,
        o.network, o.symbol, o.amount, o.transferred, o.status,
        o.block_height, o.upcoming_block_height, o.webhook_url,
        o.expired_time, o.succeeded_at, o.created_at
    FROM payment_orders o
    JOIN payment_wallets w ON w.id = o.wallet_id
"#;

#[derive(Debug, Clone)]
/// Page through orders that can still receive payments on a network.
///
/// Pending and Partial orders qualify until their deadline; Processing
/// orders qualify regardless, since a tentative payment is in flight.
pub struct GetActiveOrders {
    pub network: Network,
    pub limit: i64,
    pub offset: i64,
}

impl Processor<GetActiveOrders> for DatabaseProcessor {
    type Output = Vec<PaymentOrder>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetActiveOrders")]
    async fn process(&self, query: GetActiveOrders) -> Result<Vec<PaymentOrder>, sqlx::Error> {
        let sql = format!(
            "{SELECT_ORDER} WHERE o.network = $1 \
             AND ((o.status IN ('PENDING', 'PARTIAL') AND o.expired_time > $2) OR o.status = 'PROCESSING') \
             ORDER BY o.expired_time ASC, o.id ASC LIMIT $3 OFFSET $4"
        );
        sqlx::query_as::<_, PaymentOrder>(&sql)
            .bind(NetworkType::from(query.network))
            .bind(utc_now())
            .bind(query.limit)
            .bind(query.offset)
            .fetch_all(&self.pool)
            .await
    }
}

#[derive(Debug, Clone)]
pub struct GetOrderById {
    pub id: i64,
}

impl Processor<GetOrderById> for DatabaseProcessor {
    type Output = Option<PaymentOrder>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetOrderById")]
    async fn process(&self, query: GetOrderById) -> Result<Option<PaymentOrder>, sqlx::Error> {
        let sql = format!("{SELECT_ORDER} WHERE o.id = $1");
        sqlx::query_as::<_, PaymentOrder>(&sql)
            .bind(query.id)
            .fetch_optional(&self.pool)
            .await
    }
}

/// Partial update of a payment order. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderUpdate {
    pub block_height: Option<i64>,
    pub upcoming_block_height: Option<i64>,
    pub status: Option<OrderStatus>,
    pub transferred: Option<Decimal>,
    /// Only applied while the order is still Pending.
    pub network: Option<Network>,
    /// Allow an Expired order to settle. Only the catch-up worker sets this.
    pub recover_expired: bool,
}

impl OrderUpdate {
    /// Whether this update may be applied to an order currently in `current`.
    ///
    /// Terminal orders never change status, except that a recovering update
    /// may move Expired to Success or keep it Expired while crediting it.
    /// Must stay in line with the `WHERE` clause of [`UpdateOrder`].
    pub fn applies_to(&self, current: OrderStatus) -> bool {
        match self.status {
            None => true,
            Some(_) if !current.is_terminal() => true,
            Some(target) => {
                self.recover_expired
                    && current == OrderStatus::Expired
                    && matches!(target, OrderStatus::Success | OrderStatus::Expired)
            }
        }
    }
}

#[derive(Debug, Clone)]
/// Apply an [`OrderUpdate`] to one order.
///
/// Reaching Success stamps `succeeded_at` and releases the deposit wallet
/// in the same transaction. Yields `false` when the order does not exist or
/// is in a state the update may not leave (see [`OrderUpdate::applies_to`]).
pub struct UpdateOrder {
    pub id: i64,
    pub update: OrderUpdate,
}

impl Processor<UpdateOrder> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:UpdateOrder")]
    async fn process(&self, query: UpdateOrder) -> Result<bool, sqlx::Error> {
        let UpdateOrder { id, update } = query;
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE payment_orders SET
                block_height = COALESCE($2, block_height),
                upcoming_block_height = COALESCE($3, upcoming_block_height),
                status = COALESCE($4, status),
                transferred = GREATEST(transferred, COALESCE($5, transferred)),
                network = CASE WHEN status = 'PENDING' THEN COALESCE($6, network) ELSE network END,
                succeeded_at = CASE WHEN $4 = 'SUCCESS'::payment_order_status THEN $7 ELSE succeeded_at END,
                updated_at = $7
            WHERE id = $1
              AND (
                $4::payment_order_status IS NULL
                OR status NOT IN ('SUCCESS', 'EXPIRED', 'FAILED')
                OR ($8 AND status = 'EXPIRED' AND $4 IN ('SUCCESS', 'EXPIRED'))
              )
            "#,
        )
        .bind(id)
        .bind(update.block_height)
        .bind(update.upcoming_block_height)
        .bind(update.status)
        .bind(update.transferred)
        .bind(update.network.map(NetworkType::from))
        .bind(utc_now())
        .bind(update.recover_expired)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        if update.status == Some(OrderStatus::Success) {
            sqlx::query(
                r#"
                UPDATE payment_wallets SET in_use = FALSE
                WHERE id = (SELECT wallet_id FROM payment_orders WHERE id = $1)
                "#,
            )
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }
}

#[derive(Debug, Clone)]
/// Mark orders Expired in one statement. Settled or failed orders are left alone.
pub struct BatchUpdateOrdersToExpired {
    pub ids: Vec<i64>,
}

impl Processor<BatchUpdateOrdersToExpired> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:BatchUpdateOrdersToExpired")]
    async fn process(&self, query: BatchUpdateOrdersToExpired) -> Result<u64, sqlx::Error> {
        if query.ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"
            UPDATE payment_orders SET status = 'EXPIRED', updated_at = $2
            WHERE id = ANY($1::bigint[]) AND status NOT IN ('SUCCESS', 'FAILED')
            "#,
        )
        .bind(&query.ids)
        .bind(utc_now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Clone)]
/// Advance `block_height` for many orders. Heights never move backwards.
pub struct BatchUpdateBlockHeights {
    /// `(order_id, block_height)` pairs.
    pub heights: Vec<(i64, i64)>,
}

impl Processor<BatchUpdateBlockHeights> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:BatchUpdateBlockHeights")]
    async fn process(&self, query: BatchUpdateBlockHeights) -> Result<u64, sqlx::Error> {
        if query.heights.is_empty() {
            return Ok(0);
        }
        let (ids, heights): (Vec<i64>, Vec<i64>) = query.heights.into_iter().unzip();
        let result = sqlx::query(
            r#"
            UPDATE payment_orders AS o
            SET block_height = u.block_height
            FROM UNNEST($1::bigint[], $2::bigint[]) AS u(id, block_height)
            WHERE o.id = u.id AND o.block_height < u.block_height
            "#,
        )
        .bind(&ids)
        .bind(&heights)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Clone)]
/// Orders past their deadline but not settled, within the catch-up cutoff window.
///
/// Sorted by `block_height` so the first row anchors the re-scan window.
pub struct GetExpiredUnsettledOrders {
    pub network: Network,
    pub cutoff: PrimitiveDateTime,
}

impl Processor<GetExpiredUnsettledOrders> for DatabaseProcessor {
    type Output = Vec<PaymentOrder>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetExpiredUnsettledOrders")]
    async fn process(
        &self,
        query: GetExpiredUnsettledOrders,
    ) -> Result<Vec<PaymentOrder>, sqlx::Error> {
        let sql = format!(
            "{SELECT_ORDER} WHERE o.network = $1 \
             AND o.status NOT IN ('SUCCESS', 'FAILED') \
             AND o.expired_time <= $2 AND o.expired_time > $3 \
             ORDER BY o.block_height ASC"
        );
        sqlx::query_as::<_, PaymentOrder>(&sql)
            .bind(NetworkType::from(query.network))
            .bind(utc_now())
            .bind(query.cutoff)
            .fetch_all(&self.pool)
            .await
    }
}

#[derive(Debug, Clone)]
/// Pending orders whose deadline passed before `cutoff` without any payment.
pub struct GetStalePendingOrders {
    pub network: Network,
    pub cutoff: PrimitiveDateTime,
}

impl Processor<GetStalePendingOrders> for DatabaseProcessor {
    type Output = Vec<PaymentOrder>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetStalePendingOrders")]
    async fn process(&self, query: GetStalePendingOrders) -> Result<Vec<PaymentOrder>, sqlx::Error> {
        let sql = format!(
            "{SELECT_ORDER} WHERE o.network = $1 AND o.status = 'PENDING' \
             AND o.transferred = 0 AND o.expired_time <= $2 ORDER BY o.id ASC"
        );
        sqlx::query_as::<_, PaymentOrder>(&sql)
            .bind(NetworkType::from(query.network))
            .bind(query.cutoff)
            .fetch_all(&self.pool)
            .await
    }
}

#[derive(Debug, Clone)]
/// Move the given Pending orders to Failed and release their wallets.
///
/// Returns the ids that actually changed.
pub struct FailStalePendingOrders {
    pub ids: Vec<i64>,
}

impl Processor<FailStalePendingOrders> for DatabaseProcessor {
    type Output = Vec<i64>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:FailStalePendingOrders")]
    async fn process(&self, query: FailStalePendingOrders) -> Result<Vec<i64>, sqlx::Error> {
        if query.ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut tx = self.pool.begin().await?;
        let failed: Vec<(i64, i64)> = sqlx::query_as(
            r#"
            UPDATE payment_orders SET status = 'FAILED', updated_at = $2
            WHERE id = ANY($1::bigint[]) AND status = 'PENDING'
            RETURNING id, wallet_id
            "#,
        )
        .bind(&query.ids)
        .bind(utc_now())
        .fetch_all(&mut *tx)
        .await?;

        let wallet_ids: Vec<i64> = failed.iter().map(|(_, wallet_id)| *wallet_id).collect();
        sqlx::query("UPDATE payment_wallets SET in_use = FALSE WHERE id = ANY($1::bigint[])")
            .bind(&wallet_ids)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(failed.into_iter().map(|(id, _)| id).collect())
    }
}

#[derive(Debug, Clone)]
/// Release wallets still held by Expired orders whose deadline is before `cutoff`.
pub struct ReleaseExpiredOrderWallets {
    pub network: Network,
    pub cutoff: PrimitiveDateTime,
}

impl Processor<ReleaseExpiredOrderWallets> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ReleaseExpiredOrderWallets")]
    async fn process(&self, query: ReleaseExpiredOrderWallets) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE payment_wallets AS w SET in_use = FALSE
            FROM payment_orders AS o
            WHERE o.wallet_id = w.id AND w.in_use
              AND o.network = $1 AND o.status = 'EXPIRED' AND o.expired_time <= $2
            "#,
        )
        .bind(NetworkType::from(query.network))
        .bind(query.cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use time::Duration;

    /// A Pending BSC USDT order for 50 tokens that expires in 15 minutes.
    pub fn order(id: i64, wallet_address: &str) -> PaymentOrder {
        let now = utc_now();
        PaymentOrder {
            id,
            request_id: format!("req-{id}"),
            vendor_id: "vendor-1".to_string(),
            wallet_id: id,
            wallet_address: wallet_address.to_string(),
            network: NetworkType::Bsc,
            symbol: CompactString::const_new("USDT"),
            amount: Decimal::from(50),
            transferred: Decimal::ZERO,
            status: OrderStatus::Pending,
            block_height: 0,
            upcoming_block_height: 0,
            webhook_url: "https://merchant.example/hook".to_string(),
            expired_time: now + Duration::minutes(15),
            succeeded_at: None,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_key_normalises_case() {
        assert_eq!(order_key("0xAbC", "usdt"), "0xabc_USDT");
        let order = fixtures::order(1, "0xDEADbeef");
        assert_eq!(order.key(), "0xdeadbeef_USDT");
    }

    #[test]
    fn test_webhook_payload_uses_decimal_strings() {
        let mut order = fixtures::order(3, "0xabc");
        order.transferred = Decimal::new(49_500_000, 6);
        order.status = OrderStatus::Partial;
        let payload = order.webhook_payload();
        assert_eq!(payload.amount, "50");
        assert_eq!(payload.transferred, "49.5");
        assert_eq!(payload.status, paywatch_sdk::objects::OrderStatus::Partial);
        assert_eq!(payload.payment_address, "0xabc");
    }

    #[test]
    fn test_updates_never_leave_terminal_states() {
        let to = |status| OrderUpdate {
            status: Some(status),
            ..Default::default()
        };
        for terminal in [OrderStatus::Success, OrderStatus::Expired, OrderStatus::Failed] {
            assert!(!to(OrderStatus::Processing).applies_to(terminal));
            assert!(!to(OrderStatus::Partial).applies_to(terminal));
            assert!(!to(OrderStatus::Success).applies_to(terminal));
        }
        assert!(to(OrderStatus::Processing).applies_to(OrderStatus::Partial));
        assert!(to(OrderStatus::Success).applies_to(OrderStatus::Processing));

        let heights_only = OrderUpdate {
            block_height: Some(10),
            ..Default::default()
        };
        assert!(heights_only.applies_to(OrderStatus::Expired));
    }

    #[test]
    fn test_recovery_only_settles_expired_orders() {
        let recover = |status| OrderUpdate {
            status: Some(status),
            recover_expired: true,
            ..Default::default()
        };
        assert!(recover(OrderStatus::Success).applies_to(OrderStatus::Expired));
        assert!(recover(OrderStatus::Expired).applies_to(OrderStatus::Expired));
        assert!(!recover(OrderStatus::Processing).applies_to(OrderStatus::Expired));
        assert!(!recover(OrderStatus::Success).applies_to(OrderStatus::Success));
        assert!(!recover(OrderStatus::Success).applies_to(OrderStatus::Failed));
    }
}
