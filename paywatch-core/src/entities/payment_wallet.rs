use crate::entities::{NetworkType, utc_now};
use crate::framework::DatabaseProcessor;
use compact_str::CompactString;
use kanau::processor::Processor;
use paywatch_sdk::objects::Network;
use rust_decimal::Decimal;

/// Tracked token balance of a deposit wallet.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct WalletBalance {
    pub wallet_id: i64,
    pub address: String,
    pub network: NetworkType,
    pub symbol: CompactString,
    pub balance: Decimal,
}

#[derive(Debug, Clone)]
/// Add a credited payment to the wallet's running balance.
pub struct CreditWalletBalance {
    pub wallet_id: i64,
    pub network: Network,
    pub symbol: CompactString,
    pub amount: Decimal,
}

impl Processor<CreditWalletBalance> for DatabaseProcessor {
    type Output = ();
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:CreditWalletBalance")]
    async fn process(&self, query: CreditWalletBalance) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO payment_wallet_balances (wallet_id, network, symbol, balance, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (wallet_id, network, symbol) DO UPDATE SET
                balance = payment_wallet_balances.balance + EXCLUDED.balance,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(query.wallet_id)
        .bind(NetworkType::from(query.network))
        .bind(query.symbol)
        .bind(query.amount)
        .bind(utc_now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
/// Subtract a withdrawn amount. The balance is floored at zero.
pub struct DebitWalletBalance {
    pub wallet_id: i64,
    pub network: Network,
    pub symbol: CompactString,
    pub amount: Decimal,
}

impl Processor<DebitWalletBalance> for DatabaseProcessor {
    type Output = ();
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:DebitWalletBalance")]
    async fn process(&self, query: DebitWalletBalance) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE payment_wallet_balances
            SET balance = GREATEST(balance - $4, 0), updated_at = $5
            WHERE wallet_id = $1 AND network = $2 AND symbol = $3
            "#,
        )
        .bind(query.wallet_id)
        .bind(NetworkType::from(query.network))
        .bind(query.symbol)
        .bind(query.amount)
        .bind(utc_now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
/// Wallets on a network holding a positive tracked balance of `symbol`.
pub struct GetWalletsWithBalance {
    pub network: Network,
    pub symbol: CompactString,
}

impl Processor<GetWalletsWithBalance> for DatabaseProcessor {
    type Output = Vec<WalletBalance>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetWalletsWithBalance")]
    async fn process(&self, query: GetWalletsWithBalance) -> Result<Vec<WalletBalance>, sqlx::Error> {
        sqlx::query_as::<_, WalletBalance>(
            r#"
            SELECT b.wallet_id, w.address, b.network, b.symbol, b.balance
            FROM payment_wallet_balances b
            JOIN payment_wallets w ON w.id = b.wallet_id
            WHERE b.network = $1 AND b.symbol = $2 AND b.balance > 0
            ORDER BY b.wallet_id ASC
            "#,
        )
        .bind(NetworkType::from(query.network))
        .bind(query.symbol)
        .fetch_all(&self.pool)
        .await
    }
}

/// A deposit wallet and its address.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct PaymentWallet {
    pub id: i64,
    pub address: String,
}

#[derive(Debug, Clone, Copy)]
pub struct ListPaymentWallets;

impl Processor<ListPaymentWallets> for DatabaseProcessor {
    type Output = Vec<PaymentWallet>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListPaymentWallets")]
    async fn process(&self, _query: ListPaymentWallets) -> Result<Vec<PaymentWallet>, sqlx::Error> {
        sqlx::query_as::<_, PaymentWallet>("SELECT id, address FROM payment_wallets ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await
    }
}

#[derive(Debug, Clone)]
/// Overwrite tracked balances with values read from the chain.
pub struct SetWalletBalances {
    pub network: Network,
    pub symbol: CompactString,
    pub balances: Vec<(i64, Decimal)>,
}

impl Processor<SetWalletBalances> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:SetWalletBalances")]
    async fn process(&self, query: SetWalletBalances) -> Result<u64, sqlx::Error> {
        if query.balances.is_empty() {
            return Ok(0);
        }
        let (ids, balances): (Vec<i64>, Vec<Decimal>) = query.balances.into_iter().unzip();
        let result = sqlx::query(
            r#"
            INSERT INTO payment_wallet_balances (wallet_id, network, symbol, balance, updated_at)
            SELECT u.wallet_id, $3, $4, u.balance, $5
            FROM UNNEST($1::bigint[], $2::numeric[]) AS u(wallet_id, balance)
            ON CONFLICT (wallet_id, network, symbol) DO UPDATE SET
                balance = EXCLUDED.balance,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&ids)
        .bind(&balances)
        .bind(NetworkType::from(query.network))
        .bind(query.symbol)
        .bind(utc_now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
