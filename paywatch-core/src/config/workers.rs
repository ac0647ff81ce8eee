//! Settings of the matching engine and the periodic workers.

use crate::settlement::CoveringStrategy;
use rust_decimal::Decimal;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct PaymentSettings {
    pub covering: CoveringStrategy,
    /// Capacity of each network's active-order index.
    pub order_capacity: usize,
    /// Period of the expiry sweep ticker.
    pub dequeue_interval: Duration,
    /// Concurrent webhook deliveries per batch.
    pub webhook_concurrency: usize,
}

impl Default for PaymentSettings {
    fn default() -> Self {
        Self {
            covering: CoveringStrategy::default(),
            order_capacity: 1000,
            dequeue_interval: Duration::from_secs(5),
            webhook_concurrency: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CatchupSettings {
    pub interval: Duration,
    /// Orders whose deadline is older than this are no longer re-scanned.
    pub order_cutoff: Duration,
}

impl Default for CatchupSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            order_cutoff: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SweepSettings {
    pub enabled: bool,
    pub interval: Duration,
    /// Multiplier on the estimated gas cost of the token transfer.
    pub gas_buffer: Decimal,
    /// Wallets with a smaller tracked balance are skipped.
    pub minimum_withdraw: Decimal,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(24 * 60 * 60),
            gas_buffer: Decimal::new(115, 2),
            minimum_withdraw: Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CleanerSettings {
    pub enabled: bool,
    pub interval: Duration,
    /// How long past its deadline an untouched Pending order is kept before failing it.
    pub pending_timeout: Duration,
}

impl Default for CleanerSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: Duration::from_secs(60),
            pending_timeout: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BalanceRefreshSettings {
    pub enabled: bool,
    /// Period between on-chain balance reads of all deposit wallets.
    pub interval: Duration,
}

impl Default for BalanceRefreshSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60),
        }
    }
}
