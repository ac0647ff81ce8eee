//! Long-lived loops of the reconciliation core.
//!
//! Every network runs its own instance of each processor:
//!
//! - `LatestBlockWorker`: polls the chain head into the cache
//! - `EventListener`: confirmed and realtime log scanning, dispatches to handlers
//! - `TransferMatcher`: applies transfers to active orders, runs the expiry sweep,
//!   emits `WebhookEvent`
//! - `CatchupWorker`: re-scans history for expired orders, emits `WebhookEvent`
//! - `OrderCleaner`: fails stale Pending orders, emits `WebhookEvent`
//! - `SweepWorker`: moves deposit wallet balances to the master wallet
//! - `BalanceRefresher`: reconciles tracked wallet balances with the chain
//!
//! A single `WebhookSender` receives `WebhookEvent` from all networks and
//! delivers webhooks.

pub mod balance_refresher;
pub mod catchup_worker;
pub mod event_listener;
pub mod latest_block_worker;
pub mod order_cleaner;
pub mod sweep_worker;
pub mod token_decimals;
pub mod transfer_matcher;
pub mod webhook_sender;

pub use balance_refresher::{BalanceRefreshError, BalanceRefresher, RefreshReport};
pub use catchup_worker::{CatchupError, CatchupReport, CatchupWorker};
pub use event_listener::{EventListener, HandlerRegistry, ListenerError, LogHandler};
pub use latest_block_worker::{LatestBlockWorker, cached_latest_block};
pub use order_cleaner::{CleanerReport, OrderCleaner};
pub use sweep_worker::{SweepError, SweepReport, SweepWorker, gas_top_up};
pub use token_decimals::TokenDecimals;
pub use transfer_matcher::{
    ActiveOrderLoader, DequeueReport, MatchError, TransferMatcher, active_order_index,
};
pub use webhook_sender::{HttpWebhookDelivery, WebhookDelivery, WebhookError, WebhookSender};
