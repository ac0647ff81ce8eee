//! TransferMatcher processor.
//!
//! The TransferMatcher is responsible for:
//! - Decoding `Transfer` logs handed over by the listener
//! - Finding the active order keyed by `recipient_SYMBOL` in the order index
//! - Marking orders Processing on the realtime track
//! - Settling orders on the confirmed track (full or partial payment)
//! - Sweeping expired and succeeded orders out of the index and firing their webhooks
//!
//! Index writes are optimistic. An order that left the index before its
//! database update is abandoned with [`MatchError::IndexRace`]. Once the
//! update is persisted, the new state is written to whatever slot holds the
//! key at that moment; if the slot keeps moving, the entry is evicted so the
//! next fill reloads it from the database. The index never keeps a snapshot
//! older than the stored order.

use crate::chain::erc20::{DecodeError, TransferEvent, decode_transfer};
use crate::chain::{Log, RpcError};
use crate::config::{NetworkConfig, TokenConfig};
use crate::entities::payment_event_history::PaymentEventHistoryInsert;
use crate::entities::payment_order::{OrderUpdate, PaymentOrder, order_key};
use crate::entities::{OrderStatus, utc_now};
use crate::events::{HandlerKind, TransferOutcome, WebhookEvent, WebhookEventSender};
use crate::order_index::{KeyedQueue, OrderQueue, QueueError, QueueLoader};
use crate::processors::event_listener::LogHandler;
use crate::processors::token_decimals::TokenDecimals;
use crate::repositories::{OrderRepository, Repositories};
use crate::settlement::{PaymentCovering, SettlementOutcome, settle_order};
use crate::units::UnitError;
use alloy::primitives::Address;
use async_trait::async_trait;
use compact_str::CompactString;
use paywatch_sdk::objects::Network;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};

/// Errors that can occur while matching a transfer to an order.
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("no token configured for contract {0}")]
    UnknownToken(Address),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("unit conversion error: {0}")]
    Units(#[from] UnitError),

    #[error("order index error: {0}")]
    Queue(#[from] QueueError),

    /// The order left its index slot between lookup and write-back.
    #[error("order {order_id} moved in the index before its update was written (key {key})")]
    IndexRace { order_id: i64, key: String },
}

/// Slot lookups tried before a written-back order is evicted instead.
const WRITE_BACK_ATTEMPTS: usize = 3;

/// Pages active orders of one network out of the order repository.
pub struct ActiveOrderLoader {
    network: Network,
    orders: Arc<dyn OrderRepository>,
}

impl ActiveOrderLoader {
    pub fn new(network: Network, orders: Arc<dyn OrderRepository>) -> Self {
        Self { network, orders }
    }
}

#[async_trait]
impl QueueLoader<PaymentOrder> for ActiveOrderLoader {
    async fn load(&self, limit: usize, offset: usize) -> Result<Vec<PaymentOrder>, QueueError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);
        self.orders
            .get_active_orders(self.network, limit, offset)
            .await
            .map_err(|e| QueueError::Loader(e.to_string()))
    }
}

/// Active-order index of one network, keyed by `wallet_SYMBOL`.
pub fn active_order_index(
    network: Network,
    capacity: usize,
    orders: Arc<dyn OrderRepository>,
) -> OrderQueue<PaymentOrder> {
    OrderQueue::new(
        capacity,
        PaymentOrder::key,
        ActiveOrderLoader::new(network, orders),
    )
}

pub(crate) fn block_to_i64(block: u64) -> i64 {
    i64::try_from(block).unwrap_or(i64::MAX)
}

/// Write the accounting side effects of one applied transfer.
///
/// `order` is the state before the transfer was applied.
pub(crate) async fn record_payment(
    repositories: &Repositories,
    network: Network,
    order: &PaymentOrder,
    symbol: &CompactString,
    event: &TransferEvent,
    outcome: &SettlementOutcome,
) -> Result<(), sqlx::Error> {
    let recorded = repositories
        .histories
        .record(PaymentEventHistoryInsert {
            payment_order_id: order.id,
            transaction_hash: format!("{:#x}", event.transaction_hash),
            log_index: block_to_i64(event.log_index),
            from_address: event.from.to_string(),
            to_address: event.to.to_string(),
            contract_address: event.contract.to_string(),
            token_symbol: symbol.clone(),
            amount: outcome.credited,
            network,
        })
        .await?;
    if !recorded {
        warn!(
            order_id = order.id,
            tx_hash = %event.transaction_hash,
            "Payment event already recorded"
        );
    }

    let completed = outcome.status == OrderStatus::Success && order.status != OrderStatus::Success;
    if outcome.credited.is_zero() && !completed {
        return Ok(());
    }
    repositories
        .statistics
        .increment(
            network,
            symbol.clone(),
            order.vendor_id.clone(),
            outcome.credited,
            completed,
        )
        .await?;
    if !outcome.credited.is_zero() {
        repositories
            .wallets
            .credit_balance(order.wallet_id, network, symbol.clone(), outcome.credited)
            .await?;
    }
    Ok(())
}

/// Orders removed from the index by one expiry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DequeueReport {
    pub expired: usize,
    pub succeeded: usize,
    pub filled: usize,
}

/// Matching engine of one network.
pub struct TransferMatcher {
    network: Network,
    tokens: Vec<TokenConfig>,
    orders: Arc<dyn KeyedQueue<PaymentOrder>>,
    repositories: Repositories,
    decimals: TokenDecimals,
    covering: Arc<dyn PaymentCovering>,
    webhook_tx: WebhookEventSender,
    dequeue_lock: Mutex<()>,
}

impl TransferMatcher {
    pub fn new(
        config: &NetworkConfig,
        orders: Arc<dyn KeyedQueue<PaymentOrder>>,
        repositories: Repositories,
        decimals: TokenDecimals,
        covering: Arc<dyn PaymentCovering>,
        webhook_tx: WebhookEventSender,
    ) -> Self {
        Self {
            network: config.network,
            tokens: config.tokens.clone(),
            orders,
            repositories,
            decimals,
            covering,
            webhook_tx,
            dequeue_lock: Mutex::new(()),
        }
    }

    /// Token contracts this matcher handles.
    pub fn contracts(&self) -> Vec<Address> {
        self.tokens.iter().map(|t| t.contract_address).collect()
    }

    /// A listener handler dispatching to this matcher.
    pub fn handler(self: &Arc<Self>, kind: HandlerKind) -> Arc<dyn LogHandler> {
        Arc::new(TransferHandler {
            matcher: self.clone(),
            kind,
        })
    }

    fn token_for(&self, contract: &Address) -> Result<&TokenConfig, MatchError> {
        self.tokens
            .iter()
            .find(|t| t.contract_address == *contract)
            .ok_or(MatchError::UnknownToken(*contract))
    }

    /// Index slot, key and snapshot of the order receiving `event`.
    fn locate(&self, event: &TransferEvent, symbol: &str) -> Option<(usize, String, PaymentOrder)> {
        let key = order_key(&event.to.to_string(), symbol);
        let index = self.orders.get_index(&key)?;
        let order = self.orders.get_item_at(index)?;
        (order.network() == self.network && order.key() == key).then_some((index, key, order))
    }

    fn revalidate(&self, index: usize, key: &str, order_id: i64) -> Result<(), MatchError> {
        if self.orders.get_index(key) == Some(index) {
            Ok(())
        } else {
            Err(MatchError::IndexRace {
                order_id,
                key: key.to_string(),
            })
        }
    }

    /// Store the persisted state of `order` in the index.
    ///
    /// Must only be called after the database update succeeded. The slot is
    /// looked up again on every attempt because a dequeue may have shifted it
    /// while the update was awaited.
    fn write_back(&self, key: &str, order: PaymentOrder) -> Result<(), MatchError> {
        let order_id = order.id;
        for _ in 0..WRITE_BACK_ATTEMPTS {
            let Some(index) = self.orders.get_index(key) else {
                debug!(order_id, key, "Order left the index, next fill reloads it");
                return Ok(());
            };
            match self.orders.replace_at(index, order.clone()) {
                Ok(()) => return Ok(()),
                Err(QueueError::OutOfBounds(_) | QueueError::KeyMismatch { .. }) => continue,
                Err(other) => return Err(MatchError::Queue(other)),
            }
        }

        warn!(
            network = %self.network,
            order_id,
            key,
            "Index slot kept moving, evicting the order until the next fill"
        );
        if let Err(e) = self.orders.dequeue(&move |o: &PaymentOrder| o.id == order_id) {
            debug!(order_id, error = %e, "Order already gone from the index");
        }
        Ok(())
    }

    /// Mark the receiving order Processing on a tentative observation.
    pub async fn process_realtime(&self, log: &Log) -> Result<TransferOutcome, MatchError> {
        let event = decode_transfer(log)?;
        let token = self.token_for(&event.contract)?;
        let Some((index, key, order)) = self.locate(&event, &token.symbol) else {
            return Ok(TransferOutcome::Unmatched);
        };

        let block = block_to_i64(event.block_number);
        let touchable = matches!(
            order.status,
            OrderStatus::Pending | OrderStatus::Partial | OrderStatus::Processing
        );
        let already_seen =
            order.status == OrderStatus::Processing && order.upcoming_block_height >= block;
        if !touchable || already_seen {
            return Ok(TransferOutcome::Unchanged { order_id: order.id });
        }

        self.revalidate(index, &key, order.id)?;
        let applied = self
            .repositories
            .orders
            .update(
                order.id,
                OrderUpdate {
                    status: Some(OrderStatus::Processing),
                    upcoming_block_height: Some(block),
                    ..Default::default()
                },
            )
            .await?;
        if !applied {
            debug!(order_id = order.id, block, "Order settled or expired meanwhile, realtime touch dropped");
            return Ok(TransferOutcome::Unchanged { order_id: order.id });
        }

        let order_id = order.id;
        let mut updated = order;
        updated.status = OrderStatus::Processing;
        updated.upcoming_block_height = block;
        self.write_back(&key, updated)?;

        info!(
            network = %self.network,
            order_id,
            block,
            tx_hash = %event.transaction_hash,
            "Order marked processing"
        );
        Ok(TransferOutcome::Updated {
            order_id,
            status: OrderStatus::Processing.into(),
        })
    }

    /// Apply a confirmed transfer to the receiving order.
    pub async fn process_confirmed(&self, log: &Log) -> Result<TransferOutcome, MatchError> {
        if let Err(e) = self.dequeue_orders().await {
            warn!(network = %self.network, error = %e, "Expiry sweep before confirmed event failed");
        }

        let event = decode_transfer(log)?;
        let token = self.token_for(&event.contract)?;
        let Some((index, key, order)) = self.locate(&event, &token.symbol) else {
            return Ok(TransferOutcome::Unmatched);
        };
        if matches!(
            order.status,
            OrderStatus::Success | OrderStatus::Expired | OrderStatus::Failed
        ) {
            return Ok(TransferOutcome::Unchanged { order_id: order.id });
        }

        let tx_hash = format!("{:#x}", event.transaction_hash);
        let log_index = block_to_i64(event.log_index);
        if self
            .repositories
            .histories
            .exists(order.id, &tx_hash, log_index)
            .await?
        {
            debug!(order_id = order.id, tx_hash = %tx_hash, "Transfer already applied");
            return Ok(TransferOutcome::Duplicate { order_id: order.id });
        }

        let decimals = match token.decimals {
            Some(decimals) => decimals,
            None => self.decimals.get(event.contract).await?,
        };
        let outcome = settle_order(
            &order,
            decimals,
            self.covering.as_ref(),
            event.value,
            event.block_number,
        )?;
        if !outcome.changed {
            return Ok(TransferOutcome::Unchanged { order_id: order.id });
        }

        let block = block_to_i64(event.block_number);
        self.revalidate(index, &key, order.id)?;
        let applied = self
            .repositories
            .orders
            .update(
                order.id,
                OrderUpdate {
                    block_height: Some(block),
                    status: Some(outcome.status),
                    transferred: Some(outcome.transferred),
                    ..Default::default()
                },
            )
            .await?;
        if !applied {
            // The catch-up worker picks the transfer up from the stored block height.
            debug!(order_id = order.id, block, "Order left the active states meanwhile, payment deferred");
            return Ok(TransferOutcome::Unchanged { order_id: order.id });
        }

        let mut updated = order.clone();
        updated.status = outcome.status;
        updated.transferred = outcome.transferred;
        updated.block_height = block;
        if outcome.status == OrderStatus::Success {
            updated.succeeded_at = Some(utc_now());
        }
        let written = self.write_back(&key, updated);

        record_payment(
            &self.repositories,
            self.network,
            &order,
            &token.symbol,
            &event,
            &outcome,
        )
        .await?;
        written?;

        info!(
            network = %self.network,
            order_id = order.id,
            status = ?outcome.status,
            transferred = %outcome.transferred,
            block,
            "Order payment applied"
        );
        Ok(TransferOutcome::Updated {
            order_id: order.id,
            status: outcome.status.into(),
        })
    }

    /// Evict expired and succeeded orders from the index, then top it up.
    ///
    /// Processing orders are never evicted: a tentative payment is in flight.
    /// Expired orders are marked in one batch update; webhooks are fired for
    /// every evicted order whose final state was persisted.
    pub async fn dequeue_orders(&self) -> Result<DequeueReport, MatchError> {
        let _guard = self.dequeue_lock.lock().await;
        let now = utc_now();
        let network = self.network;
        let evictable = move |order: &PaymentOrder| {
            order.network() == network
                && order.status != OrderStatus::Processing
                && (order.status == OrderStatus::Success || order.is_expired_at(now))
        };

        let mut expired = Vec::new();
        let mut succeeded = Vec::new();
        while let Ok(order) = self.orders.dequeue(&evictable) {
            if order.status == OrderStatus::Success {
                succeeded.push(order);
            } else {
                expired.push(order);
            }
        }

        let mut payloads = Vec::with_capacity(expired.len() + succeeded.len());
        if !expired.is_empty() {
            let ids: Vec<i64> = expired.iter().map(|o| o.id).collect();
            match self.repositories.orders.batch_update_to_expired(&ids).await {
                Ok(updated) => {
                    info!(network = %self.network, count = updated, "Orders marked expired");
                    for order in &mut expired {
                        order.status = OrderStatus::Expired;
                        payloads.push(order.webhook_payload());
                    }
                }
                Err(e) => {
                    error!(
                        network = %self.network,
                        order_ids = ?ids,
                        error = %e,
                        "Failed to mark orders expired"
                    );
                }
            }
        }
        payloads.extend(succeeded.iter().map(PaymentOrder::webhook_payload));

        if !payloads.is_empty()
            && self
                .webhook_tx
                .send(WebhookEvent::OrdersSettled(payloads))
                .await
                .is_err()
        {
            warn!(network = %self.network, "Webhook channel closed, dropping settled-order webhooks");
        }

        let filled = self.orders.fill().await?;
        if filled > 0 {
            debug!(network = %self.network, filled, "Order index topped up");
        }
        Ok(DequeueReport {
            expired: expired.len(),
            succeeded: succeeded.len(),
            filled,
        })
    }

    /// Periodic expiry sweep.
    pub async fn run_dequeue_ticker(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        info!(network = %self.network, "Dequeue ticker started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!(network = %self.network, "Dequeue ticker received shutdown signal");
                        break;
                    }
                }

                _ = ticker.tick() => {
                    match self.dequeue_orders().await {
                        Ok(report) if report.expired + report.succeeded > 0 => {
                            info!(
                                network = %self.network,
                                expired = report.expired,
                                succeeded = report.succeeded,
                                filled = report.filled,
                                "Expiry sweep evicted orders"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => error!(network = %self.network, error = %e, "Expiry sweep failed"),
                    }
                }
            }
        }

        info!(network = %self.network, "Dequeue ticker shutdown complete");
    }
}

/// Registry entry routing logs of one track to the matcher.
struct TransferHandler {
    matcher: Arc<TransferMatcher>,
    kind: HandlerKind,
}

#[async_trait]
impl LogHandler for TransferHandler {
    async fn handle(&self, log: &Log) -> Result<TransferOutcome, MatchError> {
        match self.kind {
            HandlerKind::Confirmed => self.matcher.process_confirmed(log).await,
            HandlerKind::Realtime => self.matcher.process_realtime(log).await,
        }
    }
}
