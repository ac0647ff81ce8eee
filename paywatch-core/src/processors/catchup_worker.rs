//! CatchupWorker processor.
//!
//! The confirmed track only scans forward, so an order can expire and leave the
//! active-order index before a transfer sent just before its deadline reaches
//! confirmation depth. On every tick this worker loads the expired, unsettled
//! orders of its network and re-scans the chain from their lowest
//! `block_height` up to the confirmed head, matching logs against the loaded
//! orders directly.
//!
//! Orders that saw no qualifying log get their `block_height` advanced to the
//! scanned head afterwards, so the next cycle's window shrinks.

use crate::cache::CacheStore;
use crate::chain::{LogPosition, RoundRobinClient, RpcError, decode_transfer};
use crate::config::{CatchupSettings, NetworkConfig, TokenConfig};
use crate::entities::payment_order::{OrderUpdate, PaymentOrder};
use crate::entities::{OrderStatus, utc_now};
use crate::events::{WebhookEvent, WebhookEventSender};
use crate::processors::latest_block_worker::cached_latest_block;
use crate::processors::token_decimals::TokenDecimals;
use crate::processors::transfer_matcher::{block_to_i64, record_payment};
use crate::repositories::Repositories;
use crate::settlement::{PaymentCovering, settle_order};
use crate::units::UnitError;
use alloy::primitives::Address;
use paywatch_sdk::objects::Network;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum CatchupError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("unit conversion error: {0}")]
    Units(#[from] UnitError),
}

/// Summary of one catch-up cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatchupReport {
    pub orders: usize,
    pub from_block: u64,
    pub to_block: u64,
    /// Orders whose settlement state changed.
    pub updated: usize,
    /// Orders that reached Success.
    pub recovered: usize,
    /// Orders whose `block_height` was advanced without a payment.
    pub advanced: u64,
}

/// Resets the running flag when a cycle ends, including by error.
struct RunGuard<'a> {
    running: &'a Mutex<bool>,
}

impl<'a> RunGuard<'a> {
    fn acquire(running: &'a Mutex<bool>) -> Option<Self> {
        let mut flag = running.lock().unwrap_or_else(|p| p.into_inner());
        if *flag {
            return None;
        }
        *flag = true;
        Some(Self { running })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        *self.running.lock().unwrap_or_else(|p| p.into_inner()) = false;
    }
}

pub struct CatchupWorker {
    network: Network,
    tokens: Vec<TokenConfig>,
    confirmation_depth: u64,
    chunk_size: u64,
    client: Arc<RoundRobinClient>,
    cache: Arc<dyn CacheStore>,
    repositories: Repositories,
    decimals: TokenDecimals,
    covering: Arc<dyn PaymentCovering>,
    webhook_tx: WebhookEventSender,
    settings: CatchupSettings,
    running: Mutex<bool>,
}

impl CatchupWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &NetworkConfig,
        client: Arc<RoundRobinClient>,
        cache: Arc<dyn CacheStore>,
        repositories: Repositories,
        decimals: TokenDecimals,
        covering: Arc<dyn PaymentCovering>,
        webhook_tx: WebhookEventSender,
        settings: CatchupSettings,
    ) -> Self {
        Self {
            network: config.network,
            tokens: config.tokens.clone(),
            confirmation_depth: config.confirmation_depth,
            chunk_size: config.listener.chunk_size.max(1),
            client,
            cache,
            repositories,
            decimals,
            covering,
            webhook_tx,
            settings,
            running: Mutex::new(false),
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        info!(network = %self.network, "CatchupWorker started");
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut cycles = JoinSet::new();

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!(network = %self.network, "CatchupWorker received shutdown signal");
                        break;
                    }
                }

                _ = ticker.tick() => {
                    while cycles.try_join_next().is_some() {}
                    let worker = self.clone();
                    cycles.spawn(async move {
                        match worker.run_once().await {
                            Ok(Some(report)) if report.updated > 0 || report.advanced > 0 => {
                                info!(
                                    network = %worker.network,
                                    orders = report.orders,
                                    from = report.from_block,
                                    to = report.to_block,
                                    updated = report.updated,
                                    recovered = report.recovered,
                                    advanced = report.advanced,
                                    "Catch-up cycle finished"
                                );
                            }
                            Ok(Some(_)) => {}
                            Ok(None) => debug!(network = %worker.network, "Previous catch-up cycle still running"),
                            Err(e) => error!(network = %worker.network, error = %e, "Catch-up cycle failed"),
                        }
                    });
                }
            }
        }

        if !cycles.is_empty() {
            info!(network = %self.network, "Waiting for in-flight catch-up cycle");
        }
        while cycles.join_next().await.is_some() {}

        info!(network = %self.network, "CatchupWorker shutdown complete");
    }

    fn token_for(&self, contract: &Address) -> Option<&TokenConfig> {
        self.tokens.iter().find(|t| t.contract_address == *contract)
    }

    /// Run one cycle. Returns `None` if a cycle is already in progress.
    pub async fn run_once(&self) -> Result<Option<CatchupReport>, CatchupError> {
        let Some(_guard) = RunGuard::acquire(&self.running) else {
            return Ok(None);
        };

        let cutoff = utc_now() - self.settings.order_cutoff;
        // Processing orders stay in the index and belong to the matching engine.
        let mut orders: Vec<PaymentOrder> = self
            .repositories
            .orders
            .get_expired_unsettled(self.network, cutoff)
            .await?
            .into_iter()
            .filter(|o| o.status != OrderStatus::Processing)
            .collect();
        if orders.is_empty() {
            return Ok(Some(CatchupReport::default()));
        }

        let latest = cached_latest_block(self.network, self.cache.as_ref(), &self.client).await?;
        let effective = latest.saturating_sub(self.confirmation_depth);
        let from = orders
            .iter()
            .map(|o| u64::try_from(o.block_height).unwrap_or(0))
            .min()
            .unwrap_or(effective);
        let mut report = CatchupReport {
            orders: orders.len(),
            from_block: from,
            to_block: effective,
            ..Default::default()
        };
        if from > effective {
            return Ok(Some(report));
        }

        let contracts: Vec<_> = self.tokens.iter().map(|t| t.contract_address).collect();
        let mut processed: HashSet<i64> = HashSet::new();
        let mut chunk_start = from;
        while chunk_start <= effective {
            let chunk_end = chunk_start
                .saturating_add(self.chunk_size - 1)
                .min(effective);
            let mut logs = self
                .client
                .poll_logs(&contracts, chunk_start, chunk_end)
                .await?;
            logs.sort_by_key(|log| (log.block(), log.index()));

            for log in logs.iter().filter(|log| !log.removed) {
                let event = match decode_transfer(log) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(network = %self.network, tx_hash = ?log.transaction_hash, error = %e, "Skipping undecodable log");
                        continue;
                    }
                };
                let Some(token) = self.token_for(&event.contract) else {
                    continue;
                };
                let recipient = event.to.to_string();
                let block = block_to_i64(event.block_number);

                for order in orders.iter_mut().filter(|o| {
                    o.wallet_address.eq_ignore_ascii_case(&recipient) && o.symbol == token.symbol
                }) {
                    if order.status == OrderStatus::Success || block < order.block_height {
                        continue;
                    }
                    let tx_hash = format!("{:#x}", event.transaction_hash);
                    if self
                        .repositories
                        .histories
                        .exists(order.id, &tx_hash, block_to_i64(event.log_index))
                        .await?
                    {
                        continue;
                    }

                    let decimals = match token.decimals {
                        Some(decimals) => decimals,
                        None => self.decimals.get(event.contract).await?,
                    };
                    let outcome = settle_order(
                        order,
                        decimals,
                        self.covering.as_ref(),
                        event.value,
                        event.block_number,
                    )?;
                    if !outcome.changed {
                        continue;
                    }

                    let applied = self
                        .repositories
                        .orders
                        .update(
                            order.id,
                            OrderUpdate {
                                block_height: Some(block),
                                status: Some(outcome.status),
                                transferred: Some(outcome.transferred),
                                recover_expired: true,
                                ..Default::default()
                            },
                        )
                        .await?;
                    if !applied {
                        debug!(network = %self.network, order_id = order.id, "Order settled elsewhere, skipping");
                        processed.insert(order.id);
                        continue;
                    }
                    record_payment(
                        &self.repositories,
                        self.network,
                        order,
                        &token.symbol,
                        &event,
                        &outcome,
                    )
                    .await?;

                    order.status = outcome.status;
                    order.transferred = outcome.transferred;
                    order.block_height = block;
                    if processed.insert(order.id) {
                        report.updated += 1;
                    }

                    if outcome.status == OrderStatus::Success {
                        order.succeeded_at = Some(utc_now());
                        report.recovered += 1;
                        info!(
                            network = %self.network,
                            order_id = order.id,
                            transferred = %order.transferred,
                            block,
                            "Expired order recovered"
                        );
                        if self
                            .webhook_tx
                            .send(WebhookEvent::OrderRecovered(Box::new(order.webhook_payload())))
                            .await
                            .is_err()
                        {
                            warn!(network = %self.network, order_id = order.id, "Webhook channel closed");
                        }
                    }
                }
            }
            chunk_start = chunk_end.saturating_add(1);
            if chunk_end == u64::MAX {
                break;
            }
        }

        let head = block_to_i64(effective);
        let heights: Vec<(i64, i64)> = orders
            .iter()
            .filter(|o| !processed.contains(&o.id))
            .map(|o| (o.id, head))
            .collect();
        if !heights.is_empty() {
            report.advanced = self
                .repositories
                .orders
                .batch_update_block_heights(&heights)
                .await
                .inspect_err(|e| {
                    let ids: Vec<i64> = heights.iter().map(|(id, _)| *id).collect();
                    error!(network = %self.network, order_ids = ?ids, error = %e, "Failed to advance order block heights");
                })?;
        }

        Ok(Some(report))
    }
}
