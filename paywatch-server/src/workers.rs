//! Startup of the per-network processors.

use crate::config::LoadedConfig;
use anyhow::Context;
use paywatch_core::cache::CacheStore;
use paywatch_core::chain::{RoundRobinClient, WalletDeriver};
use paywatch_core::config::NetworkConfig;
use paywatch_core::events::WebhookEventSender;
use paywatch_core::processors::{
    BalanceRefresher, CatchupWorker, EventListener, LatestBlockWorker, OrderCleaner, SweepWorker,
    TokenDecimals, TransferMatcher, active_order_index,
};
use paywatch_core::repositories::Repositories;
use paywatch_core::settlement::PaymentCovering;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Handles shared by every network's processors.
#[derive(Clone)]
pub struct SharedComponents {
    pub repositories: Repositories,
    pub cache: Arc<dyn CacheStore>,
    pub deriver: Arc<dyn WalletDeriver>,
    pub covering: Arc<dyn PaymentCovering>,
    pub webhook_tx: WebhookEventSender,
    pub shutdown_rx: watch::Receiver<bool>,
}

/// Bring one network online and spawn its background loops.
///
/// Fails when the network cannot be reached, a token's precision cannot be
/// resolved, or the listener has no usable start block.
pub async fn spawn_network(
    network_config: &NetworkConfig,
    config: &LoadedConfig,
    shared: &SharedComponents,
) -> anyhow::Result<Vec<JoinHandle<()>>> {
    let network = network_config.network;
    let client = Arc::new(
        RoundRobinClient::http(
            &network_config.rpc_urls,
            network_config.rpc.clone(),
            network_config.chain_id,
        )
        .with_context(|| format!("failed to build the RPC client of {network}"))?,
    );

    let head = client
        .latest_block_number()
        .await
        .with_context(|| format!("failed to reach any RPC endpoint of {network}"))?;
    tracing::info!(network = %network, latest_block = head, "Network reachable");

    let decimals = TokenDecimals::new(network, client.clone(), shared.cache.clone());
    for token in &network_config.tokens {
        let resolved = match token.decimals {
            Some(known) => {
                decimals.preload(token.contract_address, known).await;
                known
            }
            None => decimals.get(token.contract_address).await.with_context(|| {
                format!("failed to fetch decimals of {} on {network}", token.symbol)
            })?,
        };
        tracing::info!(network = %network, symbol = %token.symbol, decimals = resolved, "Token registered");
    }

    let mut handles = Vec::new();

    let latest_block_worker = LatestBlockWorker::new(
        network,
        client.clone(),
        shared.cache.clone(),
        shared.repositories.block_states.clone(),
        network_config.listener.latest_block_interval,
        network_config.listener.latest_block_ttl,
    );
    latest_block_worker
        .refresh()
        .await
        .with_context(|| format!("failed to publish the latest block of {network}"))?;
    handles.push(tokio::spawn(
        latest_block_worker.run(shared.shutdown_rx.clone()),
    ));

    let index = Arc::new(active_order_index(
        network,
        config.payment.order_capacity,
        shared.repositories.orders.clone(),
    ));
    let matcher = Arc::new(TransferMatcher::new(
        network_config,
        index,
        shared.repositories.clone(),
        decimals.clone(),
        shared.covering.clone(),
        shared.webhook_tx.clone(),
    ));
    let report = matcher
        .dequeue_orders()
        .await
        .with_context(|| format!("failed to load active orders of {network}"))?;
    tracing::info!(
        network = %network,
        loaded = report.filled,
        expired = report.expired,
        succeeded = report.succeeded,
        "Active order index ready"
    );
    handles.push(tokio::spawn(matcher.clone().run_dequeue_ticker(
        config.payment.dequeue_interval,
        shared.shutdown_rx.clone(),
    )));

    let mut listener = EventListener::new(
        network_config,
        client.clone(),
        shared.cache.clone(),
        shared.repositories.block_states.clone(),
    );
    listener.register_matcher(&matcher);
    listener
        .resolve_start_block()
        .await
        .with_context(|| format!("failed to resolve the start block of {network}"))?;
    let listener_shutdown = shared.shutdown_rx.clone();
    handles.push(tokio::spawn(async move {
        if let Err(e) = listener.run(listener_shutdown).await {
            tracing::error!(network = %network, error = %e, "EventListener stopped with error");
        }
    }));

    let catchup = Arc::new(CatchupWorker::new(
        network_config,
        client.clone(),
        shared.cache.clone(),
        shared.repositories.clone(),
        decimals.clone(),
        shared.covering.clone(),
        shared.webhook_tx.clone(),
        config.catchup.clone(),
    ));
    handles.push(tokio::spawn(catchup.run(shared.shutdown_rx.clone())));

    if config.balance_refresh.enabled {
        let refresher = BalanceRefresher::new(
            network_config,
            client.clone(),
            shared.repositories.wallets.clone(),
            decimals.clone(),
            config.balance_refresh.clone(),
        );
        handles.push(tokio::spawn(refresher.run(shared.shutdown_rx.clone())));
    }

    if config.sweep.enabled {
        let sweeper = SweepWorker::new(
            network_config,
            client.clone(),
            shared.repositories.clone(),
            shared.deriver.clone(),
            decimals,
            config.sweep.clone(),
        );
        handles.push(tokio::spawn(sweeper.run(shared.shutdown_rx.clone())));
    }

    if config.cleaner.enabled {
        let cleaner = OrderCleaner::new(
            network,
            shared.repositories.orders.clone(),
            shared.webhook_tx.clone(),
            config.cleaner.clone(),
        );
        handles.push(tokio::spawn(cleaner.run(shared.shutdown_rx.clone())));
    }

    Ok(handles)
}
