//! EventListener processor.
//!
//! The EventListener is responsible for:
//! - Scanning confirmed blocks forward from the persisted cursor (confirmed track)
//! - Scanning the unconfirmed tail above the confirmation depth (realtime track)
//! - Dispatching each `Transfer` log to the handler registered for its contract
//! - Persisting `last_processed_block` after every confirmed window
//!
//! Both tracks push one [`ListenerEvent`] per dispatched log to a dispatch loop
//! that logs the outcome. The dispatch loop drains until both tracks have exited
//! and dropped their senders.

use crate::cache::{CacheError, CacheStore, get_typed, last_processed_block_key, save_typed};
use crate::chain::{Log, LogPosition, RoundRobinClient, RpcError};
use crate::config::{ListenerSettings, NetworkConfig};
use crate::events::{
    HandlerKind, ListenerEvent, ListenerEventReceiver, ListenerEventSender, TransferOutcome,
    listener_event_channel,
};
use crate::processors::latest_block_worker::cached_latest_block;
use crate::processors::transfer_matcher::{MatchError, TransferMatcher};
use crate::repositories::BlockStateRepository;
use alloy::primitives::Address;
use async_trait::async_trait;
use paywatch_sdk::objects::Network;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Blocks behind the chain head to start from when no cursor exists.
pub const DEFAULT_START_OFFSET: u64 = 10;

/// Errors that stop the listener from starting.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
}

/// Decodes and applies one log.
#[async_trait]
pub trait LogHandler: Send + Sync {
    async fn handle(&self, log: &Log) -> Result<TransferOutcome, MatchError>;
}

/// Handlers keyed by the contract address whose logs they consume.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<Address, Arc<dyn LogHandler>>,
}

impl HandlerRegistry {
    pub fn register(&mut self, contract: Address, handler: Arc<dyn LogHandler>) {
        self.handlers.insert(contract, handler);
    }

    pub fn get(&self, contract: &Address) -> Option<&Arc<dyn LogHandler>> {
        self.handlers.get(contract)
    }

    pub fn contracts(&self) -> Vec<Address> {
        let mut contracts: Vec<Address> = self.handlers.keys().copied().collect();
        contracts.sort();
        contracts
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

pub struct EventListener {
    network: Network,
    confirmation_depth: u64,
    start_block: Option<u64>,
    settings: ListenerSettings,
    client: Arc<RoundRobinClient>,
    cache: Arc<dyn CacheStore>,
    block_states: Arc<dyn BlockStateRepository>,
    confirmed: HandlerRegistry,
    realtime: HandlerRegistry,
}

impl EventListener {
    pub fn new(
        config: &NetworkConfig,
        client: Arc<RoundRobinClient>,
        cache: Arc<dyn CacheStore>,
        block_states: Arc<dyn BlockStateRepository>,
    ) -> Self {
        Self {
            network: config.network,
            confirmation_depth: config.confirmation_depth,
            start_block: config.start_block,
            settings: config.listener.clone(),
            client,
            cache,
            block_states,
            confirmed: HandlerRegistry::default(),
            realtime: HandlerRegistry::default(),
        }
    }

    pub fn register(&mut self, kind: HandlerKind, contract: Address, handler: Arc<dyn LogHandler>) {
        match kind {
            HandlerKind::Confirmed => self.confirmed.register(contract, handler),
            HandlerKind::Realtime => self.realtime.register(contract, handler),
        }
    }

    /// Route both tracks of every token the matcher handles to it.
    pub fn register_matcher(&mut self, matcher: &Arc<TransferMatcher>) {
        for contract in matcher.contracts() {
            for kind in [HandlerKind::Confirmed, HandlerKind::Realtime] {
                self.register(kind, contract, matcher.handler(kind));
            }
        }
    }

    fn registry(&self, kind: HandlerKind) -> &HandlerRegistry {
        match kind {
            HandlerKind::Confirmed => &self.confirmed,
            HandlerKind::Realtime => &self.realtime,
        }
    }

    async fn latest_block(&self) -> Result<u64, RpcError> {
        cached_latest_block(self.network, self.cache.as_ref(), &self.client).await
    }

    /// First block of the confirmed track.
    ///
    /// The persisted cursor wins unless the configured start block is ahead of it.
    pub async fn resolve_start_block(&self) -> Result<u64, ListenerError> {
        let cached: Option<u64> =
            match get_typed(self.cache.as_ref(), &last_processed_block_key(self.network)).await {
                Ok(block) => block,
                Err(e) => {
                    warn!(network = %self.network, error = %e, "Failed to read block cursor from cache");
                    None
                }
            };
        let last_processed = match cached {
            Some(block) => Some(block),
            None => self.block_states.get_last_processed_block(self.network).await?,
        };

        let start = match (last_processed.map(|b| b + 1), self.start_block) {
            (Some(resume), Some(configured)) => resume.max(configured),
            (Some(resume), None) => resume,
            (None, Some(configured)) => configured,
            (None, None) => self
                .latest_block()
                .await?
                .saturating_sub(DEFAULT_START_OFFSET),
        };
        Ok(start)
    }

    /// Run both tracks and the dispatch loop until shutdown.
    ///
    /// Only resolving the start block can fail; once running, RPC and database
    /// errors are logged and retried on the next poll.
    pub async fn run(self, shutdown_rx: watch::Receiver<bool>) -> Result<(), ListenerError> {
        let start = self.resolve_start_block().await?;
        info!(
            network = %self.network,
            start_block = start,
            confirmed_contracts = self.confirmed.contracts().len(),
            realtime_contracts = self.realtime.contracts().len(),
            "EventListener started"
        );

        let (event_tx, event_rx) = listener_event_channel(self.settings.event_buffer);
        let this = Arc::new(self);

        let dispatch = tokio::spawn(dispatch_loop(this.network, event_rx));
        let confirmed = tokio::spawn(
            this.clone()
                .confirmed_loop(start, event_tx.clone(), shutdown_rx.clone()),
        );
        let realtime = tokio::spawn(this.clone().realtime_loop(event_tx, shutdown_rx));

        for (track, handle) in [("confirmed", confirmed), ("realtime", realtime)] {
            if let Err(e) = handle.await {
                error!(network = %this.network, track, error = %e, "Listener track panicked");
            }
        }
        // Every sender is gone now, so the dispatch loop drains and returns.
        if let Err(e) = dispatch.await {
            error!(network = %this.network, error = %e, "Listener dispatch loop panicked");
        }

        info!(network = %this.network, "EventListener shutdown complete");
        Ok(())
    }

    /// Sleep one poll interval. Returns `true` if shutdown was requested.
    async fn pause(&self, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            biased;

            changed = shutdown_rx.changed() => changed.is_err() || *shutdown_rx.borrow(),
            _ = tokio::time::sleep(self.settings.poll_interval) => false,
        }
    }

    async fn confirmed_loop(
        self: Arc<Self>,
        start: u64,
        event_tx: ListenerEventSender,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut current = start;

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let latest = match self.latest_block().await {
                Ok(latest) => latest,
                Err(e) => {
                    warn!(network = %self.network, error = %e, "Failed to fetch latest block");
                    if self.pause(&mut shutdown_rx).await {
                        break;
                    }
                    continue;
                }
            };
            let effective = latest.saturating_sub(self.confirmation_depth);
            if current > effective {
                if self.pause(&mut shutdown_rx).await {
                    break;
                }
                continue;
            }

            let end = current.saturating_add(self.settings.window()).min(effective);
            self.scan_range(HandlerKind::Confirmed, current, end, &event_tx)
                .await;
            self.persist_cursor(end).await;
            debug!(network = %self.network, from = current, to = end, "Confirmed window processed");
            current = end + 1;
        }

        info!(network = %self.network, cursor = current, "Confirmed track stopped");
    }

    async fn realtime_loop(
        self: Arc<Self>,
        event_tx: ListenerEventSender,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut cursor: Option<u64> = None;

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            match self.latest_block().await {
                Ok(latest) => {
                    let effective = latest.saturating_sub(self.confirmation_depth);
                    let from = match cursor {
                        Some(seen) => seen.max(effective) + 1,
                        None => effective + 1,
                    };
                    if from <= latest {
                        self.scan_range(HandlerKind::Realtime, from, latest, &event_tx)
                            .await;
                        cursor = Some(latest);
                    }
                }
                Err(e) => {
                    warn!(network = %self.network, error = %e, "Failed to fetch latest block");
                }
            }

            if self.pause(&mut shutdown_rx).await {
                break;
            }
        }

        info!(network = %self.network, "Realtime track stopped");
    }

    /// Scan `[from, to]` in chunks. Chunks that keep failing are skipped.
    async fn scan_range(&self, kind: HandlerKind, from: u64, to: u64, event_tx: &ListenerEventSender) {
        let chunk_size = self.settings.chunk_size.max(1);
        let mut chunk_start = from;
        while chunk_start <= to {
            let chunk_end = chunk_start.saturating_add(chunk_size - 1).min(to);
            match self.scan_chunk(kind, chunk_start, chunk_end, event_tx).await {
                Ok(dispatched) if dispatched > 0 => {
                    debug!(
                        network = %self.network,
                        track = %kind,
                        from = chunk_start,
                        to = chunk_end,
                        dispatched,
                        "Chunk dispatched"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    error!(
                        network = %self.network,
                        track = %kind,
                        from = chunk_start,
                        to = chunk_end,
                        error = %e,
                        "Skipping chunk after exhausting retries"
                    );
                }
            }
            chunk_start = chunk_end.saturating_add(1);
            if chunk_end == u64::MAX {
                break;
            }
        }
    }

    async fn scan_chunk(
        &self,
        kind: HandlerKind,
        from: u64,
        to: u64,
        event_tx: &ListenerEventSender,
    ) -> Result<usize, RpcError> {
        let registry = self.registry(kind);
        if registry.is_empty() {
            return Ok(0);
        }
        let contracts = registry.contracts();

        let max_attempts = self.settings.max_chunk_retries.max(1);
        let mut attempt = 0;
        let mut logs = loop {
            attempt += 1;
            match self.client.poll_logs(&contracts, from, to).await {
                Ok(logs) => break logs,
                Err(e) if attempt < max_attempts => {
                    warn!(
                        network = %self.network,
                        track = %kind,
                        from,
                        to,
                        attempt,
                        error = %e,
                        "Failed to poll logs, retrying"
                    );
                    tokio::time::sleep(self.settings.poll_interval).await;
                }
                Err(e) => return Err(e),
            }
        };
        logs.sort_by_key(|log| (log.block(), log.index()));

        let mut dispatched = 0;
        for log in logs.iter().filter(|log| !log.removed) {
            let Some(handler) = registry.get(&log.address()) else {
                continue;
            };
            let result = handler.handle(log).await;
            dispatched += 1;
            let event = ListenerEvent {
                network: self.network,
                kind,
                contract: log.address(),
                block_number: log.block(),
                transaction_hash: log.transaction_hash.unwrap_or_default(),
                log_index: log.index(),
                result,
            };
            if event_tx.send(event).await.is_err() {
                debug!(network = %self.network, "Listener event channel closed");
            }
        }
        Ok(dispatched)
    }

    async fn persist_cursor(&self, block: u64) {
        if let Err(e) = self
            .block_states
            .update_last_processed_block(self.network, block)
            .await
        {
            error!(network = %self.network, block, error = %e, "Failed to persist last processed block");
        }
        if let Err(e) = save_typed(
            self.cache.as_ref(),
            &last_processed_block_key(self.network),
            &block,
            None,
        )
        .await
        {
            warn!(network = %self.network, block, error = %e, "Failed to cache last processed block");
        }
    }
}

async fn dispatch_loop(network: Network, mut event_rx: ListenerEventReceiver) {
    while let Some(event) = event_rx.recv().await {
        match &event.result {
            Ok(TransferOutcome::Updated { order_id, status }) => {
                info!(
                    network = %network,
                    track = %event.kind,
                    order_id,
                    status = ?status,
                    block = event.block_number,
                    tx_hash = %event.transaction_hash,
                    "Transfer applied to order"
                );
            }
            Ok(outcome) => {
                debug!(
                    network = %network,
                    track = %event.kind,
                    outcome = ?outcome,
                    block = event.block_number,
                    tx_hash = %event.transaction_hash,
                    "Transfer handled"
                );
            }
            Err(e) => {
                warn!(
                    network = %network,
                    track = %event.kind,
                    contract = %event.contract,
                    block = event.block_number,
                    tx_hash = %event.transaction_hash,
                    log_index = event.log_index,
                    error = %e,
                    "Transfer handling failed"
                );
            }
        }
    }
    debug!(network = %network, "Listener dispatch loop drained");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::chain::erc20::fixtures::transfer_log;
    use crate::chain::rpc::mock::{MockNode, client, fast_settings, log_chain};
    use crate::config::fixtures::{USDT, bsc_network};
    use crate::repositories::memory::MemoryRepository;
    use alloy::primitives::U256;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingHandler {
        blocks: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl LogHandler for RecordingHandler {
        async fn handle(&self, log: &Log) -> Result<TransferOutcome, MatchError> {
            self.blocks.lock().unwrap().push(log.block());
            Ok(TransferOutcome::Unmatched)
        }
    }

    fn chain_with_logs(head: u64, blocks: &[u64]) -> Arc<RoundRobinClient> {
        let logs = blocks
            .iter()
            .enumerate()
            .map(|(i, block)| {
                transfer_log(
                    USDT,
                    Address::repeat_byte(1),
                    Address::repeat_byte(2),
                    U256::from(1u64),
                    *block,
                    i as u8 + 1,
                )
            })
            .collect();
        Arc::new(client(&[log_chain(head, logs)], fast_settings()))
    }

    #[tokio::test]
    async fn test_tracks_split_at_confirmation_depth() {
        let mut config = bsc_network();
        config.start_block = Some(70);
        let repo = MemoryRepository::with_orders(vec![]);
        let client = chain_with_logs(100, &[60, 75, 80, 81, 90]);

        let mut listener = EventListener::new(&config, client, Arc::new(MemoryCache::new()), repo.clone());
        let confirmed = Arc::new(RecordingHandler::default());
        let realtime = Arc::new(RecordingHandler::default());
        listener.register(HandlerKind::Confirmed, USDT, confirmed.clone());
        listener.register(HandlerKind::Realtime, USDT, realtime.clone());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let running = tokio::spawn(listener.run(shutdown_rx));
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(true).unwrap();
        running.await.unwrap().unwrap();

        // Head 100, depth 20: blocks up to 80 are confirmed.
        assert_eq!(*confirmed.blocks.lock().unwrap(), vec![75, 80]);
        assert_eq!(*realtime.blocks.lock().unwrap(), vec![81, 90]);
        assert_eq!(
            repo.get_last_processed_block(Network::Bsc).await.unwrap(),
            Some(80)
        );
    }

    #[tokio::test]
    async fn test_start_block_prefers_the_furthest_point() {
        let mut config = bsc_network();
        let repo = MemoryRepository::with_orders(vec![]);
        let client = chain_with_logs(500, &[]);

        let listener = EventListener::new(&config, client.clone(), Arc::new(MemoryCache::new()), repo.clone());
        assert_eq!(listener.resolve_start_block().await.unwrap(), 490);

        repo.update_last_processed_block(Network::Bsc, 300).await.unwrap();
        assert_eq!(listener.resolve_start_block().await.unwrap(), 301);

        config.start_block = Some(400);
        let listener = EventListener::new(&config, client, Arc::new(MemoryCache::new()), repo);
        assert_eq!(listener.resolve_start_block().await.unwrap(), 400);
    }

    #[tokio::test]
    async fn test_failing_chunk_is_skipped() {
        let mut config = bsc_network();
        config.start_block = Some(1);
        config.confirmation_depth = 0;
        let node = MockNode::new(|method, _| match method {
            "eth_blockNumber" => Ok(json!("0x5")),
            _ => Err("getLogs unavailable".to_string()),
        });
        let client = Arc::new(client(&[node], fast_settings()));
        let repo = MemoryRepository::with_orders(vec![]);

        let mut listener = EventListener::new(&config, client, Arc::new(MemoryCache::new()), repo.clone());
        listener.register(HandlerKind::Confirmed, USDT, Arc::new(RecordingHandler::default()));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let running = tokio::spawn(listener.run(shutdown_rx));
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(true).unwrap();
        running.await.unwrap().unwrap();

        // The cursor still advances past the unreadable range.
        assert_eq!(
            repo.get_last_processed_block(Network::Bsc).await.unwrap(),
            Some(5)
        );
    }
}
