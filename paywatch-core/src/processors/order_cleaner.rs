//! OrderCleaner processor.
//!
//! Moves Pending orders that never saw a payment to Failed once they are
//! `pending_timeout` past their deadline, notifies their merchants, and
//! releases the deposit wallets of expired orders older than the same cutoff.

use crate::config::CleanerSettings;
use crate::entities::{OrderStatus, utc_now};
use crate::events::{WebhookEvent, WebhookEventSender};
use crate::repositories::OrderRepository;
use paywatch_sdk::objects::Network;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanerReport {
    pub failed: usize,
    pub released_wallets: u64,
}

pub struct OrderCleaner {
    network: Network,
    orders: Arc<dyn OrderRepository>,
    webhook_tx: WebhookEventSender,
    settings: CleanerSettings,
}

impl OrderCleaner {
    pub fn new(
        network: Network,
        orders: Arc<dyn OrderRepository>,
        webhook_tx: WebhookEventSender,
        settings: CleanerSettings,
    ) -> Self {
        Self {
            network,
            orders,
            webhook_tx,
            settings,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(network = %self.network, "OrderCleaner started");
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!(network = %self.network, "OrderCleaner received shutdown signal");
                        break;
                    }
                }

                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(report) if report.failed > 0 || report.released_wallets > 0 => {
                            info!(
                                network = %self.network,
                                failed = report.failed,
                                released_wallets = report.released_wallets,
                                "Stale orders cleaned"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => error!(network = %self.network, error = %e, "Order cleanup failed"),
                    }
                }
            }
        }

        info!(network = %self.network, "OrderCleaner shutdown complete");
    }

    pub async fn run_once(&self) -> Result<CleanerReport, sqlx::Error> {
        let cutoff = utc_now() - self.settings.pending_timeout;
        let stale = self.orders.get_stale_pending(self.network, cutoff).await?;

        let mut report = CleanerReport::default();
        if !stale.is_empty() {
            let ids: Vec<i64> = stale.iter().map(|o| o.id).collect();
            let failed: HashSet<i64> = self
                .orders
                .fail_stale_pending(&ids)
                .await?
                .into_iter()
                .collect();
            report.failed = failed.len();

            let payloads: Vec<_> = stale
                .into_iter()
                .filter(|o| failed.contains(&o.id))
                .map(|mut o| {
                    o.status = OrderStatus::Failed;
                    o.webhook_payload()
                })
                .collect();
            if !payloads.is_empty()
                && self
                    .webhook_tx
                    .send(WebhookEvent::OrdersFailed(payloads))
                    .await
                    .is_err()
            {
                warn!(network = %self.network, "Webhook channel closed, dropping failed-order webhooks");
            }
        }

        report.released_wallets = self
            .orders
            .release_expired_wallets(self.network, cutoff)
            .await?;
        Ok(report)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::entities::payment_order::fixtures::order;
    use crate::events::webhook_event_channel;
    use crate::repositories::memory::MemoryRepository;
    use paywatch_sdk::objects::OrderStatus as SdkOrderStatus;
    use rust_decimal::Decimal;
    use std::time::Duration;

    #[tokio::test]
    async fn test_stale_pending_orders_fail() {
        let long_ago = utc_now() - time::Duration::days(2);

        let mut untouched = order(1, "0xa1");
        untouched.expired_time = long_ago;
        let mut partially_paid = order(2, "0xa2");
        partially_paid.expired_time = long_ago;
        partially_paid.transferred = Decimal::from(5);
        let mut expired = order(3, "0xa3");
        expired.expired_time = long_ago;
        expired.status = OrderStatus::Expired;
        let fresh = order(4, "0xa4");

        let repo = MemoryRepository::with_orders(vec![untouched, partially_paid, expired, fresh]);
        let (webhook_tx, mut webhook_rx) = webhook_event_channel();
        let cleaner = OrderCleaner::new(
            Network::Bsc,
            repo.clone(),
            webhook_tx,
            CleanerSettings {
                enabled: true,
                interval: Duration::from_secs(60),
                pending_timeout: Duration::from_secs(24 * 60 * 60),
            },
        );

        let report = cleaner.run_once().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(repo.order(1).status, OrderStatus::Failed);
        assert_eq!(repo.order(2).status, OrderStatus::Pending);
        assert_eq!(repo.order(4).status, OrderStatus::Pending);

        let mut released = repo.state.lock().unwrap().released_wallets.clone();
        released.sort();
        assert_eq!(released, vec![1, 3]);

        let payloads = webhook_rx.recv().await.unwrap().into_payloads();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].id, 1);
        assert_eq!(payloads[0].status, SdkOrderStatus::Failed);
    }
}
