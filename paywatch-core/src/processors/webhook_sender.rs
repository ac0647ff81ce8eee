//! WebhookSender processor.
//!
//! The WebhookSender is responsible for:
//! - Receiving `WebhookEvent` from the queue
//! - POSTing each order snapshot as JSON to the order's webhook URL
//! - Delivering a batch with bounded concurrency
//! - Collecting and logging per-order failures
//!
//! Delivery is best effort: failed webhooks are logged with the order id and
//! not retried here.

use crate::events::{WebhookEvent, WebhookEventReceiver};
use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream;
use paywatch_sdk::objects::OrderWebhookPayload;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Request timeout of one webhook POST.
pub const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur during webhook delivery.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Request(#[from] reqwest::Error),

    /// The order has no webhook URL
    #[error("order {0} has no webhook URL")]
    MissingUrl(i64),

    /// Webhook delivery failed (non-2xx status)
    #[error("webhook delivery failed with status {status}: {body}")]
    DeliveryFailed { status: u16, body: String },
}

/// Sends one order snapshot to its merchant.
#[async_trait]
pub trait WebhookDelivery: Send + Sync {
    async fn deliver(&self, payload: &OrderWebhookPayload) -> Result<(), WebhookError>;
}

/// JSON POST over reqwest.
pub struct HttpWebhookDelivery {
    http_client: reqwest::Client,
}

impl HttpWebhookDelivery {
    pub fn new() -> Self {
        Self {
            http_client: reqwest::Client::builder()
                .timeout(WEBHOOK_TIMEOUT)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }
}

impl Default for HttpWebhookDelivery {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WebhookDelivery for HttpWebhookDelivery {
    async fn deliver(&self, payload: &OrderWebhookPayload) -> Result<(), WebhookError> {
        if payload.webhook_url.is_empty() {
            return Err(WebhookError::MissingUrl(payload.id));
        }
        let response = self
            .http_client
            .post(&payload.webhook_url)
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(WebhookError::DeliveryFailed {
                status: status.as_u16(),
                body,
            })
        }
    }
}

/// WebhookSender handles delivering webhook events to merchant endpoints.
pub struct WebhookSender {
    webhook_rx: WebhookEventReceiver,
    shutdown_rx: watch::Receiver<bool>,
    delivery: Arc<dyn WebhookDelivery>,
    concurrency: usize,
}

impl WebhookSender {
    pub fn new(
        webhook_rx: WebhookEventReceiver,
        shutdown_rx: watch::Receiver<bool>,
        delivery: Arc<dyn WebhookDelivery>,
        concurrency: usize,
    ) -> Self {
        Self {
            webhook_rx,
            shutdown_rx,
            delivery,
            concurrency: concurrency.max(1),
        }
    }

    /// Run the WebhookSender.
    ///
    /// Events already queued when shutdown is signalled are still delivered.
    pub async fn run(mut self) {
        info!("WebhookSender started");

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("WebhookSender received shutdown signal");
                        break;
                    }
                }

                event = self.webhook_rx.recv() => match event {
                    Some(event) => self.process_event(event).await,
                    None => {
                        info!("WebhookEvent channel closed");
                        break;
                    }
                },
            }
        }

        while let Ok(event) = self.webhook_rx.try_recv() {
            self.process_event(event).await;
        }

        info!("WebhookSender shutdown complete");
    }

    async fn process_event(&self, event: WebhookEvent) {
        debug!(count = event.len(), "Received WebhookEvent");
        let payloads = event.into_payloads();
        let total = payloads.len();
        let failures = self.deliver_batch(payloads).await;

        for (order_id, e) in &failures {
            warn!(order_id, error = %e, "Webhook delivery failed");
        }
        if failures.is_empty() {
            debug!(count = total, "Webhooks delivered");
        } else {
            error!(
                failed = failures.len(),
                total,
                order_ids = ?failures.iter().map(|(id, _)| *id).collect::<Vec<_>>(),
                "Some webhooks were not delivered"
            );
        }
    }

    /// Deliver every payload, returning the failures by order id.
    pub async fn deliver_batch(
        &self,
        payloads: Vec<OrderWebhookPayload>,
    ) -> Vec<(i64, WebhookError)> {
        let delivery = &self.delivery;
        stream::iter(payloads)
            .map(|payload| async move {
                delivery
                    .deliver(&payload)
                    .await
                    .err()
                    .map(|e| (payload.id, e))
            })
            .buffer_unordered(self.concurrency)
            .filter_map(|failure| async move { failure })
            .collect()
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::entities::payment_order::fixtures::order;
    use crate::events::webhook_event_channel;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingDelivery {
        delivered: Mutex<Vec<i64>>,
        rejecting: Vec<i64>,
    }

    #[async_trait]
    impl WebhookDelivery for RecordingDelivery {
        async fn deliver(&self, payload: &OrderWebhookPayload) -> Result<(), WebhookError> {
            if self.rejecting.contains(&payload.id) {
                return Err(WebhookError::DeliveryFailed {
                    status: 503,
                    body: "unavailable".to_string(),
                });
            }
            self.delivered.lock().unwrap().push(payload.id);
            Ok(())
        }
    }

    fn payloads(ids: &[i64]) -> Vec<OrderWebhookPayload> {
        ids.iter()
            .map(|id| order(*id, "0xabc").webhook_payload())
            .collect()
    }

    #[tokio::test]
    async fn test_batch_collects_failures() {
        let delivery = Arc::new(RecordingDelivery {
            rejecting: vec![2],
            ..Default::default()
        });
        let (_tx, rx) = webhook_event_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let sender = WebhookSender::new(rx, shutdown_rx, delivery.clone(), 2);

        let failures = sender.deliver_batch(payloads(&[1, 2, 3])).await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, 2);
        assert!(matches!(
            failures[0].1,
            WebhookError::DeliveryFailed { status: 503, .. }
        ));

        let mut delivered = delivery.delivered.lock().unwrap().clone();
        delivered.sort();
        assert_eq!(delivered, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_run_drains_until_channel_closes() {
        let delivery = Arc::new(RecordingDelivery::default());
        let (tx, rx) = webhook_event_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let sender = WebhookSender::new(rx, shutdown_rx, delivery.clone(), 4);

        tx.send(WebhookEvent::OrdersSettled(payloads(&[1, 2])))
            .await
            .unwrap();
        tx.send(WebhookEvent::OrderRecovered(Box::new(
            order(3, "0xabc").webhook_payload(),
        )))
        .await
        .unwrap();
        drop(tx);

        tokio::time::timeout(Duration::from_secs(5), sender.run())
            .await
            .unwrap();
        let mut delivered = delivery.delivered.lock().unwrap().clone();
        delivered.sort();
        assert_eq!(delivered, vec![1, 2, 3]);
    }
}
