//! Event type definitions.
//!
//! Listener events are observability records of one log dispatch. Webhook
//! events carry full order snapshots, since the receiving merchant expects
//! the state at the moment of the transition.

use crate::processors::transfer_matcher::MatchError;
use alloy::primitives::{Address, B256};
use paywatch_sdk::objects::{Network, OrderStatus, OrderWebhookPayload};

/// Which handler registry a log was dispatched through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    /// Finality-gated track; may settle orders.
    Confirmed,
    /// Unconfirmed tail; only marks orders Processing.
    Realtime,
}

impl std::fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandlerKind::Confirmed => write!(f, "confirmed"),
            HandlerKind::Realtime => write!(f, "realtime"),
        }
    }
}

/// What a handler did with one `Transfer` log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// No active order for the recipient and token.
    Unmatched,
    /// The log was already credited to the order.
    Duplicate { order_id: i64 },
    /// The order was found but its settlement state did not change.
    Unchanged { order_id: i64 },
    Updated { order_id: i64, status: OrderStatus },
}

/// Result of dispatching one log, pushed to the listener's dispatch loop.
#[derive(Debug)]
pub struct ListenerEvent {
    pub network: Network,
    pub kind: HandlerKind,
    pub contract: Address,
    pub block_number: u64,
    pub transaction_hash: B256,
    pub log_index: u64,
    pub result: Result<TransferOutcome, MatchError>,
}

/// Orders whose merchants must be notified.
#[derive(Debug, Clone)]
pub enum WebhookEvent {
    /// Evicted from the active-order index as Success or Expired.
    OrdersSettled(Vec<OrderWebhookPayload>),
    /// Settled by the catch-up worker after expiring.
    OrderRecovered(Box<OrderWebhookPayload>),
    /// Stale Pending orders moved to Failed by the order cleaner.
    OrdersFailed(Vec<OrderWebhookPayload>),
}

impl WebhookEvent {
    pub fn into_payloads(self) -> Vec<OrderWebhookPayload> {
        match self {
            WebhookEvent::OrdersSettled(payloads) | WebhookEvent::OrdersFailed(payloads) => {
                payloads
            }
            WebhookEvent::OrderRecovered(payload) => vec![*payload],
        }
    }

    pub fn len(&self) -> usize {
        match self {
            WebhookEvent::OrdersSettled(payloads) | WebhookEvent::OrdersFailed(payloads) => {
                payloads.len()
            }
            WebhookEvent::OrderRecovered(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
