//! Webhook payload types for order events.

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

use super::Network;

/// Public representation of a payment order, posted to the order's webhook URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderWebhookPayload {
    pub id: i64,
    pub request_id: String,
    pub network: Network,
    /// Requested amount as a decimal string.
    pub amount: String,
    /// Cumulative credited amount as a decimal string.
    pub transferred: String,
    pub status: OrderStatus,
    pub webhook_url: String,
    pub symbol: CompactString,
    pub block_height: i64,
    pub upcoming_block_height: i64,
    pub payment_address: String,
    /// Unix timestamp (seconds), present once the order succeeded.
    pub succeeded_at: Option<i64>,
    pub created_at: i64,
    /// Unix timestamp (seconds) of the payment deadline.
    pub expired: i64,
}

/// Order status for API responses.
///
/// This is the API/DTO version without sqlx::Type.
/// For database operations, use the version in `paywatch-core::entities`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Pending,
    Processing,
    Partial,
    Success,
    Expired,
    Failed,
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatus::Pending => write!(f, "PENDING"),
            OrderStatus::Processing => write!(f, "PROCESSING"),
            OrderStatus::Partial => write!(f, "PARTIAL"),
            OrderStatus::Success => write!(f, "SUCCESS"),
            OrderStatus::Expired => write!(f, "EXPIRED"),
            OrderStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Kind of an outgoing token movement recorded by the sweep worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferType {
    InternalTransfer,
    Transfer,
    Withdraw,
    Deposit,
}
