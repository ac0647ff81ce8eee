pub mod block_state;
pub mod payment_event_history;
pub mod payment_order;
pub mod payment_statistics;
pub mod payment_wallet;
pub mod token_transfer_history;

use paywatch_sdk::objects::{
    Network, OrderStatus as SdkOrderStatus, TransferType as SdkTransferType,
};
use time::{OffsetDateTime, PrimitiveDateTime};

/// Network identifier for database operations.
///
/// This is the sqlx::Type version. For API/DTO use, see `paywatch_sdk::objects::Network`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(type_name = "network_type")]
pub enum NetworkType {
    #[sqlx(rename = "BSC")]
    Bsc,
    #[sqlx(rename = "AVAX C-Chain")]
    AvaxCChain,
    #[sqlx(rename = "ETH")]
    Ethereum,
}

impl From<NetworkType> for Network {
    fn from(value: NetworkType) -> Self {
        match value {
            NetworkType::Bsc => Network::Bsc,
            NetworkType::AvaxCChain => Network::AvaxCChain,
            NetworkType::Ethereum => Network::Ethereum,
        }
    }
}

impl From<Network> for NetworkType {
    fn from(value: Network) -> Self {
        match value {
            Network::Bsc => NetworkType::Bsc,
            Network::AvaxCChain => NetworkType::AvaxCChain,
            Network::Ethereum => NetworkType::Ethereum,
        }
    }
}

/// Payment order status for database operations.
///
/// This is the sqlx::Type version. For API/DTO use, see `paywatch_sdk::objects::OrderStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE", type_name = "payment_order_status")]
pub enum OrderStatus {
    Pending,
    Processing,
    Partial,
    Success,
    Expired,
    Failed,
}

impl OrderStatus {
    /// Success, Expired and Failed orders never accept further realtime touches.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Success | OrderStatus::Expired | OrderStatus::Failed
        )
    }
}

impl From<OrderStatus> for SdkOrderStatus {
    fn from(value: OrderStatus) -> Self {
        match value {
            OrderStatus::Pending => SdkOrderStatus::Pending,
            OrderStatus::Processing => SdkOrderStatus::Processing,
            OrderStatus::Partial => SdkOrderStatus::Partial,
            OrderStatus::Success => SdkOrderStatus::Success,
            OrderStatus::Expired => SdkOrderStatus::Expired,
            OrderStatus::Failed => SdkOrderStatus::Failed,
        }
    }
}

impl From<SdkOrderStatus> for OrderStatus {
    fn from(value: SdkOrderStatus) -> Self {
        match value {
            SdkOrderStatus::Pending => OrderStatus::Pending,
            SdkOrderStatus::Processing => OrderStatus::Processing,
            SdkOrderStatus::Partial => OrderStatus::Partial,
            SdkOrderStatus::Success => OrderStatus::Success,
            SdkOrderStatus::Expired => OrderStatus::Expired,
            SdkOrderStatus::Failed => OrderStatus::Failed,
        }
    }
}

/// Token transfer type for database operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE", type_name = "transfer_type")]
pub enum TransferType {
    InternalTransfer,
    Transfer,
    Withdraw,
    Deposit,
}

impl From<TransferType> for SdkTransferType {
    fn from(value: TransferType) -> Self {
        match value {
            TransferType::InternalTransfer => SdkTransferType::InternalTransfer,
            TransferType::Transfer => SdkTransferType::Transfer,
            TransferType::Withdraw => SdkTransferType::Withdraw,
            TransferType::Deposit => SdkTransferType::Deposit,
        }
    }
}

/// Current UTC time without offset, matching the `TIMESTAMP` columns.
pub fn utc_now() -> PrimitiveDateTime {
    let now = OffsetDateTime::now_utc();
    PrimitiveDateTime::new(now.date(), now.time())
}
