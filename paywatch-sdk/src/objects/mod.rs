pub mod blockchains;
pub mod webhook;

pub use blockchains::{Network, ParseNetworkError};
pub use webhook::{OrderStatus, OrderWebhookPayload, TransferType};
