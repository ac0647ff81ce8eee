//! EVM chain access.
//!
//! - [`rpc`]: alloy providers per endpoint and the round-robin client with failover
//! - [`erc20`]: `Transfer` log decoding and ERC-20 call encoding
//! - [`signer`]: legacy transaction signing
//! - [`hd_wallet`]: deterministic deposit/master wallet derivation

pub mod erc20;
pub mod hd_wallet;
pub mod rpc;
pub mod signer;
pub mod types;

pub use alloy::rpc::types::Log;
pub use erc20::{TransferEvent, decode_transfer};
pub use hd_wallet::{DerivedAccount, MnemonicWalletDeriver, WalletDeriver, WalletType};
pub use rpc::{Endpoint, RoundRobinClient, RpcError};
pub use types::{LogPosition, NativeTransferReceipt, TokenTransferReceipt};
