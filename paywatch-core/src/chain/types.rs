use alloy::primitives::{B256, U256};
use alloy::rpc::types::Log;

/// Chain position of a log returned by `eth_getLogs`.
///
/// Logs from a mined block always carry both; a missing value reads as zero.
pub trait LogPosition {
    fn block(&self) -> u64;
    fn index(&self) -> u64;
}

impl LogPosition for Log {
    fn block(&self) -> u64 {
        self.block_number.unwrap_or_default()
    }

    fn index(&self) -> u64 {
        self.log_index.unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenTransferReceipt {
    pub tx_hash: B256,
    pub gas_used: u64,
    pub gas_price: U256,
    pub status: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeTransferReceipt {
    pub tx_hash: B256,
    pub gas_used: u64,
    pub gas_price: U256,
}
