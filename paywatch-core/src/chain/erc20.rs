//! ERC-20 ABI: `Transfer` event decoding and call encoding.

use super::types::LogPosition;
use alloy::primitives::{Address, B256, Bytes, U256};
use alloy::rpc::types::Log;
use alloy::sol;
use alloy::sol_types::{SolCall, SolEvent};
use thiserror::Error;

sol! {
    #[derive(Debug, PartialEq, Eq)]
    interface IERC20 {
        event Transfer(address indexed from, address indexed to, uint256 value);

        function balanceOf(address account) external view returns (uint256);
        function decimals() external view returns (uint8);
        function transfer(address to, uint256 amount) external returns (bool);
    }
}

/// Topic 0 of every ERC-20 `Transfer` log.
pub const TRANSFER_TOPIC: B256 = IERC20::Transfer::SIGNATURE_HASH;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("not a Transfer log (topic0 = {0:?})")]
    NotTransfer(Option<B256>),

    #[error("expected 3 topics, got {0}")]
    TopicCount(usize),

    #[error("expected a 32-byte word, got {0} bytes")]
    DataLength(usize),

    #[error("log has no block number or transaction hash")]
    Unmined,
}

/// A decoded `Transfer` log together with its chain position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    pub contract: Address,
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub block_number: u64,
    pub transaction_hash: B256,
    pub log_index: u64,
}

pub fn decode_transfer(log: &Log) -> Result<TransferEvent, DecodeError> {
    let topics = log.topics();
    let topic0 = topics.first().copied();
    if topic0 != Some(TRANSFER_TOPIC) {
        return Err(DecodeError::NotTransfer(topic0));
    }
    if topics.len() != 3 {
        return Err(DecodeError::TopicCount(topics.len()));
    }
    let (Some(block_number), Some(transaction_hash)) = (log.block_number, log.transaction_hash)
    else {
        return Err(DecodeError::Unmined);
    };
    Ok(TransferEvent {
        contract: log.address(),
        from: Address::from_word(topics[1]),
        to: Address::from_word(topics[2]),
        value: decode_word(&log.data().data)?,
        block_number,
        transaction_hash,
        log_index: log.index(),
    })
}

/// First 32-byte word of ABI-encoded data as an unsigned integer.
pub fn decode_word(data: &[u8]) -> Result<U256, DecodeError> {
    if data.len() < 32 {
        return Err(DecodeError::DataLength(data.len()));
    }
    Ok(U256::from_be_slice(&data[..32]))
}

pub fn balance_of_calldata(owner: Address) -> Bytes {
    IERC20::balanceOfCall { account: owner }.abi_encode().into()
}

pub fn decimals_calldata() -> Bytes {
    IERC20::decimalsCall {}.abi_encode().into()
}

pub fn transfer_calldata(to: Address, amount: U256) -> Bytes {
    IERC20::transferCall { to, amount }.abi_encode().into()
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use alloy::primitives::Log as PrimitiveLog;

    /// A mined Transfer log as a node would return it.
    pub fn transfer_log(
        contract: Address,
        from: Address,
        to: Address,
        value: U256,
        block: u64,
        tx: u8,
    ) -> Log {
        Log {
            inner: PrimitiveLog::new_unchecked(
                contract,
                vec![TRANSFER_TOPIC, from.into_word(), to.into_word()],
                Bytes::from(value.to_be_bytes::<32>().to_vec()),
            ),
            block_number: Some(block),
            transaction_hash: Some(B256::repeat_byte(tx)),
            log_index: Some(0),
            ..Default::default()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use alloy::primitives::{LogData, address, hex};

    #[test]
    fn test_transfer_topic_matches_known_hash() {
        assert_eq!(
            TRANSFER_TOPIC,
            B256::from(hex!(
                "ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
            ))
        );
    }

    #[test]
    fn test_decode_transfer() {
        let contract = address!("55d398326f99059fF775485246999027B3197955");
        let from = address!("1111111111111111111111111111111111111111");
        let to = address!("2222222222222222222222222222222222222222");
        let log = fixtures::transfer_log(contract, from, to, U256::from(49_500_000u64), 100, 1);

        let event = decode_transfer(&log).unwrap();
        assert_eq!(event.contract, contract);
        assert_eq!(event.from, from);
        assert_eq!(event.to, to);
        assert_eq!(event.value, U256::from(49_500_000u64));
        assert_eq!(event.block_number, 100);
    }

    #[test]
    fn test_decode_rejects_malformed_logs() {
        let contract = Address::ZERO;
        let base =
            fixtures::transfer_log(contract, Address::ZERO, Address::ZERO, U256::from(1), 1, 1);
        let rebuilt = |topics: Vec<B256>, data: Vec<u8>| {
            let mut log = base.clone();
            log.inner.data = LogData::new_unchecked(topics, Bytes::from(data));
            log
        };
        let word = vec![0u8; 32];

        let log = rebuilt(vec![B256::ZERO, B256::ZERO, B256::ZERO], word.clone());
        assert!(matches!(
            decode_transfer(&log),
            Err(DecodeError::NotTransfer(_))
        ));

        let log = rebuilt(vec![TRANSFER_TOPIC, B256::ZERO], word.clone());
        assert_eq!(decode_transfer(&log), Err(DecodeError::TopicCount(2)));

        let log = rebuilt(vec![TRANSFER_TOPIC, B256::ZERO, B256::ZERO], vec![0u8; 4]);
        assert_eq!(decode_transfer(&log), Err(DecodeError::DataLength(4)));

        let mut pending = base.clone();
        pending.block_number = None;
        assert_eq!(decode_transfer(&pending), Err(DecodeError::Unmined));
    }

    #[test]
    fn test_balance_of_selector() {
        let data = balance_of_calldata(Address::ZERO);
        assert_eq!(&data[..4], &hex!("70a08231"));
        assert_eq!(data.len(), 36);
    }
}
