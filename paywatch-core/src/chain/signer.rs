//! Offline signing of legacy (EIP-155) transactions.

use super::rpc::RpcError;
use alloy::consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy::eips::eip2718::Encodable2718;
use alloy::primitives::{Address, Bytes, TxKind, U256};
use alloy::signers::SignerSync;
use alloy::signers::local::PrivateKeySigner;

/// Fields of a legacy transaction before signing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTx {
    pub chain_id: u64,
    pub nonce: u64,
    pub gas_price: U256,
    pub gas_limit: u64,
    pub to: Address,
    pub value: U256,
    pub input: Bytes,
}

/// Sign `tx` and return the raw bytes for `eth_sendRawTransaction`.
pub fn sign_legacy(signer: &PrivateKeySigner, tx: LegacyTx) -> Result<Bytes, RpcError> {
    let gas_price = u128::try_from(tx.gas_price)
        .map_err(|_| RpcError::Signing(format!("gas price {} exceeds u128", tx.gas_price)))?;
    let unsigned = TxLegacy {
        chain_id: Some(tx.chain_id),
        nonce: tx.nonce,
        gas_price,
        gas_limit: tx.gas_limit,
        to: TxKind::Call(tx.to),
        value: tx.value,
        input: tx.input,
    };
    let signature = signer
        .sign_hash_sync(&unsigned.signature_hash())
        .map_err(|e| RpcError::Signing(e.to_string()))?;
    let envelope = TxEnvelope::from(unsigned.into_signed(signature));
    Ok(envelope.encoded_2718().into())
}
