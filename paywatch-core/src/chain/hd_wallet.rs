//! Deterministic wallet derivation from the configured mnemonic.
//!
//! Every wallet lives at `m/44'/60'/{index}'/{h(type ++ index)}/{h(salt)}`,
//! where `h` is the first four bytes of SHA-256 read as a big-endian `u32`.
//! Values at or above 2^31 land in the hardened range. The master wallet
//! that collects sweeps is `(ReceivingWallet, 0)`.

use crate::config::WalletSeed;
use alloy::primitives::Address;
use alloy::signers::local::coins_bip39::English;
use alloy::signers::local::{LocalSignerError, MnemonicBuilder, PrivateKeySigner};
use ring::digest;
use std::fmt;
use thiserror::Error;

const HARDENED_OFFSET: u32 = 0x8000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WalletType {
    Payment,
    User,
    Receiving,
}

impl WalletType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletType::Payment => "PaymentWallet",
            WalletType::User => "UserWallet",
            WalletType::Receiving => "ReceivingWallet",
        }
    }
}

impl fmt::Display for WalletType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum DeriveError {
    #[error("wallet index {0} does not fit a hardened path component")]
    IndexOutOfRange(u64),

    #[error("key derivation failed: {0}")]
    Signer(#[from] LocalSignerError),
}

/// A derived key pair.
#[derive(Clone)]
pub struct DerivedAccount {
    pub address: Address,
    pub signer: PrivateKeySigner,
}

impl fmt::Debug for DerivedAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedAccount")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

pub trait WalletDeriver: Send + Sync {
    fn derive(&self, wallet_type: WalletType, index: u64) -> Result<DerivedAccount, DeriveError>;

    /// Destination of every sweep.
    fn master(&self) -> Result<DerivedAccount, DeriveError> {
        self.derive(WalletType::Receiving, 0)
    }
}

/// BIP-39/BIP-32 derivation from a [`WalletSeed`].
#[derive(Debug, Clone)]
pub struct MnemonicWalletDeriver {
    seed: WalletSeed,
}

impl MnemonicWalletDeriver {
    pub fn new(seed: WalletSeed) -> Self {
        Self { seed }
    }
}

impl WalletDeriver for MnemonicWalletDeriver {
    fn derive(&self, wallet_type: WalletType, index: u64) -> Result<DerivedAccount, DeriveError> {
        let path = derivation_path(wallet_type, index, &self.seed.salt)?;
        let signer = MnemonicBuilder::<English>::default()
            .phrase(self.seed.mnemonic.as_str())
            .password(self.seed.passphrase.as_str())
            .derivation_path(path.as_str())?
            .build()?;
        Ok(DerivedAccount {
            address: signer.address(),
            signer,
        })
    }
}

/// First four bytes of SHA-256 of `input`, big-endian.
pub fn hash_to_u32(input: &str) -> u32 {
    let hash = digest::digest(&digest::SHA256, input.as_bytes());
    let bytes = hash.as_ref();
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn path_component(value: u32) -> String {
    if value >= HARDENED_OFFSET {
        format!("{}'", value - HARDENED_OFFSET)
    } else {
        value.to_string()
    }
}

pub fn derivation_path(wallet_type: WalletType, index: u64, salt: &str) -> Result<String, DeriveError> {
    let account = u32::try_from(index)
        .ok()
        .filter(|i| *i < HARDENED_OFFSET)
        .ok_or(DeriveError::IndexOutOfRange(index))?;
    let type_component = hash_to_u32(&format!("{}{}", wallet_type.as_str(), index));
    Ok(format!(
        "m/44'/60'/{account}'/{}/{}",
        path_component(type_component),
        path_component(hash_to_u32(salt)),
    ))
}
