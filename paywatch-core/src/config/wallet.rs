//! HD wallet seed configuration.

/// Seed material from which every deposit wallet and the master wallet are derived.
#[derive(Clone)]
pub struct WalletSeed {
    /// BIP-39 mnemonic phrase.
    pub mnemonic: String,
    /// Optional BIP-39 passphrase.
    pub passphrase: String,
    /// Mixed into the last derivation path component.
    pub salt: String,
}

impl std::fmt::Debug for WalletSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletSeed")
            .field("mnemonic", &"<redacted>")
            .field("passphrase", &"<redacted>")
            .field("salt", &"<redacted>")
            .finish()
    }
}
