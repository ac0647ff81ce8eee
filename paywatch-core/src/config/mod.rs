//! Configuration types for paywatch.
//!
//! These types represent the validated runtime configuration handed to the
//! processors. Loading and parsing the TOML file is handled by the server crate.

mod network;
mod wallet;
mod workers;

#[cfg(test)]
pub(crate) use network::fixtures;
pub use network::{ListenerSettings, NetworkConfig, RpcSettings, TokenConfig};
pub use wallet::WalletSeed;
pub use workers::{
    BalanceRefreshSettings, CatchupSettings, CleanerSettings, PaymentSettings, SweepSettings,
};
