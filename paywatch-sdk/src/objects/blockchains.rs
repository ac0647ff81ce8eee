use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
/// EVM networks watched by paywatch
pub enum Network {
    #[serde(rename = "BSC")]
    Bsc,
    #[serde(rename = "AVAX C-Chain")]
    AvaxCChain,
    #[serde(rename = "ETH")]
    Ethereum,
}

impl Network {
    pub const ALL: [Network; 3] = [Network::Bsc, Network::AvaxCChain, Network::Ethereum];

    /// The identifier used on the wire, in the database and in cache keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Bsc => "BSC",
            Network::AvaxCChain => "AVAX C-Chain",
            Network::Ethereum => "ETH",
        }
    }

    /// Symbol of the native gas token.
    pub fn native_symbol(&self) -> &'static str {
        match self {
            Network::Bsc => "BNB",
            Network::AvaxCChain => "AVAX",
            Network::Ethereum => "ETH",
        }
    }

    /// Decimals of the native gas token (BNB, AVAX, ETH).
    pub fn native_decimals(&self) -> u8 {
        18
    }

    /// Blocks that must follow a block before its logs count as final.
    pub fn default_confirmation_depth(&self) -> u64 {
        match self {
            Network::Bsc => 20,
            Network::AvaxCChain => 15,
            Network::Ethereum => 15,
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown network: {0}")]
pub struct ParseNetworkError(pub String);

impl FromStr for Network {
    type Err = ParseNetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Network::ALL
            .into_iter()
            .find(|n| n.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseNetworkError(s.to_string()))
    }
}
