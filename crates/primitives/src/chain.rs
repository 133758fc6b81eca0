use serde::{Deserialize, Serialize};

/// The identifier of a chain on the guardian network.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    derive_more::Display,
    derive_more::From,
    derive_more::Into,
)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
#[serde(transparent)]
pub struct ChainId(pub u16);

impl ChainId {
    /// The Ethereum chain.
    pub const ETHEREUM: Self = Self(2);

    /// Returns the inner value.
    pub const fn as_u16(&self) -> u16 {
        self.0
    }
}

impl TryFrom<u32> for ChainId {
    type Error = core::num::TryFromIntError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(Self(u16::try_from(value)?))
    }
}

/// The network environment the watcher runs in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Production network.
    #[default]
    Mainnet,
    /// Public test network.
    Testnet,
    /// Local development network.
    Devnet,
}

impl Environment {
    /// Returns true if custom consistency levels are honoured by default in this environment.
    pub const fn custom_consistency_by_default(&self) -> bool {
        matches!(self, Self::Testnet | Self::Devnet)
    }
}

impl core::fmt::Display for Environment {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Mainnet => write!(f, "mainnet"),
            Self::Testnet => write!(f, "testnet"),
            Self::Devnet => write!(f, "devnet"),
        }
    }
}
