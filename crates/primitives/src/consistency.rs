/// The consistency level carried by a published message, decoded from its on-chain byte.
///
/// Values below [`ConsistencyLevel::PUBLISH_IMMEDIATELY`] are interpreted as a number of block
/// confirmations. The special values map to finality-based targets, and
/// [`ConsistencyLevel::Custom`] defers the resolution to the on-chain registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
pub enum ConsistencyLevel {
    /// Publish as soon as the message is observed.
    PublishImmediately,
    /// Wait for the block to be marked safe.
    Safe,
    /// Wait for the block to be finalized.
    Finalized,
    /// Look up the emitter's configuration on the registry contract.
    Custom,
    /// Wait for the given number of confirmations.
    Confirmations(u8),
}

impl ConsistencyLevel {
    /// The byte for [`ConsistencyLevel::PublishImmediately`].
    pub const PUBLISH_IMMEDIATELY: u8 = 200;
    /// The byte for [`ConsistencyLevel::Safe`].
    pub const SAFE: u8 = 201;
    /// The byte for [`ConsistencyLevel::Finalized`].
    pub const FINALIZED: u8 = 202;
    /// The byte for [`ConsistencyLevel::Custom`].
    pub const CUSTOM: u8 = 203;

    /// Returns true if the level is one of the finality-based targets a custom configuration
    /// can resolve to.
    pub const fn is_valid_custom_base(&self) -> bool {
        matches!(self, Self::PublishImmediately | Self::Safe | Self::Finalized)
    }
}

impl From<u8> for ConsistencyLevel {
    fn from(value: u8) -> Self {
        match value {
            Self::PUBLISH_IMMEDIATELY => Self::PublishImmediately,
            Self::SAFE => Self::Safe,
            Self::FINALIZED => Self::Finalized,
            Self::CUSTOM => Self::Custom,
            n => Self::Confirmations(n),
        }
    }
}

impl From<ConsistencyLevel> for u8 {
    fn from(value: ConsistencyLevel) -> Self {
        match value {
            ConsistencyLevel::PublishImmediately => ConsistencyLevel::PUBLISH_IMMEDIATELY,
            ConsistencyLevel::Safe => ConsistencyLevel::SAFE,
            ConsistencyLevel::Finalized => ConsistencyLevel::FINALIZED,
            ConsistencyLevel::Custom => ConsistencyLevel::CUSTOM,
            ConsistencyLevel::Confirmations(n) => n,
        }
    }
}

impl core::fmt::Display for ConsistencyLevel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::PublishImmediately => write!(f, "publish_immediately"),
            Self::Safe => write!(f, "safe"),
            Self::Finalized => write!(f, "finalized"),
            Self::Custom => write!(f, "custom"),
            Self::Confirmations(n) => write!(f, "confirmations({n})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_decode_special_levels() {
        assert_eq!(ConsistencyLevel::from(200), ConsistencyLevel::PublishImmediately);
        assert_eq!(ConsistencyLevel::from(201), ConsistencyLevel::Safe);
        assert_eq!(ConsistencyLevel::from(202), ConsistencyLevel::Finalized);
        assert_eq!(ConsistencyLevel::from(203), ConsistencyLevel::Custom);
        assert_eq!(ConsistencyLevel::from(15), ConsistencyLevel::Confirmations(15));
        assert_eq!(ConsistencyLevel::from(204), ConsistencyLevel::Confirmations(204));
    }

    #[test]
    fn test_should_round_trip_through_byte() {
        for byte in 0..=u8::MAX {
            assert_eq!(u8::from(ConsistencyLevel::from(byte)), byte);
        }
    }
}
