use alloy_primitives::Address;

/// A guardian set as read from the core contract.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
pub struct GuardianSet {
    /// The index of the set.
    pub index: u32,
    /// The guardian keys, in order.
    pub keys: Vec<Address>,
}
