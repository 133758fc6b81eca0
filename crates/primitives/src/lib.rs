//! Primitive types shared by the guardian chain watchers.

pub use chain::{ChainId, Environment};
mod chain;

pub use consistency::ConsistencyLevel;
mod consistency;

pub use guardian_set::GuardianSet;
mod guardian_set;

pub use message::{pad_address, MessagePublication, ObservationRequest};
mod message;

pub mod query;
