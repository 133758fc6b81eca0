//! Contract bindings used by the EVM chain watcher.

/// Calls to the core and registry contracts.
pub mod calls;

/// Events emitted by the core contract.
pub mod logs;
