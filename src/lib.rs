//! OmniYield - Cross-Chain Yield Vault Orchestration
//!
//! A protocol registry, a per-user position ledger and a saga coordinator
//! that drives every cross-domain vault operation to exactly one terminal
//! state (completed, failed with compensation, or aborted).

pub mod adapter;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod ledger;
pub mod registry;
pub mod transport;
pub mod types;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use coordinator::{EngineHandle, OperationCoordinator};
pub use error::{VaultError, VaultResult};
