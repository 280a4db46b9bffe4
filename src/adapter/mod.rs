//! Protocol Adapters
//!
//! One capability trait for every external yield protocol. The engine
//! never calls adapters directly; the relay executing an operation message
//! on the target domain does.

mod simulated;

pub use simulated::SimulatedAdapter;

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    #[error("zero user")]
    ZeroUser,

    #[error("caller {0} is not the authorized executor")]
    Unauthorized(Address),

    #[error("amount must be greater than zero")]
    ZeroAmount,

    #[error("insufficient shares: requested {requested}, available {available}")]
    InsufficientShares { requested: U256, available: U256 },
}

/// Static description of the protocol behind an adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterInfo {
    pub name: String,
    pub token: Address,
    pub apy_bps: u32,
    pub tvl: U256,
}

/// A user's holdings as the adapter sees them
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterPosition {
    pub shares: U256,
    pub pending_yield: U256,
    pub last_update_time: u64,
}

/// Uniform deposit/withdraw/harvest contract. Mutating calls reject a zero
/// user and any caller other than the authorized executor.
pub trait YieldAdapter: Send {
    fn deposit(&mut self, caller: Address, user: Address, amount: U256) -> Result<U256, AdapterError>;

    fn withdraw(&mut self, caller: Address, user: Address, shares: U256) -> Result<U256, AdapterError>;

    fn harvest_yield(&mut self, caller: Address, user: Address) -> Result<U256, AdapterError>;

    fn compound(&mut self, caller: Address, user: Address) -> Result<U256, AdapterError>;

    // ========== Views ==========

    fn protocol_info(&self) -> AdapterInfo;

    fn user_position(&self, user: Address) -> AdapterPosition;

    fn calculate_yield(&self, user: Address) -> U256;

    fn current_apy(&self) -> u32;

    fn total_value_locked(&self) -> U256;
}
