//! Position and ledger outcome types

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::types::ProtocolId;

/// Composite key: one position per user per protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PositionKey {
    pub user: Address,
    pub protocol_id: ProtocolId,
}

impl PositionKey {
    pub fn new(user: Address, protocol_id: ProtocolId) -> Self {
        Self { user, protocol_id }
    }
}

/// A user's stake in one protocol
///
/// When `active` is false both `principal` and `accrued_yield` are zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPosition {
    pub principal: U256,
    pub accrued_yield: U256,
    pub last_update_time: u64,
    pub last_harvest_time: u64,
    pub active: bool,
}

impl UserPosition {
    pub fn total(&self) -> U256 {
        self.principal.saturating_add(self.accrued_yield)
    }

    pub(crate) fn activate(&mut self, now: u64) {
        self.active = true;
        self.principal = U256::ZERO;
        self.accrued_yield = U256::ZERO;
        self.last_update_time = now;
        self.last_harvest_time = now;
    }

    /// Deactivate once nothing is left
    pub(crate) fn close_if_empty(&mut self) -> bool {
        if self.principal.is_zero() && self.accrued_yield.is_zero() {
            self.active = false;
            return true;
        }
        false
    }
}

/// Result of a withdrawal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdrawal {
    /// Amount paid out to the user
    pub amount: U256,
    pub principal_removed: U256,
    pub yield_removed: U256,
    /// Position was fully withdrawn and deactivated
    pub closed: bool,
}

/// Result of a harvest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Harvest {
    pub amount: U256,
    /// Re-added to principal instead of paid out
    pub compounded: bool,
}
