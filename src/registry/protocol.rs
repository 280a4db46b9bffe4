//! Protocol catalogue entry

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};
use crate::types::{DomainId, ProtocolId};

/// A yield protocol reachable on a remote domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Assigned by the registry, starting at 1, never reused
    pub id: ProtocolId,

    /// Adapter contract on the target domain (opaque to the engine)
    pub adapter: Address,

    /// Token the adapter accepts
    pub token: Address,

    /// Domain the protocol lives on
    pub domain: DomainId,

    /// Current APY in basis points (values above 10000 are allowed)
    pub apy_bps: u32,

    /// Sum of active principal attributed to this protocol
    pub tvl: U256,

    pub active: bool,

    pub min_deposit: U256,
    pub max_deposit: U256,

    /// Harvested yield is re-added to principal instead of paid out
    pub auto_compound: bool,

    pub name: String,
}

impl ProtocolConfig {
    /// Reject inactive protocols and amounts outside the capacity bounds
    pub fn check_deposit(&self, amount: U256) -> VaultResult<()> {
        if !self.active {
            return Err(VaultError::ProtocolInactive(self.id));
        }
        if amount.is_zero() {
            return Err(VaultError::ZeroAmount);
        }
        if amount < self.min_deposit || amount > self.max_deposit {
            return Err(VaultError::DepositOutOfBounds {
                amount,
                min: self.min_deposit,
                max: self.max_deposit,
            });
        }
        Ok(())
    }
}

/// Registration request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolParams {
    pub adapter: Address,
    pub token: Address,
    pub domain: DomainId,
    pub apy_bps: u32,
    pub name: String,
    pub min_deposit: U256,
    pub max_deposit: U256,
}

/// Result of an admin update, old and new APY for the audit record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolUpdate {
    pub protocol_id: ProtocolId,
    pub old_apy_bps: u32,
    pub new_apy_bps: u32,
    pub active: bool,
    pub auto_compound: bool,
}
