//! Roles, pause flag and global parameters

use std::collections::HashSet;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};
use crate::types::{MAX_RETRIES_CAP, MAX_SLIPPAGE_BPS_CAP};

/// Tunables the admin can change at runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineParameters {
    /// Slippage tolerance forwarded to adapters (max 1000 = 10%)
    pub default_slippage_bps: u16,

    /// Recoverable failures tolerated per operation (max 5)
    pub max_retries: u8,
}

impl EngineParameters {
    pub fn validate(&self) -> VaultResult<()> {
        if self.default_slippage_bps > MAX_SLIPPAGE_BPS_CAP {
            return Err(VaultError::InvalidParameter(format!(
                "default_slippage_bps {} exceeds {}",
                self.default_slippage_bps, MAX_SLIPPAGE_BPS_CAP
            )));
        }
        if self.max_retries > MAX_RETRIES_CAP {
            return Err(VaultError::InvalidParameter(format!(
                "max_retries {} exceeds {}",
                self.max_retries, MAX_RETRIES_CAP
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct AccessControl {
    admin: Address,
    emergency_admin: Address,
    gateway: Address,
    authorized_vaults: HashSet<Address>,
    paused: bool,
    params: EngineParameters,
}

impl AccessControl {
    pub fn new(
        admin: Address,
        emergency_admin: Address,
        gateway: Address,
        params: EngineParameters,
    ) -> VaultResult<Self> {
        if admin == Address::ZERO {
            return Err(VaultError::ZeroAddress("admin"));
        }
        if gateway == Address::ZERO {
            return Err(VaultError::ZeroAddress("gateway"));
        }
        params.validate()?;
        Ok(Self {
            admin,
            emergency_admin,
            gateway,
            authorized_vaults: HashSet::new(),
            paused: false,
            params,
        })
    }

    // ========== Guards ==========

    pub fn ensure_admin(&self, caller: Address) -> VaultResult<()> {
        if caller != self.admin {
            return Err(VaultError::Unauthorized(caller));
        }
        Ok(())
    }

    /// Admin or emergency admin
    pub fn ensure_guardian(&self, caller: Address) -> VaultResult<()> {
        let is_emergency = self.emergency_admin != Address::ZERO && caller == self.emergency_admin;
        if caller != self.admin && !is_emergency {
            return Err(VaultError::Unauthorized(caller));
        }
        Ok(())
    }

    pub fn ensure_vault(&self, caller: Address) -> VaultResult<()> {
        if !self.authorized_vaults.contains(&caller) {
            return Err(VaultError::Unauthorized(caller));
        }
        Ok(())
    }

    pub fn ensure_gateway(&self, caller: Address) -> VaultResult<()> {
        if caller != self.gateway {
            return Err(VaultError::Unauthorized(caller));
        }
        Ok(())
    }

    pub fn ensure_not_paused(&self) -> VaultResult<()> {
        if self.paused {
            return Err(VaultError::Paused);
        }
        Ok(())
    }

    // ========== Mutations (callers already checked) ==========

    pub(crate) fn authorize_vault(&mut self, vault: Address) -> VaultResult<bool> {
        if vault == Address::ZERO {
            return Err(VaultError::ZeroAddress("vault"));
        }
        Ok(self.authorized_vaults.insert(vault))
    }

    pub(crate) fn deauthorize_vault(&mut self, vault: Address) -> bool {
        self.authorized_vaults.remove(&vault)
    }

    pub(crate) fn set_parameters(&mut self, params: EngineParameters) -> VaultResult<()> {
        params.validate()?;
        self.params = params;
        Ok(())
    }

    pub(crate) fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub(crate) fn transfer_admin(&mut self, new_admin: Address) -> VaultResult<Address> {
        if new_admin == Address::ZERO {
            return Err(VaultError::ZeroAddress("admin"));
        }
        Ok(std::mem::replace(&mut self.admin, new_admin))
    }

    /// Zero address clears the role
    pub(crate) fn set_emergency_admin(&mut self, emergency_admin: Address) {
        self.emergency_admin = emergency_admin;
    }

    // ========== Views ==========

    pub fn admin(&self) -> Address {
        self.admin
    }

    pub fn emergency_admin(&self) -> Address {
        self.emergency_admin
    }

    pub fn gateway(&self) -> Address {
        self.gateway
    }

    pub fn is_vault(&self, vault: Address) -> bool {
        self.authorized_vaults.contains(&vault)
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn params(&self) -> EngineParameters {
        self.params
    }
}
