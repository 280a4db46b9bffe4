//! Position Ledger
//!
//! Per-(user, protocol) positions stored flat in a map keyed by
//! [`PositionKey`]. Every mutating call:
//! 1. validates against the registry,
//! 2. accrues yield on a copy of the position,
//! 3. validates amounts against the accrued copy,
//! 4. writes the position back and adjusts protocol/global TVL.
//!
//! A returned error therefore never leaves a partial write behind.
//!
//! TVL tracks principal only: `protocol.tvl == Σ principal` over the
//! protocol's active positions.

mod accrual;
mod position;

pub use accrual::{proportional_remainder, YieldAccrualEngine};
pub use position::{Harvest, PositionKey, UserPosition, Withdrawal};

use std::collections::HashMap;

use alloy_primitives::{Address, U256};
use tracing::debug;

use crate::error::{VaultError, VaultResult};
use crate::registry::{ProtocolRegistry, ProtocolSelector};
use crate::types::ProtocolId;

pub struct PositionLedger {
    positions: HashMap<PositionKey, UserPosition>,
    accrual: YieldAccrualEngine,
}

impl PositionLedger {
    pub fn new(seconds_per_year: u64) -> Self {
        Self {
            positions: HashMap::new(),
            accrual: YieldAccrualEngine::new(seconds_per_year),
        }
    }

    // ============================================
    // VIEWS
    // ============================================

    pub fn position(&self, user: Address, protocol_id: ProtocolId) -> Option<&UserPosition> {
        self.positions.get(&PositionKey::new(user, protocol_id))
    }

    /// All of a user's positions, ascending by protocol id
    pub fn positions_of(&self, user: Address) -> Vec<(ProtocolId, &UserPosition)> {
        let mut out: Vec<_> = self
            .positions
            .iter()
            .filter(|(key, _)| key.user == user)
            .map(|(key, position)| (key.protocol_id, position))
            .collect();
        out.sort_by_key(|(id, _)| *id);
        out
    }

    /// Sum of principal over active positions in a protocol
    pub fn principal_sum(&self, protocol_id: ProtocolId) -> U256 {
        self.positions
            .iter()
            .filter(|(key, position)| key.protocol_id == protocol_id && position.active)
            .fold(U256::ZERO, |acc, (_, position)| acc.saturating_add(position.principal))
    }

    /// Accrued plus not-yet-folded yield, without mutating anything
    pub fn claimable_yield(
        &self,
        registry: &ProtocolRegistry,
        user: Address,
        protocol_id: ProtocolId,
        now: u64,
    ) -> VaultResult<U256> {
        let apy_bps = registry.protocol(protocol_id)?.apy_bps;
        Ok(self
            .position(user, protocol_id)
            .map(|p| p.accrued_yield.saturating_add(self.accrual.pending(p, apy_bps, now)))
            .unwrap_or(U256::ZERO))
    }

    fn active_copy(&self, key: &PositionKey) -> VaultResult<UserPosition> {
        self.positions
            .get(key)
            .filter(|p| p.active)
            .cloned()
            .ok_or(VaultError::PositionInactive {
                user: key.user,
                protocol_id: key.protocol_id,
            })
    }

    // ============================================
    // ACCRUAL
    // ============================================

    /// Fold pending yield into a position; no-op for inactive/empty ones
    pub fn accrue(
        &mut self,
        registry: &ProtocolRegistry,
        user: Address,
        protocol_id: ProtocolId,
        now: u64,
    ) -> VaultResult<U256> {
        let apy_bps = registry.protocol(protocol_id)?.apy_bps;
        let delta = match self.positions.get_mut(&PositionKey::new(user, protocol_id)) {
            Some(position) => self.accrual.accrue(position, apy_bps, now),
            None => U256::ZERO,
        };
        Ok(delta)
    }

    // ============================================
    // PRINCIPAL MUTATIONS
    // ============================================

    /// Credit `amount` of principal; returns the new principal
    pub fn deploy(
        &mut self,
        registry: &mut ProtocolRegistry,
        user: Address,
        protocol_id: ProtocolId,
        amount: U256,
        now: u64,
    ) -> VaultResult<U256> {
        if user == Address::ZERO {
            return Err(VaultError::ZeroAddress("user"));
        }
        let protocol = registry.protocol(protocol_id)?;
        protocol.check_deposit(amount)?;
        let apy_bps = protocol.apy_bps;

        let key = PositionKey::new(user, protocol_id);
        let position = self.positions.entry(key).or_default();
        if position.active {
            self.accrual.accrue(position, apy_bps, now);
        } else {
            position.activate(now);
        }
        position.principal = position.principal.saturating_add(amount);
        let principal = position.principal;

        registry.credit_tvl(protocol_id, amount)?;
        debug!(
            "Deployed {} to protocol #{} for {:?} (principal {})",
            amount, protocol_id, user, principal
        );
        Ok(principal)
    }

    /// Withdraw `amount` (0 = everything) proportionally from principal and yield
    pub fn withdraw(
        &mut self,
        registry: &mut ProtocolRegistry,
        user: Address,
        protocol_id: ProtocolId,
        amount: U256,
        now: u64,
    ) -> VaultResult<Withdrawal> {
        let apy_bps = registry.protocol(protocol_id)?.apy_bps;
        let key = PositionKey::new(user, protocol_id);
        let mut next = self.active_copy(&key)?;
        self.accrual.accrue(&mut next, apy_bps, now);

        let total = next.total();
        let requested = if amount.is_zero() { total } else { amount };
        if requested.is_zero() {
            return Err(VaultError::ZeroAmount);
        }
        if requested > total {
            return Err(VaultError::InsufficientBalance {
                requested,
                available: total,
            });
        }

        let (old_principal, old_yield) = (next.principal, next.accrued_yield);
        if requested == total {
            next.principal = U256::ZERO;
            next.accrued_yield = U256::ZERO;
        } else {
            let (principal, accrued) = proportional_remainder(old_principal, old_yield, requested);
            next.principal = principal;
            next.accrued_yield = accrued;
        }
        let closed = next.close_if_empty();

        let withdrawal = Withdrawal {
            amount: requested,
            principal_removed: old_principal - next.principal,
            yield_removed: old_yield - next.accrued_yield,
            closed,
        };
        self.positions.insert(key, next);
        registry.debit_tvl(protocol_id, withdrawal.principal_removed)?;

        debug!(
            "Withdrew {} from protocol #{} for {:?} (closed={})",
            requested, protocol_id, user, closed
        );
        Ok(withdrawal)
    }

    /// Zero accrued yield; compound it into principal if the protocol says so
    pub fn harvest(
        &mut self,
        registry: &mut ProtocolRegistry,
        user: Address,
        protocol_id: ProtocolId,
        now: u64,
    ) -> VaultResult<Harvest> {
        let protocol = registry.protocol(protocol_id)?;
        let (apy_bps, compounded) = (protocol.apy_bps, protocol.auto_compound);
        let key = PositionKey::new(user, protocol_id);
        let mut next = self.active_copy(&key)?;
        self.accrual.accrue(&mut next, apy_bps, now);

        if next.accrued_yield.is_zero() {
            return Err(VaultError::NothingToHarvest);
        }

        let amount = next.accrued_yield;
        next.accrued_yield = U256::ZERO;
        next.last_harvest_time = now;
        if compounded {
            next.principal = next.principal.saturating_add(amount);
        }
        self.positions.insert(key, next);
        if compounded {
            registry.credit_tvl(protocol_id, amount)?;
        }

        Ok(Harvest { amount, compounded })
    }

    /// Move `amount` of principal between two protocols for one user
    pub fn rebalance(
        &mut self,
        registry: &mut ProtocolRegistry,
        user: Address,
        from: ProtocolId,
        to: ProtocolId,
        amount: U256,
        now: u64,
    ) -> VaultResult<()> {
        ProtocolSelector::new(registry).check_rebalance(from, to, amount)?;
        let from_apy = registry.protocol(from)?.apy_bps;
        let to_apy = registry.protocol(to)?.apy_bps;

        let from_key = PositionKey::new(user, from);
        let to_key = PositionKey::new(user, to);

        let mut source = self.active_copy(&from_key)?;
        self.accrual.accrue(&mut source, from_apy, now);
        if source.principal < amount {
            return Err(VaultError::InsufficientBalance {
                requested: amount,
                available: source.principal,
            });
        }

        let mut destination = self.positions.get(&to_key).cloned().unwrap_or_default();
        if destination.active {
            self.accrual.accrue(&mut destination, to_apy, now);
        } else {
            destination.activate(now);
        }

        source.principal -= amount;
        source.close_if_empty();
        destination.principal = destination.principal.saturating_add(amount);

        self.positions.insert(from_key, source);
        self.positions.insert(to_key, destination);
        registry.debit_tvl(from, amount)?;
        registry.credit_tvl(to, amount)?;
        Ok(())
    }

    // ============================================
    // COMPENSATION
    // ============================================

    /// Undo an optimistic principal credit; returns what was removed
    pub(crate) fn remove_principal(
        &mut self,
        registry: &mut ProtocolRegistry,
        user: Address,
        protocol_id: ProtocolId,
        amount: U256,
    ) -> VaultResult<U256> {
        let Some(position) = self.positions.get_mut(&PositionKey::new(user, protocol_id)) else {
            return Ok(U256::ZERO);
        };
        if !position.active {
            return Ok(U256::ZERO);
        }
        let removed = amount.min(position.principal);
        position.principal -= removed;
        position.close_if_empty();
        registry.debit_tvl(protocol_id, removed)?;
        Ok(removed)
    }

    /// Put principal and yield back after a failed withdrawal
    pub(crate) fn restore(
        &mut self,
        registry: &mut ProtocolRegistry,
        user: Address,
        protocol_id: ProtocolId,
        principal: U256,
        accrued_yield: U256,
        now: u64,
    ) -> VaultResult<()> {
        let apy_bps = registry.protocol(protocol_id)?.apy_bps;
        let position = self
            .positions
            .entry(PositionKey::new(user, protocol_id))
            .or_default();
        if position.active {
            self.accrual.accrue(position, apy_bps, now);
        } else {
            position.activate(now);
        }
        position.principal = position.principal.saturating_add(principal);
        position.accrued_yield = position.accrued_yield.saturating_add(accrued_yield);
        position.close_if_empty();
        registry.credit_tvl(protocol_id, principal)?;
        Ok(())
    }

    /// Undo a harvest: yield comes back, compounded principal goes away
    pub(crate) fn restore_harvest(
        &mut self,
        registry: &mut ProtocolRegistry,
        user: Address,
        protocol_id: ProtocolId,
        amount: U256,
        compounded: bool,
        now: u64,
    ) -> VaultResult<()> {
        let removed = if compounded {
            self.remove_principal(registry, user, protocol_id, amount)?
        } else {
            U256::ZERO
        };
        // Compounded principal already withdrawn elsewhere is not returned as yield twice
        let returned = if compounded { removed } else { amount };
        self.restore(registry, user, protocol_id, U256::ZERO, returned, now)
    }
}
