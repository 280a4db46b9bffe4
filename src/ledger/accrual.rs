//! Yield Accrual Engine
//!
//! Simple-interest accrual against the protocol's current rate:
//!
//! `delta = principal * apy_bps * elapsed / (10000 * seconds_per_year)`
//!
//! All math is integer and truncates toward zero. Accrual must run before
//! any principal change so yield is never computed against a stale
//! principal.

use alloy_primitives::U256;

use super::UserPosition;
use crate::types::BPS_DENOMINATOR;

#[derive(Debug, Clone, Copy)]
pub struct YieldAccrualEngine {
    seconds_per_year: u64,
}

impl YieldAccrualEngine {
    pub fn new(seconds_per_year: u64) -> Self {
        Self {
            seconds_per_year: seconds_per_year.max(1),
        }
    }

    /// Yield earned by `principal` over `elapsed` seconds at `apy_bps`
    pub fn delta(&self, principal: U256, apy_bps: u32, elapsed: u64) -> U256 {
        if principal.is_zero() || apy_bps == 0 || elapsed == 0 {
            return U256::ZERO;
        }
        let numerator = principal
            .saturating_mul(U256::from(apy_bps))
            .saturating_mul(U256::from(elapsed));
        let denominator = U256::from(BPS_DENOMINATOR) * U256::from(self.seconds_per_year);
        numerator / denominator
    }

    /// Yield accrued since the last update, without mutating the position
    pub fn pending(&self, position: &UserPosition, apy_bps: u32, now: u64) -> U256 {
        if !position.active || position.principal.is_zero() {
            return U256::ZERO;
        }
        let elapsed = now.saturating_sub(position.last_update_time);
        self.delta(position.principal, apy_bps, elapsed)
    }

    /// Fold pending yield into the position and stamp `last_update_time`.
    /// Inactive or empty positions are left untouched.
    pub fn accrue(&self, position: &mut UserPosition, apy_bps: u32, now: u64) -> U256 {
        if !position.active || position.principal.is_zero() {
            return U256::ZERO;
        }
        let delta = self.pending(position, apy_bps, now);
        position.accrued_yield = position.accrued_yield.saturating_add(delta);
        position.last_update_time = now;
        delta
    }
}

/// Scale principal and yield by what remains after withdrawing `amount`
/// from `principal + accrued_yield`. Full precision, proportional: yield is
/// not drained first. Each field truncates by at most one unit.
pub fn proportional_remainder(principal: U256, accrued_yield: U256, amount: U256) -> (U256, U256) {
    let total = principal.saturating_add(accrued_yield);
    if total.is_zero() || amount >= total {
        return (U256::ZERO, U256::ZERO);
    }
    let remaining = total - amount;
    (
        principal.saturating_mul(remaining) / total,
        accrued_yield.saturating_mul(remaining) / total,
    )
}
