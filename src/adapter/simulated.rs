//! In-memory adapter with 1:1 shares and simple-interest yield

use std::collections::HashMap;
use std::sync::Arc;

use alloy_primitives::{Address, U256};

use super::{AdapterError, AdapterInfo, AdapterPosition, YieldAdapter};
use crate::ledger::YieldAccrualEngine;
use crate::types::Clock;

pub struct SimulatedAdapter {
    name: String,
    token: Address,
    apy_bps: u32,
    /// Only caller allowed to mutate positions
    executor: Address,
    clock: Arc<dyn Clock>,
    accrual: YieldAccrualEngine,
    positions: HashMap<Address, AdapterPosition>,
    total_shares: U256,
}

impl SimulatedAdapter {
    pub fn new(
        name: impl Into<String>,
        token: Address,
        apy_bps: u32,
        executor: Address,
        clock: Arc<dyn Clock>,
        seconds_per_year: u64,
    ) -> Self {
        Self {
            name: name.into(),
            token,
            apy_bps,
            executor,
            clock,
            accrual: YieldAccrualEngine::new(seconds_per_year),
            positions: HashMap::new(),
            total_shares: U256::ZERO,
        }
    }

    fn authorize(&self, caller: Address, user: Address) -> Result<(), AdapterError> {
        if caller != self.executor {
            return Err(AdapterError::Unauthorized(caller));
        }
        if user == Address::ZERO {
            return Err(AdapterError::ZeroUser);
        }
        Ok(())
    }

    fn unsettled(&self, position: &AdapterPosition, now: u64) -> U256 {
        let elapsed = now.saturating_sub(position.last_update_time);
        self.accrual.delta(position.shares, self.apy_bps, elapsed)
    }

    /// Fold unsettled yield into the user's position
    fn settle(&mut self, user: Address) -> &mut AdapterPosition {
        let now = self.clock.now();
        let delta = self
            .positions
            .get(&user)
            .map(|p| self.unsettled(p, now))
            .unwrap_or(U256::ZERO);
        let position = self.positions.entry(user).or_insert_with(|| AdapterPosition {
            last_update_time: now,
            ..Default::default()
        });
        position.pending_yield = position.pending_yield.saturating_add(delta);
        position.last_update_time = now;
        position
    }
}

impl YieldAdapter for SimulatedAdapter {
    fn deposit(&mut self, caller: Address, user: Address, amount: U256) -> Result<U256, AdapterError> {
        self.authorize(caller, user)?;
        if amount.is_zero() {
            return Err(AdapterError::ZeroAmount);
        }
        let position = self.settle(user);
        position.shares = position.shares.saturating_add(amount);
        self.total_shares = self.total_shares.saturating_add(amount);
        Ok(amount)
    }

    /// Pays pending yield first, then burns shares
    fn withdraw(&mut self, caller: Address, user: Address, shares: U256) -> Result<U256, AdapterError> {
        self.authorize(caller, user)?;
        if shares.is_zero() {
            return Err(AdapterError::ZeroAmount);
        }
        let position = self.settle(user);
        let available = position.shares.saturating_add(position.pending_yield);
        if shares > available {
            return Err(AdapterError::InsufficientShares {
                requested: shares,
                available,
            });
        }

        let from_yield = shares.min(position.pending_yield);
        let burned = shares - from_yield;
        position.pending_yield -= from_yield;
        position.shares -= burned;
        self.total_shares = self.total_shares.saturating_sub(burned);
        Ok(shares)
    }

    fn harvest_yield(&mut self, caller: Address, user: Address) -> Result<U256, AdapterError> {
        self.authorize(caller, user)?;
        let position = self.settle(user);
        Ok(std::mem::take(&mut position.pending_yield))
    }

    fn compound(&mut self, caller: Address, user: Address) -> Result<U256, AdapterError> {
        self.authorize(caller, user)?;
        let position = self.settle(user);
        let minted = std::mem::take(&mut position.pending_yield);
        position.shares = position.shares.saturating_add(minted);
        self.total_shares = self.total_shares.saturating_add(minted);
        Ok(minted)
    }

    fn protocol_info(&self) -> AdapterInfo {
        AdapterInfo {
            name: self.name.clone(),
            token: self.token,
            apy_bps: self.apy_bps,
            tvl: self.total_shares,
        }
    }

    fn user_position(&self, user: Address) -> AdapterPosition {
        self.positions.get(&user).cloned().unwrap_or_default()
    }

    fn calculate_yield(&self, user: Address) -> U256 {
        let now = self.clock.now();
        self.positions
            .get(&user)
            .map(|p| p.pending_yield.saturating_add(self.unsettled(p, now)))
            .unwrap_or(U256::ZERO)
    }

    fn current_apy(&self) -> u32 {
        self.apy_bps
    }

    fn total_value_locked(&self) -> U256 {
        self.total_shares
    }
}
