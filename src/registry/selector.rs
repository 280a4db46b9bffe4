//! Protocol Selector
//!
//! Picks the protocol new funds should go to and validates rebalance moves.
//! The scan is linear over the whole registry in ascending id order, so the
//! result is deterministic: strict `>` comparison keeps the first of equal
//! APYs.

use alloy_primitives::U256;

use super::{ProtocolConfig, ProtocolRegistry};
use crate::error::{VaultError, VaultResult};
use crate::types::{DomainId, ProtocolId};

pub struct ProtocolSelector<'a> {
    registry: &'a ProtocolRegistry,
}

impl<'a> ProtocolSelector<'a> {
    pub fn new(registry: &'a ProtocolRegistry) -> Self {
        Self { registry }
    }

    fn is_candidate(protocol: &ProtocolConfig, domain_filter: DomainId) -> bool {
        protocol.active && (domain_filter == 0 || protocol.domain == domain_filter)
    }

    /// Highest-APY active protocol, optionally restricted to one domain.
    /// Returns 0 when nothing qualifies.
    pub fn best_protocol(&self, domain_filter: DomainId) -> ProtocolId {
        let mut best: Option<&ProtocolConfig> = None;

        for protocol in self.registry.protocols() {
            if !Self::is_candidate(protocol, domain_filter) {
                continue;
            }
            match best {
                Some(current) if protocol.apy_bps <= current.apy_bps => {}
                _ => best = Some(protocol),
            }
        }

        best.map_or(0, |p| p.id)
    }

    /// Candidates sorted best first (ties by ascending id)
    pub fn ranked(&self, domain_filter: DomainId) -> Vec<&'a ProtocolConfig> {
        let mut candidates: Vec<_> = self
            .registry
            .protocols()
            .iter()
            .filter(|p| Self::is_candidate(p, domain_filter))
            .collect();
        candidates.sort_by(|a, b| b.apy_bps.cmp(&a.apy_bps).then(a.id.cmp(&b.id)));
        candidates
    }

    /// APY gain in bps of moving from `from` to the best protocol, if positive
    pub fn rebalance_gain(&self, from: ProtocolId, domain_filter: DomainId) -> Option<(ProtocolId, u32)> {
        let current = self.registry.protocol(from).ok()?;
        let best = self.best_protocol(domain_filter);
        if best == 0 || best == from {
            return None;
        }
        let target = self.registry.protocol(best).ok()?;
        target
            .apy_bps
            .checked_sub(current.apy_bps)
            .filter(|gain| *gain > 0)
            .map(|gain| (best, gain))
    }

    /// Protocol-level checks for a rebalance; position checks live in the ledger
    pub fn check_rebalance(&self, from: ProtocolId, to: ProtocolId, amount: U256) -> VaultResult<()> {
        if from == to {
            return Err(VaultError::SameProtocol(from));
        }
        if amount.is_zero() {
            return Err(VaultError::ZeroAmount);
        }
        self.registry.active_protocol(from)?;
        self.registry.active_protocol(to)?;
        Ok(())
    }
}
