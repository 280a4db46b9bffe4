//! Protocol Registry
//!
//! Owns the protocol catalogue:
//! - Protocols addressed by a stable id (arena indexed by `id - 1`)
//! - Per-domain protocol index with a fixed capacity per domain
//! - Domain -> settlement asset mapping used when dispatching calls
//! - Per-protocol and global TVL counters, maintained incrementally

mod protocol;
mod selector;

pub use protocol::{ProtocolConfig, ProtocolParams, ProtocolUpdate};
pub use selector::ProtocolSelector;

use std::collections::HashMap;

use alloy_primitives::{Address, U256};
use tracing::{debug, info};

use crate::error::{VaultError, VaultResult};
use crate::types::{DomainId, ProtocolId};

pub struct ProtocolRegistry {
    protocols: Vec<ProtocolConfig>,
    by_domain: HashMap<DomainId, Vec<ProtocolId>>,
    domain_assets: HashMap<DomainId, Address>,
    total_value_locked: U256,
    max_per_domain: usize,
}

impl ProtocolRegistry {
    pub fn new(max_per_domain: usize) -> Self {
        Self {
            protocols: Vec::new(),
            by_domain: HashMap::new(),
            domain_assets: HashMap::new(),
            total_value_locked: U256::ZERO,
            max_per_domain,
        }
    }

    // ============================================
    // DOMAIN MAPPING
    // ============================================

    pub fn set_domain_asset(&mut self, domain: DomainId, asset: Address) -> VaultResult<()> {
        if asset == Address::ZERO {
            return Err(VaultError::ZeroAddress("settlement asset"));
        }
        self.domain_assets.insert(domain, asset);
        debug!("Domain {} settles through {:?}", domain, asset);
        Ok(())
    }

    pub fn settlement_asset(&self, domain: DomainId) -> Option<Address> {
        self.domain_assets.get(&domain).copied()
    }

    // ============================================
    // REGISTRATION & UPDATES
    // ============================================

    /// Register a new protocol and return its id
    pub fn register(&mut self, params: ProtocolParams) -> VaultResult<ProtocolId> {
        if params.adapter == Address::ZERO {
            return Err(VaultError::ZeroAddress("adapter"));
        }
        if params.token == Address::ZERO {
            return Err(VaultError::ZeroAddress("token"));
        }
        if !self.domain_assets.contains_key(&params.domain) {
            return Err(VaultError::UnmappedDomain(params.domain));
        }
        if params.min_deposit > params.max_deposit {
            return Err(VaultError::InvalidBounds {
                min: params.min_deposit,
                max: params.max_deposit,
            });
        }
        let on_domain = self.by_domain.get(&params.domain).map_or(0, Vec::len);
        if on_domain >= self.max_per_domain {
            return Err(VaultError::DomainFull {
                domain: params.domain,
                max: self.max_per_domain,
            });
        }

        let id = self.protocols.len() as ProtocolId + 1;
        self.protocols.push(ProtocolConfig {
            id,
            adapter: params.adapter,
            token: params.token,
            domain: params.domain,
            apy_bps: params.apy_bps,
            tvl: U256::ZERO,
            active: true,
            min_deposit: params.min_deposit,
            max_deposit: params.max_deposit,
            auto_compound: false,
            name: params.name,
        });
        self.by_domain.entry(params.domain).or_default().push(id);

        info!(
            "Registered protocol #{} '{}' on domain {} ({} bps)",
            id, self.protocols[id as usize - 1].name, params.domain, params.apy_bps
        );
        Ok(id)
    }

    /// Admin update of rate and flags
    pub fn update(
        &mut self,
        protocol_id: ProtocolId,
        apy_bps: u32,
        active: bool,
        auto_compound: bool,
    ) -> VaultResult<ProtocolUpdate> {
        let protocol = self.protocol_mut(protocol_id)?;
        let old_apy_bps = protocol.apy_bps;
        protocol.apy_bps = apy_bps;
        protocol.active = active;
        protocol.auto_compound = auto_compound;

        info!(
            "Updated protocol #{}: {} -> {} bps, active={}, auto_compound={}",
            protocol_id, old_apy_bps, apy_bps, active, auto_compound
        );
        Ok(ProtocolUpdate {
            protocol_id,
            old_apy_bps,
            new_apy_bps: apy_bps,
            active,
            auto_compound,
        })
    }

    // ============================================
    // LOOKUPS
    // ============================================

    pub fn protocol(&self, protocol_id: ProtocolId) -> VaultResult<&ProtocolConfig> {
        protocol_id
            .checked_sub(1)
            .and_then(|idx| self.protocols.get(idx as usize))
            .ok_or(VaultError::UnknownProtocol(protocol_id))
    }

    fn protocol_mut(&mut self, protocol_id: ProtocolId) -> VaultResult<&mut ProtocolConfig> {
        protocol_id
            .checked_sub(1)
            .and_then(|idx| self.protocols.get_mut(idx as usize))
            .ok_or(VaultError::UnknownProtocol(protocol_id))
    }

    /// Active protocol or a validation error
    pub fn active_protocol(&self, protocol_id: ProtocolId) -> VaultResult<&ProtocolConfig> {
        let protocol = self.protocol(protocol_id)?;
        if !protocol.active {
            return Err(VaultError::ProtocolInactive(protocol_id));
        }
        Ok(protocol)
    }

    /// All protocols in ascending id order
    pub fn protocols(&self) -> &[ProtocolConfig] {
        &self.protocols
    }

    pub fn protocols_on_domain(&self, domain: DomainId) -> &[ProtocolId] {
        self.by_domain
            .get(&domain)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn count(&self) -> usize {
        self.protocols.len()
    }

    pub fn total_value_locked(&self) -> U256 {
        self.total_value_locked
    }

    // ============================================
    // TVL ACCOUNTING
    // ============================================

    pub(crate) fn credit_tvl(&mut self, protocol_id: ProtocolId, amount: U256) -> VaultResult<()> {
        let protocol = self.protocol_mut(protocol_id)?;
        protocol.tvl = protocol.tvl.saturating_add(amount);
        self.total_value_locked = self.total_value_locked.saturating_add(amount);
        Ok(())
    }

    /// Reduce TVL by `amount`, floored at zero; returns what was removed
    pub(crate) fn debit_tvl(&mut self, protocol_id: ProtocolId, amount: U256) -> VaultResult<U256> {
        let protocol = self.protocol_mut(protocol_id)?;
        let removed = amount.min(protocol.tvl);
        protocol.tvl -= removed;
        self.total_value_locked = self.total_value_locked.saturating_sub(removed);
        Ok(removed)
    }
}
