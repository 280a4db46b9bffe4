//! Shared identifiers, constants and the engine clock
//!
//! Amounts are `U256` base units of the vault asset. Timestamps are unix
//! seconds supplied by a [`Clock`] so tests can drive time explicitly.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

/// Protocol ids are assigned from 1 upward; 0 means "no protocol"
pub type ProtocolId = u64;

/// Execution domain (chain) id; 0 means "any domain" in filters
pub type DomainId = u64;

// ============================================
// CONSTANTS
// ============================================

/// Basis point denominator (10000 = 100%)
pub const BPS_DENOMINATOR: u64 = 10_000;

/// 365 days
pub const DEFAULT_SECONDS_PER_YEAR: u64 = 31_536_000;

/// Hard upper bound for the configurable retry budget
pub const MAX_RETRIES_CAP: u8 = 5;

/// Hard upper bound for the configurable default slippage (10%)
pub const MAX_SLIPPAGE_BPS_CAP: u16 = 1_000;

/// Protocols allowed per domain unless configured otherwise
pub const DEFAULT_MAX_PROTOCOLS_PER_DOMAIN: usize = 10;

// ============================================
// CLOCK
// ============================================

/// Source of "now" for accrual and operation timestamps
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        Utc::now().timestamp().max(0) as u64
    }
}

/// Manually advanced clock for simulations and tests
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    /// Start at the current wall-clock time
    pub fn starting_now() -> Self {
        Self::new(SystemClock.now())
    }

    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }

    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Short form of a 32-byte id for log lines
pub fn short_id(id: &alloy_primitives::B256) -> String {
    format!("0x{}", &hex::encode(id.as_slice())[..10])
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B256;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(1_000);
        clock.advance(500);
        assert_eq!(clock.now(), 1_500);
        clock.set(42);
        assert_eq!(clock.now(), 42);
    }

    #[test]
    fn test_short_id() {
        let id = B256::repeat_byte(0xab);
        assert_eq!(short_id(&id), "0xababababab");
    }
}
