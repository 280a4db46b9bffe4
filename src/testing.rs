//! Shared test fixtures

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};

use crate::config::Config;
use crate::coordinator::OperationCoordinator;
use crate::registry::{ProtocolParams, ProtocolRegistry};
use crate::transport::{
    AbortContext, CallContext, OutboundCall, RevertContext, Transport, TransportError,
};
use crate::types::{DomainId, ManualClock, ProtocolId, DEFAULT_MAX_PROTOCOLS_PER_DOMAIN};

pub const BASE: DomainId = 8453;
pub const ARBITRUM: DomainId = 42161;

pub fn settlement_asset(domain: DomainId) -> Address {
    Address::from_word(keccak256(format!("settlement-{}", domain).as_bytes()))
}

/// Adapter address derived from the protocol name
pub fn adapter_for(name: &str) -> Address {
    Address::from_word(keccak256(name.as_bytes()))
}

pub fn protocol_params(domain: DomainId, apy_bps: u32, name: &str) -> ProtocolParams {
    ProtocolParams {
        adapter: adapter_for(name),
        token: Address::repeat_byte(0x70),
        domain,
        apy_bps,
        name: name.to_string(),
        min_deposit: U256::from(1u64),
        max_deposit: U256::from(1_000_000_000_000u64),
    }
}

pub fn registry_with_domains() -> ProtocolRegistry {
    let mut registry = ProtocolRegistry::new(DEFAULT_MAX_PROTOCOLS_PER_DOMAIN);
    registry.set_domain_asset(BASE, settlement_asset(BASE)).unwrap();
    registry
        .set_domain_asset(ARBITRUM, settlement_asset(ARBITRUM))
        .unwrap();
    registry
}

// ============================================
// RECORDING TRANSPORT
// ============================================

/// Keeps every outbound call; can be told to refuse sends
#[derive(Clone, Default)]
pub struct RecordingTransport {
    pub sent: Arc<Mutex<Vec<OutboundCall>>>,
    pub refuse: Arc<AtomicBool>,
}

impl Transport for RecordingTransport {
    fn send(&mut self, call: OutboundCall) -> Result<(), TransportError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected("bridge offline".to_string()));
        }
        self.sent.lock().unwrap().push(call);
        Ok(())
    }
}

// ============================================
// COORDINATOR HARNESS
// ============================================

/// Coordinator with protocol A (500 bps, BASE) and B (800 bps, ARBITRUM)
pub struct Harness {
    pub engine: OperationCoordinator,
    pub clock: Arc<ManualClock>,
    pub transport: RecordingTransport,
    pub config: Config,
    pub a: ProtocolId,
    pub b: ProtocolId,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let clock = Arc::new(ManualClock::new(1_000));
        let transport = RecordingTransport::default();
        let mut engine =
            OperationCoordinator::new(&config, Box::new(transport.clone()), clock.clone()).unwrap();

        let admin = config.admin_address;
        engine
            .set_domain_asset(admin, BASE, settlement_asset(BASE))
            .unwrap();
        engine
            .set_domain_asset(admin, ARBITRUM, settlement_asset(ARBITRUM))
            .unwrap();
        let a = engine
            .register_protocol(admin, protocol_params(BASE, 500, "A"))
            .unwrap();
        let b = engine
            .register_protocol(admin, protocol_params(ARBITRUM, 800, "B"))
            .unwrap();

        Self {
            engine,
            clock,
            transport,
            config,
            a,
            b,
        }
    }

    pub fn admin(&self) -> Address {
        self.config.admin_address
    }

    pub fn vault(&self) -> Address {
        self.config.vault_address
    }

    pub fn gateway(&self) -> Address {
        self.config.gateway_address
    }

    pub fn user() -> Address {
        Address::repeat_byte(0x11)
    }

    pub fn sent(&self) -> Vec<OutboundCall> {
        self.transport.sent.lock().unwrap().clone()
    }

    pub fn last_call(&self) -> OutboundCall {
        self.sent().last().cloned().unwrap()
    }

    pub fn refuse_sends(&self, refuse: bool) {
        self.transport.refuse.store(refuse, Ordering::SeqCst);
    }

    fn payload(&self, id: B256) -> Bytes {
        self.engine.operation(id).unwrap().payload.clone()
    }

    pub fn succeed(&mut self, id: B256) {
        let context = CallContext {
            sender: self.gateway(),
            source_domain: self.engine.operation(id).unwrap().target_domain,
            attempt: self.engine.operation(id).unwrap().attempt(),
        };
        let payload = self.payload(id);
        self.engine
            .on_call(&context, Address::ZERO, U256::ZERO, &payload)
            .unwrap();
    }

    pub fn revert(&mut self, id: B256) {
        let context = RevertContext {
            sender: self.gateway(),
            asset: Address::ZERO,
            amount: U256::ZERO,
            revert_message: self.payload(id),
            reason: "execution reverted".to_string(),
            attempt: self.engine.operation(id).unwrap().attempt(),
        };
        self.engine.on_revert(&context).unwrap();
    }

    pub fn abort(&mut self, id: B256) {
        let context = AbortContext {
            sender: self.gateway(),
            asset: Address::ZERO,
            amount: U256::ZERO,
            revert_message: self.payload(id),
            reason: "slippage exceeded".to_string(),
            attempt: self.engine.operation(id).unwrap().attempt(),
        };
        self.engine.on_abort(&context).unwrap();
    }

    /// Every protocol's tvl matches its active principal
    pub fn assert_tvl_invariant(&self) {
        let registry = self.engine.registry();
        let mut global = U256::ZERO;
        for protocol in registry.protocols() {
            assert_eq!(
                protocol.tvl,
                self.engine.ledger().principal_sum(protocol.id),
                "tvl drift on protocol #{}",
                protocol.id
            );
            global += protocol.tvl;
        }
        assert_eq!(registry.total_value_locked(), global);
    }
}
