//! Simulated Relay
//!
//! Stands in for the cross-domain message router. It drains outbound calls,
//! optionally fails them at random (seeded, reproducible), executes the
//! rest against the registered adapters and reports one callback per
//! attempt back to the engine as the gateway.

use std::collections::HashMap;
use std::time::Duration;

use alloy_primitives::{Address, U256};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{
    AbortContext, CallContext, OperationMessage, OutboundCall, RevertContext, TransportCallback,
};
use crate::adapter::{AdapterError, YieldAdapter};
use crate::config::Config;
use crate::coordinator::{EngineHandle, OperationKind};
use crate::types::short_id;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelayConfig {
    pub revert_probability: f64,
    pub abort_probability: f64,
    pub latency: Duration,
    pub seed: u64,
}

impl RelayConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            revert_probability: config.relay_revert_probability,
            abort_probability: config.relay_abort_probability,
            latency: Duration::from_millis(config.relay_latency_ms),
            seed: config.relay_seed,
        }
    }

    /// Never fails, no latency
    pub fn reliable() -> Self {
        Self {
            revert_probability: 0.0,
            abort_probability: 0.0,
            latency: Duration::ZERO,
            seed: 0,
        }
    }
}

/// Relay statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub delivered: u64,
    pub reverted: u64,
    pub aborted: u64,
}

pub struct SimulatedRelay {
    /// Adapters keyed by their address on the target domain
    adapters: HashMap<Address, Box<dyn YieldAdapter>>,
    /// Identity the relay executes adapter calls as
    executor: Address,
    /// Sender stamped on every callback
    gateway: Address,
    config: RelayConfig,
    rng: StdRng,
    stats: RelayStats,
}

impl SimulatedRelay {
    pub fn new(executor: Address, gateway: Address, config: RelayConfig) -> Self {
        Self {
            adapters: HashMap::new(),
            executor,
            gateway,
            config,
            rng: StdRng::seed_from_u64(config.seed),
            stats: RelayStats::default(),
        }
    }

    pub fn register_adapter(&mut self, address: Address, adapter: Box<dyn YieldAdapter>) {
        self.adapters.insert(address, adapter);
    }

    pub fn adapter(&self, address: Address) -> Option<&dyn YieldAdapter> {
        self.adapters.get(&address).map(|a| a.as_ref())
    }

    pub fn stats(&self) -> RelayStats {
        self.stats
    }

    /// Deliver calls until the transport side closes or the engine stops
    pub async fn run(
        mut self,
        mut calls: mpsc::UnboundedReceiver<OutboundCall>,
        engine: EngineHandle,
    ) -> Self {
        info!("📡 Simulated relay online ({} adapters)", self.adapters.len());
        while let Some(call) = calls.recv().await {
            if !self.config.latency.is_zero() {
                tokio::time::sleep(self.config.latency).await;
            }
            let callback = self.execute(&call);
            if let Err(e) = engine.deliver(callback).await {
                warn!("Relay stopping: {}", e);
                break;
            }
        }
        info!(
            "📡 Relay offline: {} delivered, {} reverted, {} aborted",
            self.stats.delivered, self.stats.reverted, self.stats.aborted
        );
        self
    }

    /// Execute one attempt and build its callback
    pub fn execute(&mut self, call: &OutboundCall) -> TransportCallback {
        let roll: f64 = self.rng.gen();
        if roll < self.config.abort_probability {
            return self.abort(call, "injected abort".to_string());
        }
        if roll < self.config.abort_probability + self.config.revert_probability {
            return self.revert(call, "injected revert".to_string());
        }

        let message = match OperationMessage::decode(&call.payload) {
            Ok(message) => message,
            Err(e) => return self.abort(call, e.to_string()),
        };

        match self.run_adapter(call.receiver, &message) {
            Ok(amount) => {
                self.stats.delivered += 1;
                debug!(
                    "Relay executed {} {} on domain {} (attempt {}) -> {}",
                    message.kind,
                    short_id(&call.operation_id),
                    call.domain,
                    call.attempt,
                    amount
                );
                TransportCallback::Call {
                    context: CallContext {
                        sender: self.gateway,
                        source_domain: call.domain,
                        attempt: call.attempt,
                    },
                    asset: call.settlement_asset,
                    amount,
                    message: call.payload.clone(),
                }
            }
            Err(RelayFailure::Missing) => {
                self.abort(call, format!("no adapter at {:?}", call.receiver))
            }
            Err(RelayFailure::Adapter(e)) => self.revert(call, e.to_string()),
        }
    }

    fn run_adapter(
        &mut self,
        receiver: Address,
        message: &OperationMessage,
    ) -> Result<U256, RelayFailure> {
        let executor = self.executor;
        let adapter = self
            .adapters
            .get_mut(&receiver)
            .ok_or(RelayFailure::Missing)?;
        let user = message.user;

        let amount = match message.kind {
            OperationKind::Deposit => adapter.deposit(executor, user, message.amount)?,
            OperationKind::Withdraw | OperationKind::Emergency | OperationKind::Rebalance => {
                adapter.withdraw(executor, user, message.amount)?
            }
            OperationKind::Harvest if message.compound => adapter.compound(executor, user)?,
            OperationKind::Harvest => adapter.harvest_yield(executor, user)?,
        };
        Ok(amount)
    }

    fn revert(&mut self, call: &OutboundCall, reason: String) -> TransportCallback {
        self.stats.reverted += 1;
        TransportCallback::Revert(RevertContext {
            sender: self.gateway,
            asset: call.settlement_asset,
            amount: call.amount,
            revert_message: call.payload.clone(),
            reason,
            attempt: call.attempt,
        })
    }

    fn abort(&mut self, call: &OutboundCall, reason: String) -> TransportCallback {
        self.stats.aborted += 1;
        TransportCallback::Abort(AbortContext {
            sender: self.gateway,
            asset: call.settlement_asset,
            amount: call.amount,
            revert_message: call.payload.clone(),
            reason,
            attempt: call.attempt,
        })
    }
}

enum RelayFailure {
    Missing,
    Adapter(AdapterError),
}

impl From<AdapterError> for RelayFailure {
    fn from(e: AdapterError) -> Self {
        RelayFailure::Adapter(e)
    }
}
