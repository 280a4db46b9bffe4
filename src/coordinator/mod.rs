//! Operation Coordinator
//!
//! The saga engine. Every vault request is handled in one synchronous step:
//! 1. Authorization, pause and routing checks (no state touched)
//! 2. Optimistic ledger/registry mutation
//! 3. An [`Operation`] is created `Pending` and dispatched to the transport
//!
//! Callbacks later move the operation through [`saga::advance`] and the
//! coordinator applies the resulting action: finalize, redispatch the same
//! payload, or compensate the optimistic effect.

mod access;
pub mod actor;
mod operation;
pub mod saga;

pub use access::{AccessControl, EngineParameters};
pub use actor::{EngineCommand, EngineHandle};
pub use operation::{
    LedgerEffect, NewOperation, Operation, OperationKind, OperationStatus, StatusChange,
};
pub use saga::{CallbackOutcome, SagaAction, Step};

use std::collections::HashMap;
use std::sync::Arc;

use alloy_primitives::{Address, B256, U256};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{VaultError, VaultResult};
use crate::events::{EventLog, VaultEvent};
use crate::ledger::{Harvest, PositionLedger, UserPosition, Withdrawal};
use crate::registry::{ProtocolParams, ProtocolRegistry, ProtocolSelector, ProtocolUpdate};
use crate::transport::{
    AbortContext, CallContext, OperationMessage, OutboundCall, RevertContext, Transport,
    TransportCallback,
};
use crate::types::{short_id, Clock, DomainId, ProtocolId};

pub struct OperationCoordinator {
    registry: ProtocolRegistry,
    ledger: PositionLedger,
    access: AccessControl,
    operations: HashMap<B256, Operation>,
    /// Operation ids in creation order
    order: Vec<B256>,
    events: EventLog,
    transport: Box<dyn Transport>,
    clock: Arc<dyn Clock>,
    nonce: u64,
    stale_after: u64,
}

impl OperationCoordinator {
    pub fn new(
        config: &Config,
        transport: Box<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> VaultResult<Self> {
        let mut access = AccessControl::new(
            config.admin_address,
            config.emergency_admin_address,
            config.gateway_address,
            config.engine_parameters(),
        )?;
        if config.vault_address != Address::ZERO {
            access.authorize_vault(config.vault_address)?;
        }

        Ok(Self {
            registry: ProtocolRegistry::new(config.max_protocols_per_domain),
            ledger: PositionLedger::new(config.seconds_per_year),
            access,
            operations: HashMap::new(),
            order: Vec::new(),
            events: EventLog::new(config.audit_path()),
            transport,
            clock,
            nonce: 0,
            stale_after: config.stale_operation_secs,
        })
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    fn emit(&mut self, event: VaultEvent) {
        let now = self.clock.now();
        self.events.emit(now, event);
    }

    // ============================================
    // ADMIN SURFACE
    // ============================================

    pub fn set_domain_asset(&mut self, caller: Address, domain: DomainId, asset: Address) -> VaultResult<()> {
        self.access.ensure_admin(caller)?;
        self.registry.set_domain_asset(domain, asset)?;
        self.emit(VaultEvent::DomainAssetSet { domain, asset });
        Ok(())
    }

    pub fn register_protocol(&mut self, caller: Address, params: ProtocolParams) -> VaultResult<ProtocolId> {
        self.access.ensure_admin(caller)?;
        let (name, domain, adapter, apy_bps) =
            (params.name.clone(), params.domain, params.adapter, params.apy_bps);
        let protocol_id = self.registry.register(params)?;
        self.emit(VaultEvent::ProtocolRegistered {
            protocol_id,
            name,
            domain,
            adapter,
            apy_bps,
        });
        Ok(protocol_id)
    }

    pub fn update_protocol(
        &mut self,
        caller: Address,
        protocol_id: ProtocolId,
        apy_bps: u32,
        active: bool,
        auto_compound: bool,
    ) -> VaultResult<ProtocolUpdate> {
        self.access.ensure_admin(caller)?;
        let update = self.registry.update(protocol_id, apy_bps, active, auto_compound)?;
        self.emit(VaultEvent::ProtocolUpdated {
            protocol_id,
            old_apy_bps: update.old_apy_bps,
            new_apy_bps: update.new_apy_bps,
            active,
            auto_compound,
        });
        Ok(update)
    }

    pub fn authorize_vault(&mut self, caller: Address, vault: Address) -> VaultResult<()> {
        self.access.ensure_admin(caller)?;
        if self.access.authorize_vault(vault)? {
            info!("🔑 Vault {:?} authorized", vault);
            self.emit(VaultEvent::VaultAuthorized { vault });
        }
        Ok(())
    }

    pub fn deauthorize_vault(&mut self, caller: Address, vault: Address) -> VaultResult<()> {
        self.access.ensure_admin(caller)?;
        if self.access.deauthorize_vault(vault) {
            info!("🔒 Vault {:?} deauthorized", vault);
            self.emit(VaultEvent::VaultDeauthorized { vault });
        }
        Ok(())
    }

    pub fn set_parameters(&mut self, caller: Address, params: EngineParameters) -> VaultResult<()> {
        self.access.ensure_admin(caller)?;
        self.access.set_parameters(params)?;
        info!(
            "⚙️  Parameters updated: slippage {} bps, max retries {}",
            params.default_slippage_bps, params.max_retries
        );
        self.emit(VaultEvent::ParametersUpdated {
            default_slippage_bps: params.default_slippage_bps,
            max_retries: params.max_retries,
        });
        Ok(())
    }

    pub fn pause(&mut self, caller: Address) -> VaultResult<()> {
        self.access.ensure_guardian(caller)?;
        self.access.set_paused(true);
        warn!("⏸️  Engine paused by {:?}", caller);
        self.emit(VaultEvent::Paused { by: caller });
        Ok(())
    }

    pub fn unpause(&mut self, caller: Address) -> VaultResult<()> {
        self.access.ensure_guardian(caller)?;
        self.access.set_paused(false);
        info!("▶️  Engine unpaused by {:?}", caller);
        self.emit(VaultEvent::Unpaused { by: caller });
        Ok(())
    }

    pub fn transfer_admin(&mut self, caller: Address, new_admin: Address) -> VaultResult<()> {
        self.access.ensure_admin(caller)?;
        let previous = self.access.transfer_admin(new_admin)?;
        info!("👑 Admin transferred {:?} -> {:?}", previous, new_admin);
        self.emit(VaultEvent::AdminTransferred {
            previous,
            new_admin,
        });
        Ok(())
    }

    pub fn set_emergency_admin(&mut self, caller: Address, emergency_admin: Address) -> VaultResult<()> {
        self.access.ensure_admin(caller)?;
        self.access.set_emergency_admin(emergency_admin);
        self.emit(VaultEvent::EmergencyAdminSet { emergency_admin });
        Ok(())
    }

    // ============================================
    // VAULT ENTRY POINTS
    // ============================================

    fn ensure_vault_request(&self, caller: Address, user: Address) -> VaultResult<()> {
        self.access.ensure_vault(caller)?;
        self.access.ensure_not_paused()?;
        if user == Address::ZERO {
            return Err(VaultError::ZeroAddress("user"));
        }
        Ok(())
    }

    /// Target domain of a protocol that exists and can be dispatched to
    fn route(&self, protocol_id: ProtocolId) -> VaultResult<DomainId> {
        let protocol = self.registry.protocol(protocol_id)?;
        if self.registry.settlement_asset(protocol.domain).is_none() {
            return Err(VaultError::UnmappedDomain(protocol.domain));
        }
        Ok(protocol.domain)
    }

    /// Deploy `amount` of `user`'s funds to a protocol
    pub fn deposit(
        &mut self,
        caller: Address,
        user: Address,
        protocol_id: ProtocolId,
        amount: U256,
    ) -> VaultResult<B256> {
        self.ensure_vault_request(caller, user)?;
        let domain = self.route(protocol_id)?;
        let now = self.clock.now();

        let principal = self
            .ledger
            .deploy(&mut self.registry, user, protocol_id, amount, now)?;
        self.emit(VaultEvent::Deployed {
            user,
            protocol_id,
            amount,
            principal,
        });

        self.create_operation(
            NewOperation {
                user,
                protocol_id,
                amount,
                kind: OperationKind::Deposit,
                target_domain: domain,
                effect: LedgerEffect::Credited { amount },
                parent: None,
            },
            false,
        )
    }

    /// Deploy into the best protocol for `domain_filter` (0 = any domain)
    pub fn deposit_best(
        &mut self,
        caller: Address,
        user: Address,
        amount: U256,
        domain_filter: DomainId,
    ) -> VaultResult<(ProtocolId, B256)> {
        self.ensure_vault_request(caller, user)?;
        let protocol_id = self.best_protocol(domain_filter);
        if protocol_id == 0 {
            return Err(VaultError::NoEligibleProtocol(domain_filter));
        }
        let operation_id = self.deposit(caller, user, protocol_id, amount)?;
        Ok((protocol_id, operation_id))
    }

    /// Withdraw `amount` (0 = everything) from a position
    pub fn withdraw(
        &mut self,
        caller: Address,
        user: Address,
        protocol_id: ProtocolId,
        amount: U256,
    ) -> VaultResult<(B256, Withdrawal)> {
        self.ensure_vault_request(caller, user)?;
        self.withdraw_with(OperationKind::Withdraw, user, protocol_id, amount)
    }

    /// Full withdrawal by the admin or emergency admin, allowed while paused
    pub fn emergency_withdraw(
        &mut self,
        caller: Address,
        user: Address,
        protocol_id: ProtocolId,
    ) -> VaultResult<(B256, Withdrawal)> {
        self.access.ensure_guardian(caller)?;
        warn!(
            "🚨 Emergency withdrawal for {:?} from protocol #{} by {:?}",
            user, protocol_id, caller
        );
        self.withdraw_with(OperationKind::Emergency, user, protocol_id, U256::ZERO)
    }

    fn withdraw_with(
        &mut self,
        kind: OperationKind,
        user: Address,
        protocol_id: ProtocolId,
        amount: U256,
    ) -> VaultResult<(B256, Withdrawal)> {
        let domain = self.route(protocol_id)?;
        let now = self.clock.now();

        let withdrawal = self
            .ledger
            .withdraw(&mut self.registry, user, protocol_id, amount, now)?;
        self.emit(VaultEvent::Withdrawn {
            user,
            protocol_id,
            amount: withdrawal.amount,
            principal_removed: withdrawal.principal_removed,
            yield_removed: withdrawal.yield_removed,
            closed: withdrawal.closed,
        });

        let operation_id = self.create_operation(
            NewOperation {
                user,
                protocol_id,
                amount: withdrawal.amount,
                kind,
                target_domain: domain,
                effect: LedgerEffect::Debited {
                    principal: withdrawal.principal_removed,
                    yield_amount: withdrawal.yield_removed,
                },
                parent: None,
            },
            false,
        )?;
        Ok((operation_id, withdrawal))
    }

    /// Harvest accrued yield, compounding when the protocol says so
    pub fn harvest(
        &mut self,
        caller: Address,
        user: Address,
        protocol_id: ProtocolId,
    ) -> VaultResult<(B256, Harvest)> {
        self.ensure_vault_request(caller, user)?;
        let domain = self.route(protocol_id)?;
        let now = self.clock.now();

        let harvest = self
            .ledger
            .harvest(&mut self.registry, user, protocol_id, now)?;
        self.emit(VaultEvent::Harvested {
            user,
            protocol_id,
            amount: harvest.amount,
            compounded: harvest.compounded,
        });

        let operation_id = self.create_operation(
            NewOperation {
                user,
                protocol_id,
                amount: harvest.amount,
                kind: OperationKind::Harvest,
                target_domain: domain,
                effect: LedgerEffect::Harvested {
                    amount: harvest.amount,
                    compounded: harvest.compounded,
                },
                parent: None,
            },
            harvest.compounded,
        )?;
        Ok((operation_id, harvest))
    }

    /// Move principal between protocols. The returned operation is the
    /// withdraw leg on the source; the deposit leg follows on its success.
    pub fn rebalance(
        &mut self,
        caller: Address,
        user: Address,
        from: ProtocolId,
        to: ProtocolId,
        amount: U256,
    ) -> VaultResult<B256> {
        self.ensure_vault_request(caller, user)?;
        let source_domain = self.route(from)?;
        self.route(to)?;
        let now = self.clock.now();

        self.ledger
            .rebalance(&mut self.registry, user, from, to, amount, now)?;
        info!(
            "🔄 Rebalancing {} for {:?}: protocol #{} -> #{}",
            amount, user, from, to
        );
        self.emit(VaultEvent::Rebalanced {
            user,
            from_protocol: from,
            to_protocol: to,
            amount,
        });

        self.create_operation(
            NewOperation {
                user,
                protocol_id: from,
                amount,
                kind: OperationKind::Rebalance,
                target_domain: source_domain,
                effect: LedgerEffect::Moved {
                    to_protocol: to,
                    amount,
                },
                parent: None,
            },
            false,
        )
    }

    /// Fold pending yield into a position without changing principal
    pub fn accrue(&mut self, user: Address, protocol_id: ProtocolId) -> VaultResult<U256> {
        let now = self.clock.now();
        self.ledger.accrue(&self.registry, user, protocol_id, now)
    }

    // ============================================
    // SAGA
    // ============================================

    fn create_operation(&mut self, request: NewOperation, compound: bool) -> VaultResult<B256> {
        let now = self.clock.now();
        let id = Operation::derive_id(
            request.user,
            request.protocol_id,
            request.amount,
            request.kind,
            now,
            self.nonce,
        );
        self.nonce += 1;

        let adapter = self.registry.protocol(request.protocol_id)?.adapter;
        // Unmapped domains are caught again, and failed, by dispatch
        let settlement_asset = self
            .registry
            .settlement_asset(request.target_domain)
            .unwrap_or(Address::ZERO);
        let payload = OperationMessage {
            operation_id: id,
            user: request.user,
            adapter,
            settlement_asset,
            protocol_id: request.protocol_id,
            amount: request.amount,
            kind: request.kind,
            slippage_bps: self.access.params().default_slippage_bps,
            compound,
        }
        .encode();

        let operation = Operation::new(request, payload, id, now);
        info!(
            "📝 Operation {} created: {} {} on protocol #{}",
            short_id(&id),
            operation.kind,
            operation.amount,
            operation.protocol_id
        );
        self.emit(VaultEvent::OperationCreated {
            operation_id: id,
            kind: operation.kind,
            user: operation.user,
            protocol_id: operation.protocol_id,
            amount: operation.amount,
            parent: operation.parent,
        });
        self.operations.insert(id, operation);
        self.order.push(id);

        self.dispatch(id)?;
        Ok(id)
    }

    /// Send a `Pending` operation to the transport.
    /// A refused send fails the operation and compensates it immediately.
    pub fn dispatch(&mut self, id: B256) -> VaultResult<()> {
        let now = self.clock.now();
        let op = self.operation(id)?;

        let Some(settlement_asset) = self.registry.settlement_asset(op.target_domain) else {
            let reason = format!("domain {} has no settlement asset", op.target_domain);
            let step = saga::fail_dispatch(op, reason, now)?;
            return self.apply(step);
        };
        let receiver = self.registry.protocol(op.protocol_id)?.adapter;
        let next = saga::begin_dispatch(op, now)?;

        let call = OutboundCall {
            operation_id: id,
            domain: next.target_domain,
            settlement_asset,
            receiver,
            amount: next.amount,
            payload: next.payload.clone(),
            attempt: next.attempt(),
        };
        let (domain, attempt) = (call.domain, call.attempt);
        self.operations.insert(id, next);

        match self.transport.send(call) {
            Ok(()) => {
                debug!(
                    "📤 Dispatched {} to domain {} (attempt {})",
                    short_id(&id),
                    domain,
                    attempt
                );
                self.emit(VaultEvent::OperationDispatched {
                    operation_id: id,
                    domain,
                    attempt,
                });
                Ok(())
            }
            Err(e) => {
                let refused = VaultError::from(e);
                error!("❌ {} for {}", refused, short_id(&id));
                let step = saga::fail_dispatch(self.operation(id)?, refused.to_string(), now)?;
                self.apply(step)
            }
        }
    }

    pub fn on_success(&mut self, id: B256) -> VaultResult<()> {
        self.advance(id, CallbackOutcome::Success)
    }

    pub fn on_recoverable_failure(&mut self, id: B256, reason: impl Into<String>) -> VaultResult<()> {
        self.advance(
            id,
            CallbackOutcome::Recoverable {
                reason: reason.into(),
            },
        )
    }

    pub fn on_terminal_failure(&mut self, id: B256, reason: impl Into<String>) -> VaultResult<()> {
        self.advance(
            id,
            CallbackOutcome::Terminal {
                reason: reason.into(),
            },
        )
    }

    fn advance(&mut self, id: B256, outcome: CallbackOutcome) -> VaultResult<()> {
        let now = self.clock.now();
        let max_retries = self.access.params().max_retries;
        let step = saga::advance(self.operation(id)?, outcome, max_retries, now)?;
        self.apply(step)
    }

    fn apply(&mut self, step: Step) -> VaultResult<()> {
        let id = step.operation.id;
        let status = step.operation.status;
        let retry_count = step.operation.retry_count;
        let last_error = step.operation.last_error.clone().unwrap_or_default();
        self.operations.insert(id, step.operation);

        match step.action {
            SagaAction::Finalize => {
                info!("✅ Operation {} completed", short_id(&id));
                self.emit(VaultEvent::OperationCompleted { operation_id: id });
                self.finalize(id)
            }
            SagaAction::Redispatch => {
                warn!(
                    "🔁 Operation {} reverted ({}), retry {}",
                    short_id(&id),
                    last_error,
                    retry_count
                );
                self.emit(VaultEvent::OperationRetried {
                    operation_id: id,
                    retry_count,
                    reason: last_error,
                });
                self.dispatch(id)
            }
            SagaAction::Compensate { reason } => {
                if status == OperationStatus::Aborted {
                    error!("🛑 Operation {} aborted: {}", short_id(&id), reason);
                    self.emit(VaultEvent::OperationAborted {
                        operation_id: id,
                        reason,
                    });
                } else {
                    error!(
                        "❌ Operation {} failed after {} retries: {}",
                        short_id(&id),
                        retry_count,
                        reason
                    );
                    self.emit(VaultEvent::OperationFailed {
                        operation_id: id,
                        reason,
                    });
                }
                self.compensate(id)
            }
        }
    }

    /// Success bookkeeping; a completed rebalance withdraw leg issues its
    /// deposit leg on the destination
    fn finalize(&mut self, id: B256) -> VaultResult<()> {
        let op = self.operation(id)?;
        let LedgerEffect::Moved { to_protocol, amount } = op.effect else {
            return Ok(());
        };
        let user = op.user;

        let domain = match self.route(to_protocol) {
            Ok(domain) => domain,
            Err(e) => {
                error!(
                    "Cannot route deposit leg of {} to protocol #{}: {}",
                    short_id(&id),
                    to_protocol,
                    e
                );
                return Err(e);
            }
        };
        let leg = self.create_operation(
            NewOperation {
                user,
                protocol_id: to_protocol,
                amount,
                kind: OperationKind::Deposit,
                target_domain: domain,
                effect: LedgerEffect::Credited { amount },
                parent: Some(id),
            },
            false,
        )?;
        info!(
            "➡️  Rebalance {} continues as deposit leg {}",
            short_id(&id),
            short_id(&leg)
        );
        Ok(())
    }

    /// Reverse the optimistic ledger effect of a failed/aborted operation
    fn compensate(&mut self, id: B256) -> VaultResult<()> {
        let now = self.clock.now();
        let op = self.operation(id)?;
        let (user, protocol_id, effect) = (op.user, op.protocol_id, op.effect.clone());

        match effect {
            LedgerEffect::Credited { amount } => {
                let removed = self
                    .ledger
                    .remove_principal(&mut self.registry, user, protocol_id, amount)?;
                warn!(
                    "💸 Emergency refund of {} to {:?} for {}",
                    removed,
                    user,
                    short_id(&id)
                );
                self.emit(VaultEvent::EmergencyRefund {
                    operation_id: id,
                    user,
                    protocol_id,
                    amount: removed,
                });
            }
            LedgerEffect::Debited {
                principal,
                yield_amount,
            } => {
                self.ledger.restore(
                    &mut self.registry,
                    user,
                    protocol_id,
                    principal,
                    yield_amount,
                    now,
                )?;
                self.emit(VaultEvent::PositionRestored {
                    operation_id: id,
                    user,
                    protocol_id,
                    principal,
                    yield_amount,
                });
            }
            LedgerEffect::Harvested { amount, compounded } => {
                self.ledger.restore_harvest(
                    &mut self.registry,
                    user,
                    protocol_id,
                    amount,
                    compounded,
                    now,
                )?;
                self.emit(VaultEvent::PositionRestored {
                    operation_id: id,
                    user,
                    protocol_id,
                    principal: U256::ZERO,
                    yield_amount: amount,
                });
            }
            LedgerEffect::Moved { to_protocol, amount } => {
                // Only what is still on the destination goes back to the source
                let removed =
                    self.ledger
                        .remove_principal(&mut self.registry, user, to_protocol, amount)?;
                self.ledger
                    .restore(&mut self.registry, user, protocol_id, removed, U256::ZERO, now)?;
                self.emit(VaultEvent::PositionRestored {
                    operation_id: id,
                    user,
                    protocol_id,
                    principal: removed,
                    yield_amount: U256::ZERO,
                });
            }
        }
        debug!("Compensation applied for {}", short_id(&id));
        Ok(())
    }

    // ============================================
    // TRANSPORT CALLBACKS
    // ============================================

    /// Remote execution succeeded
    pub fn on_call(
        &mut self,
        context: &CallContext,
        asset: Address,
        amount: U256,
        message: &[u8],
    ) -> VaultResult<B256> {
        self.access.ensure_gateway(context.sender)?;
        let id = OperationMessage::operation_id(message)?;
        self.ensure_current_attempt(id, context.attempt)?;
        debug!(
            "📥 Success for {} from domain {} ({} of {:?})",
            short_id(&id),
            context.source_domain,
            amount,
            asset
        );
        self.on_success(id)?;
        Ok(id)
    }

    /// Remote execution reverted; retried while the budget lasts
    pub fn on_revert(&mut self, context: &RevertContext) -> VaultResult<B256> {
        self.access.ensure_gateway(context.sender)?;
        let id = OperationMessage::operation_id(&context.revert_message)?;
        self.ensure_current_attempt(id, context.attempt)?;
        self.on_recoverable_failure(id, context.reason.clone())?;
        Ok(id)
    }

    /// Remote execution can never succeed
    pub fn on_abort(&mut self, context: &AbortContext) -> VaultResult<B256> {
        self.access.ensure_gateway(context.sender)?;
        let id = OperationMessage::operation_id(&context.revert_message)?;
        self.ensure_current_attempt(id, context.attempt)?;
        self.on_terminal_failure(id, context.reason.clone())?;
        Ok(id)
    }

    /// Callbacks for an earlier attempt of an in-flight operation are dropped.
    /// Anything else falls through to the saga's own status check.
    fn ensure_current_attempt(&self, id: B256, attempt: u8) -> VaultResult<()> {
        let op = self.operation(id)?;
        if op.status == OperationStatus::InProgress && op.attempt() != attempt {
            return Err(VaultError::StaleAttempt {
                id,
                attempt,
                expected: op.attempt(),
            });
        }
        Ok(())
    }

    pub fn handle_callback(&mut self, callback: &TransportCallback) -> VaultResult<B256> {
        match callback {
            TransportCallback::Call {
                context,
                asset,
                amount,
                message,
            } => self.on_call(context, *asset, *amount, message),
            TransportCallback::Revert(context) => self.on_revert(context),
            TransportCallback::Abort(context) => self.on_abort(context),
        }
    }

    // ============================================
    // QUERIES
    // ============================================

    pub fn registry(&self) -> &ProtocolRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &PositionLedger {
        &self.ledger
    }

    pub fn access(&self) -> &AccessControl {
        &self.access
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn best_protocol(&self, domain_filter: DomainId) -> ProtocolId {
        ProtocolSelector::new(&self.registry).best_protocol(domain_filter)
    }

    pub fn position(&self, user: Address, protocol_id: ProtocolId) -> Option<&UserPosition> {
        self.ledger.position(user, protocol_id)
    }

    pub fn claimable_yield(&self, user: Address, protocol_id: ProtocolId) -> VaultResult<U256> {
        self.ledger
            .claimable_yield(&self.registry, user, protocol_id, self.clock.now())
    }

    pub fn operation(&self, id: B256) -> VaultResult<&Operation> {
        self.operations.get(&id).ok_or(VaultError::UnknownOperation(id))
    }

    /// All operations in creation order
    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.order.iter().filter_map(|id| self.operations.get(id))
    }

    /// Deposit legs issued by a rebalance withdraw leg
    pub fn children_of(&self, parent: B256) -> Vec<&Operation> {
        self.operations()
            .filter(|op| op.parent == Some(parent))
            .collect()
    }

    /// Operations not yet in a terminal status
    pub fn open_operations(&self) -> usize {
        self.operations.values().filter(|op| !op.status.is_terminal()).count()
    }

    /// Operations stuck `InProgress` for at least the stale threshold
    pub fn stale_operations(&self, now: u64) -> Vec<&Operation> {
        self.operations()
            .filter(|op| op.status == OperationStatus::InProgress)
            .filter(|op| {
                op.dispatched_at
                    .is_some_and(|at| now.saturating_sub(at) >= self.stale_after)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{adapter_for, settlement_asset, Harness, ARBITRUM, BASE};
    use crate::types::DEFAULT_SECONDS_PER_YEAR;

    const YEAR: u64 = DEFAULT_SECONDS_PER_YEAR;

    fn units(n: u64) -> U256 {
        U256::from(n)
    }

    fn harness_with_retries(max_retries: u8) -> Harness {
        let mut config = Config::default();
        config.max_retries = max_retries;
        Harness::with_config(config)
    }

    fn has_event(h: &Harness, pred: impl Fn(&VaultEvent) -> bool) -> bool {
        h.engine.events().records().iter().any(|r| pred(&r.event))
    }

    fn status(h: &Harness, id: B256) -> OperationStatus {
        h.engine.operation(id).unwrap().status
    }

    // ========== Requests & dispatch ==========

    #[test]
    fn test_deposit_dispatches_and_credits() {
        let mut h = Harness::new();
        let (vault, user, a) = (h.vault(), Harness::user(), h.a);

        let id = h.engine.deposit(vault, user, a, units(100)).unwrap();

        assert_eq!(status(&h, id), OperationStatus::InProgress);
        let call = h.last_call();
        assert_eq!(call.operation_id, id);
        assert_eq!(call.domain, BASE);
        assert_eq!(call.receiver, adapter_for("A"));
        assert_eq!(call.settlement_asset, settlement_asset(BASE));
        assert_eq!(call.attempt, 1);

        let message = OperationMessage::decode(&call.payload).unwrap();
        assert_eq!(message.operation_id, id);
        assert_eq!(message.kind, OperationKind::Deposit);
        assert_eq!(message.slippage_bps, 50);

        assert_eq!(h.engine.position(user, a).unwrap().principal, units(100));
        h.assert_tvl_invariant();
    }

    #[test]
    fn test_rejected_request_leaves_no_trace() {
        let mut h = Harness::new();
        let (user, a) = (Harness::user(), h.a);

        assert_eq!(
            h.engine.deposit(user, user, a, units(100)),
            Err(VaultError::Unauthorized(user))
        );
        let vault = h.vault();
        assert_eq!(
            h.engine.deposit(vault, user, 99, units(100)),
            Err(VaultError::UnknownProtocol(99))
        );
        assert_eq!(
            h.engine.deposit(vault, Address::ZERO, a, units(100)),
            Err(VaultError::ZeroAddress("user"))
        );

        assert_eq!(h.engine.operations().count(), 0);
        assert!(h.engine.position(user, a).is_none());
        assert!(h.sent().is_empty());
    }

    #[test]
    fn test_deposit_best_picks_highest_apy() {
        let mut h = Harness::new();
        let (vault, user) = (h.vault(), Harness::user());

        let (protocol_id, _) = h.engine.deposit_best(vault, user, units(10), 0).unwrap();
        assert_eq!(protocol_id, h.b);
        let (protocol_id, _) = h.engine.deposit_best(vault, user, units(10), BASE).unwrap();
        assert_eq!(protocol_id, h.a);
        assert_eq!(
            h.engine.deposit_best(vault, user, units(10), 1),
            Err(VaultError::NoEligibleProtocol(1))
        );
    }

    #[test]
    fn test_pause_blocks_requests_but_not_emergency_withdrawal() {
        let mut h = Harness::new();
        let (vault, user, a) = (h.vault(), Harness::user(), h.a);
        let id = h.engine.deposit(vault, user, a, units(100)).unwrap();
        h.succeed(id);

        let guardian = h.config.emergency_admin_address;
        h.engine.pause(guardian).unwrap();
        assert_eq!(
            h.engine.deposit(vault, user, a, units(1)),
            Err(VaultError::Paused)
        );
        assert_eq!(
            h.engine.withdraw(vault, user, a, U256::ZERO),
            Err(VaultError::Paused)
        );
        assert!(matches!(
            h.engine.harvest(vault, user, a),
            Err(VaultError::Paused)
        ));

        let (op, withdrawal) = h.engine.emergency_withdraw(guardian, user, a).unwrap();
        assert!(withdrawal.closed);
        assert_eq!(h.engine.operation(op).unwrap().kind, OperationKind::Emergency);
        assert!(h.engine.emergency_withdraw(vault, user, a).is_err());

        let admin = h.admin();
        h.engine.unpause(admin).unwrap();
        assert!(h.engine.deposit(vault, user, a, units(1)).is_ok());
        h.assert_tvl_invariant();
    }

    // ========== Callbacks ==========

    #[test]
    fn test_success_completes_and_duplicates_are_rejected() {
        let mut h = Harness::new();
        let (vault, user, a) = (h.vault(), Harness::user(), h.a);
        let id = h.engine.deposit(vault, user, a, units(100)).unwrap();

        h.succeed(id);
        assert_eq!(status(&h, id), OperationStatus::Completed);
        assert_eq!(h.engine.open_operations(), 0);

        assert!(matches!(
            h.engine.on_success(id),
            Err(VaultError::InvalidTransition {
                status: OperationStatus::Completed,
                ..
            })
        ));
        assert_eq!(
            h.engine.on_success(B256::repeat_byte(0xff)),
            Err(VaultError::UnknownOperation(B256::repeat_byte(0xff)))
        );
        // Ledger untouched by the rejected callbacks
        assert_eq!(h.engine.position(user, a).unwrap().principal, units(100));
    }

    #[test]
    fn test_callbacks_only_from_gateway() {
        let mut h = Harness::new();
        let (vault, user, a) = (h.vault(), Harness::user(), h.a);
        let id = h.engine.deposit(vault, user, a, units(100)).unwrap();
        let payload = h.engine.operation(id).unwrap().payload.clone();

        let forged = CallContext {
            sender: user,
            source_domain: BASE,
            attempt: 1,
        };
        assert_eq!(
            h.engine.on_call(&forged, Address::ZERO, U256::ZERO, &payload),
            Err(VaultError::Unauthorized(user))
        );

        let context = CallContext {
            sender: h.gateway(),
            source_domain: BASE,
            attempt: 1,
        };
        assert!(matches!(
            h.engine.on_call(&context, Address::ZERO, U256::ZERO, &[1, 2, 3]),
            Err(VaultError::Codec(_))
        ));
        assert_eq!(status(&h, id), OperationStatus::InProgress);
    }

    #[test]
    fn test_deposit_retries_then_refunds() {
        let mut h = harness_with_retries(3);
        let (vault, user, a) = (h.vault(), Harness::user(), h.a);
        let id = h.engine.deposit(vault, user, a, units(100)).unwrap();
        let payload = h.engine.operation(id).unwrap().payload.clone();

        for attempt in 2..=4u8 {
            h.revert(id);
            let op = h.engine.operation(id).unwrap();
            assert_eq!(op.status, OperationStatus::InProgress);
            assert_eq!(op.retry_count, attempt - 1);

            let call = h.last_call();
            assert_eq!(call.operation_id, id);
            assert_eq!(call.attempt, attempt);
            assert_eq!(call.payload, payload);
        }

        h.revert(id);
        let op = h.engine.operation(id).unwrap();
        assert_eq!(op.status, OperationStatus::Failed);
        assert_eq!(op.retry_count, 3);
        assert_eq!(h.sent().len(), 4);

        let position = h.engine.position(user, a).unwrap();
        assert!(!position.active);
        assert_eq!(position.principal, U256::ZERO);
        assert!(has_event(&h, |e| matches!(
            e,
            VaultEvent::EmergencyRefund { operation_id, amount, .. }
                if *operation_id == id && *amount == units(100)
        )));
        h.assert_tvl_invariant();

        // No more retries once failed
        assert!(h.engine.on_recoverable_failure(id, "late").is_err());
        assert_eq!(h.sent().len(), 4);
    }

    #[test]
    fn test_late_callbacks_for_earlier_attempt_are_rejected() {
        let mut h = harness_with_retries(3);
        let (vault, user, a) = (h.vault(), Harness::user(), h.a);
        let id = h.engine.deposit(vault, user, a, units(100)).unwrap();

        let first_revert = RevertContext {
            sender: h.gateway(),
            asset: Address::ZERO,
            amount: U256::ZERO,
            revert_message: h.engine.operation(id).unwrap().payload.clone(),
            reason: "execution reverted".to_string(),
            attempt: 1,
        };
        h.engine.on_revert(&first_revert).unwrap();
        assert_eq!(h.last_call().attempt, 2);

        // Redelivered revert for attempt 1 leaves attempt 2 untouched
        assert_eq!(
            h.engine.on_revert(&first_revert),
            Err(VaultError::StaleAttempt {
                id,
                attempt: 1,
                expected: 2
            })
        );
        let late_success = CallContext {
            sender: h.gateway(),
            source_domain: BASE,
            attempt: 1,
        };
        let payload = h.engine.operation(id).unwrap().payload.clone();
        assert!(matches!(
            h.engine.on_call(&late_success, Address::ZERO, U256::ZERO, &payload),
            Err(VaultError::StaleAttempt { .. })
        ));

        let op = h.engine.operation(id).unwrap();
        assert_eq!(op.status, OperationStatus::InProgress);
        assert_eq!(op.retry_count, 1);
        assert_eq!(h.sent().len(), 2);

        h.succeed(id);
        assert_eq!(status(&h, id), OperationStatus::Completed);
    }

    #[test]
    fn test_abort_compensates_without_retry() {
        let mut h = harness_with_retries(5);
        let (vault, user, a) = (h.vault(), Harness::user(), h.a);
        let id = h.engine.deposit(vault, user, a, units(100)).unwrap();

        h.abort(id);
        assert_eq!(status(&h, id), OperationStatus::Aborted);
        assert_eq!(h.sent().len(), 1);
        assert_eq!(h.engine.registry().protocol(a).unwrap().tvl, U256::ZERO);
        assert!(has_event(&h, |e| matches!(e, VaultEvent::OperationAborted { .. })));
        h.assert_tvl_invariant();
    }

    #[test]
    fn test_transport_refusal_fails_synchronously() {
        let mut h = Harness::new();
        let (vault, user, a) = (h.vault(), Harness::user(), h.a);
        h.refuse_sends(true);

        let id = h.engine.deposit(vault, user, a, units(100)).unwrap();
        let op = h.engine.operation(id).unwrap();
        assert_eq!(op.status, OperationStatus::Failed);
        assert_eq!(op.last_error.as_deref(), Some("transport refused the call: bridge offline"));
        assert!(!h.engine.position(user, a).unwrap().active);
        h.assert_tvl_invariant();
    }

    #[test]
    fn test_refusal_during_retry_compensates() {
        let mut h = harness_with_retries(3);
        let (vault, user, a) = (h.vault(), Harness::user(), h.a);
        let id = h.engine.deposit(vault, user, a, units(100)).unwrap();

        h.refuse_sends(true);
        h.revert(id);
        let op = h.engine.operation(id).unwrap();
        assert_eq!(op.status, OperationStatus::Failed);
        assert_eq!(op.retry_count, 1);
        h.assert_tvl_invariant();
    }

    // ========== Compensation per kind ==========

    #[test]
    fn test_failed_withdrawal_restores_position() {
        let mut h = harness_with_retries(0);
        let (vault, user, a) = (h.vault(), Harness::user(), h.a);
        let id = h.engine.deposit(vault, user, a, units(1_000)).unwrap();
        h.succeed(id);
        h.clock.advance(YEAR);

        let (op, withdrawal) = h.engine.withdraw(vault, user, a, units(525)).unwrap();
        assert_eq!(withdrawal.principal_removed, units(500));
        assert_eq!(withdrawal.yield_removed, units(25));

        h.abort(op);
        let position = h.engine.position(user, a).unwrap();
        assert!(position.active);
        assert_eq!(position.principal, units(1_000));
        assert_eq!(position.accrued_yield, units(50));
        assert!(has_event(&h, |e| matches!(e, VaultEvent::PositionRestored { .. })));
        h.assert_tvl_invariant();
    }

    #[test]
    fn test_failed_compounding_harvest_is_undone() {
        let mut h = harness_with_retries(0);
        let (admin, vault, user, a) = (h.admin(), h.vault(), Harness::user(), h.a);
        h.engine.update_protocol(admin, a, 500, true, true).unwrap();
        let id = h.engine.deposit(vault, user, a, units(100)).unwrap();
        h.succeed(id);
        h.clock.advance(YEAR);

        let (op, harvest) = h.engine.harvest(vault, user, a).unwrap();
        assert!(harvest.compounded);
        assert_eq!(h.engine.position(user, a).unwrap().principal, units(105));
        let message = OperationMessage::decode(&h.last_call().payload).unwrap();
        assert!(message.compound);

        h.revert(op);
        assert_eq!(status(&h, op), OperationStatus::Failed);
        let position = h.engine.position(user, a).unwrap();
        assert_eq!(position.principal, units(100));
        assert_eq!(position.accrued_yield, units(5));
        h.assert_tvl_invariant();
    }

    // ========== Rebalance legs ==========

    #[test]
    fn test_rebalance_success_issues_deposit_leg() {
        let mut h = Harness::new();
        let (vault, user, a, b) = (h.vault(), Harness::user(), h.a, h.b);
        let id = h.engine.deposit(vault, user, a, units(100)).unwrap();
        h.succeed(id);

        let withdraw_leg = h.engine.rebalance(vault, user, a, b, units(50)).unwrap();
        assert_eq!(h.last_call().domain, BASE);
        h.succeed(withdraw_leg);

        let legs = h.engine.children_of(withdraw_leg);
        assert_eq!(legs.len(), 1);
        let deposit_leg = legs[0].id;
        assert_eq!(legs[0].kind, OperationKind::Deposit);
        assert_eq!(legs[0].protocol_id, b);
        assert_eq!(legs[0].parent, Some(withdraw_leg));

        let call = h.last_call();
        assert_eq!(call.operation_id, deposit_leg);
        assert_eq!(call.domain, ARBITRUM);
        assert_eq!(call.receiver, adapter_for("B"));

        // Deposit leg fails for good: destination credit is refunded
        h.abort(deposit_leg);
        assert_eq!(h.engine.position(user, a).unwrap().principal, units(50));
        assert!(!h.engine.position(user, b).unwrap().active);
        assert!(has_event(&h, |e| matches!(
            e,
            VaultEvent::EmergencyRefund { operation_id, .. } if *operation_id == deposit_leg
        )));
        h.assert_tvl_invariant();
    }

    #[test]
    fn test_failed_rebalance_after_destination_withdrawal_conserves_principal() {
        let mut h = Harness::new();
        let (vault, user, a, b) = (h.vault(), Harness::user(), h.a, h.b);
        let id = h.engine.deposit(vault, user, a, units(100)).unwrap();
        h.succeed(id);

        let rebalance = h.engine.rebalance(vault, user, a, b, units(50)).unwrap();
        let (withdrawal, w) = h.engine.withdraw(vault, user, b, U256::ZERO).unwrap();
        assert_eq!(w.principal_removed, units(50));

        // B is already empty, so nothing moves back to A
        h.abort(rebalance);
        assert_eq!(h.engine.position(user, a).unwrap().principal, units(50));
        assert!(has_event(&h, |e| matches!(
            e,
            VaultEvent::PositionRestored { operation_id, principal, .. }
                if *operation_id == rebalance && principal.is_zero()
        )));

        h.abort(withdrawal);
        let principal_a = h.engine.position(user, a).unwrap().principal;
        let principal_b = h.engine.position(user, b).unwrap().principal;
        assert_eq!(principal_b, units(50));
        assert_eq!(principal_a + principal_b, units(100));
        h.assert_tvl_invariant();
    }

    #[test]
    fn test_rebalance_requires_balance() {
        let mut h = Harness::new();
        let (vault, user, a, b) = (h.vault(), Harness::user(), h.a, h.b);
        let id = h.engine.deposit(vault, user, a, units(10)).unwrap();
        h.succeed(id);

        assert!(matches!(
            h.engine.rebalance(vault, user, a, b, units(11)),
            Err(VaultError::InsufficientBalance { .. })
        ));
        assert_eq!(
            h.engine.rebalance(vault, user, a, a, units(1)),
            Err(VaultError::SameProtocol(a))
        );
        assert_eq!(h.engine.operations().count(), 1);
    }

    /// Register A (500) and B (800), deposit, accrue a year, withdraw all,
    /// then rebalance half across and let the withdraw leg exhaust its retry.
    #[test]
    fn test_two_protocol_lifecycle_with_retry_exhaustion() {
        let mut h = harness_with_retries(1);
        let (vault, user, a, b) = (h.vault(), Harness::user(), h.a, h.b);
        assert_eq!(h.engine.best_protocol(0), b);

        let id = h.engine.deposit(vault, user, a, units(100)).unwrap();
        h.succeed(id);
        h.clock.advance(YEAR);
        assert_eq!(h.engine.accrue(user, a).unwrap(), units(5));
        assert_eq!(h.engine.position(user, a).unwrap().accrued_yield, units(5));

        let (op, withdrawal) = h.engine.withdraw(vault, user, a, U256::ZERO).unwrap();
        assert_eq!(withdrawal.amount, units(105));
        assert!(withdrawal.closed);
        let position = h.engine.position(user, a).unwrap();
        assert!(!position.active);
        assert_eq!(position.principal, U256::ZERO);
        assert_eq!(position.accrued_yield, U256::ZERO);
        h.succeed(op);

        let id = h.engine.deposit(vault, user, a, units(100)).unwrap();
        h.succeed(id);

        let rebalance = h.engine.rebalance(vault, user, a, b, units(50)).unwrap();
        assert_eq!(h.engine.registry().protocol(a).unwrap().tvl, units(50));
        assert_eq!(h.engine.position(user, b).unwrap().principal, units(50));
        h.assert_tvl_invariant();

        h.revert(rebalance);
        let op = h.engine.operation(rebalance).unwrap();
        assert_eq!(op.status, OperationStatus::InProgress);
        assert_eq!(op.retry_count, 1);
        assert_eq!(h.last_call().attempt, 2);

        h.revert(rebalance);
        assert_eq!(status(&h, rebalance), OperationStatus::Failed);
        assert_eq!(h.engine.position(user, a).unwrap().principal, units(100));
        assert_eq!(h.engine.registry().protocol(a).unwrap().tvl, units(100));
        assert_eq!(h.engine.registry().protocol(b).unwrap().tvl, U256::ZERO);
        assert!(h.engine.children_of(rebalance).is_empty());
        h.assert_tvl_invariant();
    }

    // ========== Admin & queries ==========

    #[test]
    fn test_admin_surface() {
        let mut h = Harness::new();
        let (admin, vault, a) = (h.admin(), h.vault(), h.a);

        assert_eq!(
            h.engine.update_protocol(vault, a, 1, true, false),
            Err(VaultError::Unauthorized(vault))
        );
        h.engine.update_protocol(admin, a, 650, true, false).unwrap();
        assert!(has_event(&h, |e| matches!(
            e,
            VaultEvent::ProtocolUpdated { old_apy_bps: 500, new_apy_bps: 650, .. }
        )));

        assert!(matches!(
            h.engine.set_parameters(
                admin,
                EngineParameters {
                    default_slippage_bps: 50,
                    max_retries: 6,
                }
            ),
            Err(VaultError::InvalidParameter(_))
        ));

        h.engine.deauthorize_vault(admin, vault).unwrap();
        assert!(!h.engine.access().is_vault(vault));

        let next_admin = Address::repeat_byte(0xbb);
        h.engine.transfer_admin(admin, next_admin).unwrap();
        assert!(h.engine.authorize_vault(admin, vault).is_err());
        h.engine.authorize_vault(next_admin, vault).unwrap();
        assert!(h.engine.access().is_vault(vault));
    }

    #[test]
    fn test_stale_operations_are_reported() {
        let mut h = Harness::new();
        let (vault, user, a) = (h.vault(), Harness::user(), h.a);
        let stale_after = h.config.stale_operation_secs;
        let id = h.engine.deposit(vault, user, a, units(100)).unwrap();
        let dispatched = h.engine.now();

        assert!(h.engine.stale_operations(dispatched + stale_after - 1).is_empty());
        let stale = h.engine.stale_operations(dispatched + stale_after);
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, id);

        h.succeed(id);
        assert!(h.engine.stale_operations(dispatched + stale_after).is_empty());
    }

    #[test]
    fn test_operation_ids_unique_within_one_second() {
        let mut h = Harness::new();
        let (vault, user, a) = (h.vault(), Harness::user(), h.a);
        let first = h.engine.deposit(vault, user, a, units(100)).unwrap();
        let second = h.engine.deposit(vault, user, a, units(100)).unwrap();
        assert_ne!(first, second);
        assert_eq!(h.engine.open_operations(), 2);
    }
}
