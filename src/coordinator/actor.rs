//! Engine Actor
//!
//! A single tokio task owns the [`OperationCoordinator`]. Vault requests and
//! transport callbacks both arrive on one bounded channel, so every command
//! is applied atomically and in arrival order. Requests get their result
//! back on a oneshot; callbacks are fire-and-forget.
//!
//! The task also sweeps for operations stuck `InProgress` and logs them.

use std::time::Duration;

use alloy_primitives::{Address, B256, U256};
use eyre::{eyre, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::OperationCoordinator;
use crate::ledger::{Harvest, UserPosition, Withdrawal};
use crate::transport::TransportCallback;
use crate::types::{short_id, DomainId, ProtocolId};

type Job = Box<dyn FnOnce(&mut OperationCoordinator) + Send>;

pub enum EngineCommand {
    /// Run a closure against the coordinator
    Exec(Job),
    /// Deliver a transport callback
    Callback(TransportCallback),
    /// Stop the task and hand the coordinator back
    Shutdown,
}

/// Cloneable handle to the engine task
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    /// Run `f` inside the engine task and wait for its result
    pub async fn call<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut OperationCoordinator) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move |engine| {
            let _ = reply_tx.send(f(engine));
        });
        self.tx
            .send(EngineCommand::Exec(job))
            .await
            .map_err(|_| eyre!("engine task has stopped"))?;
        reply_rx
            .await
            .map_err(|_| eyre!("engine task dropped the reply"))
    }

    /// Queue a transport callback
    pub async fn deliver(&self, callback: TransportCallback) -> Result<()> {
        self.tx
            .send(EngineCommand::Callback(callback))
            .await
            .map_err(|_| eyre!("engine task has stopped"))
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.tx
            .send(EngineCommand::Shutdown)
            .await
            .map_err(|_| eyre!("engine task has stopped"))
    }

    // ========== Typed requests ==========

    pub async fn deposit(
        &self,
        caller: Address,
        user: Address,
        protocol_id: ProtocolId,
        amount: U256,
    ) -> Result<B256> {
        Ok(self
            .call(move |e| e.deposit(caller, user, protocol_id, amount))
            .await??)
    }

    pub async fn deposit_best(
        &self,
        caller: Address,
        user: Address,
        amount: U256,
        domain_filter: DomainId,
    ) -> Result<(ProtocolId, B256)> {
        Ok(self
            .call(move |e| e.deposit_best(caller, user, amount, domain_filter))
            .await??)
    }

    pub async fn withdraw(
        &self,
        caller: Address,
        user: Address,
        protocol_id: ProtocolId,
        amount: U256,
    ) -> Result<(B256, Withdrawal)> {
        Ok(self
            .call(move |e| e.withdraw(caller, user, protocol_id, amount))
            .await??)
    }

    pub async fn harvest(
        &self,
        caller: Address,
        user: Address,
        protocol_id: ProtocolId,
    ) -> Result<(B256, Harvest)> {
        Ok(self
            .call(move |e| e.harvest(caller, user, protocol_id))
            .await??)
    }

    pub async fn rebalance(
        &self,
        caller: Address,
        user: Address,
        from: ProtocolId,
        to: ProtocolId,
        amount: U256,
    ) -> Result<B256> {
        Ok(self
            .call(move |e| e.rebalance(caller, user, from, to, amount))
            .await??)
    }

    pub async fn position(&self, user: Address, protocol_id: ProtocolId) -> Result<Option<UserPosition>> {
        self.call(move |e| e.position(user, protocol_id).cloned()).await
    }

    pub async fn open_operations(&self) -> Result<usize> {
        self.call(|e| e.open_operations()).await
    }
}

/// Start the engine task
pub fn spawn(
    engine: OperationCoordinator,
    capacity: usize,
    sweep_every: Duration,
) -> (EngineHandle, JoinHandle<OperationCoordinator>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let sweep_every = sweep_every.max(Duration::from_millis(10));
    let task = tokio::spawn(run(engine, rx, sweep_every));
    (EngineHandle { tx }, task)
}

async fn run(
    mut engine: OperationCoordinator,
    mut rx: mpsc::Receiver<EngineCommand>,
    sweep_every: Duration,
) -> OperationCoordinator {
    info!("🚀 Engine task started");
    let mut sweep = interval(sweep_every);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(EngineCommand::Exec(job)) => job(&mut engine),
                Some(EngineCommand::Callback(callback)) => {
                    match engine.handle_callback(&callback) {
                        Ok(id) => debug!("Callback applied to {}", short_id(&id)),
                        Err(e) => warn!("⚠️  Rejected callback: {}", e),
                    }
                }
                Some(EngineCommand::Shutdown) | None => break,
            },
            _ = sweep.tick() => {
                let now = engine.now();
                for op in engine.stale_operations(now) {
                    warn!(
                        "⏳ Operation {} ({}) in flight for {}s",
                        short_id(&op.id),
                        op.kind,
                        now.saturating_sub(op.dispatched_at.unwrap_or(now))
                    );
                }
            }
        }
    }

    info!("🛑 Engine task stopped ({} open operations)", engine.open_operations());
    engine
}
