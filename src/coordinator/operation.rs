//! Operation records
//!
//! One [`Operation`] per logical remote action. The id is derived once at
//! creation and kept across retries; the attempt number travels with each
//! outbound call instead.

use std::fmt;

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_sol_types::SolValue;
use serde::{Deserialize, Serialize};

use crate::types::{DomainId, ProtocolId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Deposit,
    Withdraw,
    Harvest,
    Rebalance,
    Emergency,
}

impl OperationKind {
    /// Wire discriminant used in operation messages and id derivation
    pub fn as_u8(self) -> u8 {
        match self {
            OperationKind::Deposit => 0,
            OperationKind::Withdraw => 1,
            OperationKind::Harvest => 2,
            OperationKind::Rebalance => 3,
            OperationKind::Emergency => 4,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(OperationKind::Deposit),
            1 => Some(OperationKind::Withdraw),
            2 => Some(OperationKind::Harvest),
            3 => Some(OperationKind::Rebalance),
            4 => Some(OperationKind::Emergency),
            _ => None,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Deposit => write!(f, "DEPOSIT"),
            OperationKind::Withdraw => write!(f, "WITHDRAW"),
            OperationKind::Harvest => write!(f, "HARVEST"),
            OperationKind::Rebalance => write!(f, "REBALANCE"),
            OperationKind::Emergency => write!(f, "EMERGENCY"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Reverted,
    Aborted,
}

impl OperationStatus {
    /// No further callback is accepted once here
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OperationStatus::Completed | OperationStatus::Failed | OperationStatus::Aborted
        )
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationStatus::Pending => write!(f, "PENDING"),
            OperationStatus::InProgress => write!(f, "IN_PROGRESS"),
            OperationStatus::Completed => write!(f, "COMPLETED"),
            OperationStatus::Failed => write!(f, "FAILED"),
            OperationStatus::Reverted => write!(f, "REVERTED"),
            OperationStatus::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// The optimistic ledger change made when the operation was requested.
/// Compensation reverses exactly this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEffect {
    /// Principal credited to the operation's protocol
    Credited { amount: U256 },
    /// Principal and yield removed from the operation's protocol
    Debited { principal: U256, yield_amount: U256 },
    /// Yield zeroed, optionally folded into principal
    Harvested { amount: U256, compounded: bool },
    /// Principal moved from the operation's protocol to `to_protocol`
    Moved { to_protocol: ProtocolId, amount: U256 },
}

/// One entry of an operation's status trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: OperationStatus,
    pub at: u64,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub id: B256,
    pub user: Address,
    pub protocol_id: ProtocolId,
    pub amount: U256,
    pub kind: OperationKind,
    pub status: OperationStatus,
    pub target_domain: DomainId,

    /// ABI-encoded operation message handed to the transport
    pub payload: Bytes,

    /// Recoverable failures seen so far, never above the retry budget
    pub retry_count: u8,

    pub effect: LedgerEffect,

    /// Withdraw leg this deposit leg continues (rebalances only)
    pub parent: Option<B256>,

    pub created_at: u64,
    pub updated_at: u64,
    pub dispatched_at: Option<u64>,
    pub last_error: Option<String>,
    pub history: Vec<StatusChange>,
}

/// Fields fixed at creation time
#[derive(Debug, Clone)]
pub struct NewOperation {
    pub user: Address,
    pub protocol_id: ProtocolId,
    pub amount: U256,
    pub kind: OperationKind,
    pub target_domain: DomainId,
    pub effect: LedgerEffect,
    pub parent: Option<B256>,
}

impl Operation {
    /// Content-derived id: keccak256 over the ABI-encoded request tuple.
    /// The engine nonce keeps identical requests in the same second apart.
    pub fn derive_id(
        user: Address,
        protocol_id: ProtocolId,
        amount: U256,
        kind: OperationKind,
        timestamp: u64,
        nonce: u64,
    ) -> B256 {
        let encoded = (
            user,
            protocol_id,
            amount,
            U256::from(kind.as_u8()),
            timestamp,
            nonce,
        )
            .abi_encode();
        keccak256(encoded)
    }

    pub fn new(request: NewOperation, payload: Bytes, id: B256, now: u64) -> Self {
        Self {
            id,
            user: request.user,
            protocol_id: request.protocol_id,
            amount: request.amount,
            kind: request.kind,
            status: OperationStatus::Pending,
            target_domain: request.target_domain,
            payload,
            retry_count: 0,
            effect: request.effect,
            parent: request.parent,
            created_at: now,
            updated_at: now,
            dispatched_at: None,
            last_error: None,
            history: vec![StatusChange {
                status: OperationStatus::Pending,
                at: now,
                reason: None,
            }],
        }
    }

    /// Current attempt number, starting at 1
    pub fn attempt(&self) -> u8 {
        self.retry_count.saturating_add(1)
    }

    pub(crate) fn transition(&mut self, status: OperationStatus, now: u64, reason: Option<String>) {
        self.status = status;
        self.updated_at = now;
        if reason.is_some() {
            self.last_error = reason.clone();
        }
        self.history.push(StatusChange {
            status,
            at: now,
            reason,
        });
    }
}
