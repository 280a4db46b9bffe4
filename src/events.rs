//! Auditable event records
//!
//! Every state change the engine makes is recorded as a [`VaultEvent`].
//! Records are kept in memory for the lifetime of the engine and, when an
//! audit path is configured, appended to a JSON-lines file.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use alloy_primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use eyre::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::coordinator::OperationKind;
use crate::types::{DomainId, ProtocolId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum VaultEvent {
    // ========== Registry ==========
    DomainAssetSet {
        domain: DomainId,
        asset: Address,
    },
    ProtocolRegistered {
        protocol_id: ProtocolId,
        name: String,
        domain: DomainId,
        adapter: Address,
        apy_bps: u32,
    },
    ProtocolUpdated {
        protocol_id: ProtocolId,
        old_apy_bps: u32,
        new_apy_bps: u32,
        active: bool,
        auto_compound: bool,
    },

    // ========== Ledger ==========
    Deployed {
        user: Address,
        protocol_id: ProtocolId,
        amount: U256,
        principal: U256,
    },
    Withdrawn {
        user: Address,
        protocol_id: ProtocolId,
        amount: U256,
        principal_removed: U256,
        yield_removed: U256,
        closed: bool,
    },
    Harvested {
        user: Address,
        protocol_id: ProtocolId,
        amount: U256,
        compounded: bool,
    },
    Rebalanced {
        user: Address,
        from_protocol: ProtocolId,
        to_protocol: ProtocolId,
        amount: U256,
    },

    // ========== Operations ==========
    OperationCreated {
        operation_id: B256,
        kind: OperationKind,
        user: Address,
        protocol_id: ProtocolId,
        amount: U256,
        parent: Option<B256>,
    },
    OperationDispatched {
        operation_id: B256,
        domain: DomainId,
        attempt: u8,
    },
    OperationCompleted {
        operation_id: B256,
    },
    OperationRetried {
        operation_id: B256,
        retry_count: u8,
        reason: String,
    },
    OperationFailed {
        operation_id: B256,
        reason: String,
    },
    OperationAborted {
        operation_id: B256,
        reason: String,
    },

    // ========== Compensation ==========
    EmergencyRefund {
        operation_id: B256,
        user: Address,
        protocol_id: ProtocolId,
        amount: U256,
    },
    PositionRestored {
        operation_id: B256,
        user: Address,
        protocol_id: ProtocolId,
        principal: U256,
        yield_amount: U256,
    },

    // ========== Admin ==========
    VaultAuthorized {
        vault: Address,
    },
    VaultDeauthorized {
        vault: Address,
    },
    ParametersUpdated {
        default_slippage_bps: u16,
        max_retries: u8,
    },
    Paused {
        by: Address,
    },
    Unpaused {
        by: Address,
    },
    AdminTransferred {
        previous: Address,
        new_admin: Address,
    },
    EmergencyAdminSet {
        emergency_admin: Address,
    },
}

/// A timestamped, sequenced event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub event: VaultEvent,
}

impl EventRecord {
    /// Append this record to a JSON-lines file
    pub fn append_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;

        let json = serde_json::to_string(self)?;
        writeln!(file, "{}", json)?;

        Ok(())
    }
}

/// In-memory event log with an optional audit file
#[derive(Debug, Default)]
pub struct EventLog {
    records: Vec<EventRecord>,
    audit_path: Option<PathBuf>,
}

impl EventLog {
    pub fn new(audit_path: Option<PathBuf>) -> Self {
        Self {
            records: Vec::new(),
            audit_path,
        }
    }

    pub fn emit(&mut self, now: u64, event: VaultEvent) {
        let record = EventRecord {
            sequence: self.records.len() as u64,
            timestamp: DateTime::<Utc>::from_timestamp(now as i64, 0).unwrap_or_default(),
            event,
        };

        // The audit file is best effort; state transitions never fail on it
        if let Some(path) = &self.audit_path {
            if let Err(e) = record.append_to_file(path) {
                warn!("Failed to append audit record to {}: {}", path.display(), e);
            }
        }

        self.records.push(record);
    }

    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Events recorded since `sequence` (inclusive)
    pub fn since(&self, sequence: u64) -> &[EventRecord] {
        let start = (sequence as usize).min(self.records.len());
        &self.records[start..]
    }
}
