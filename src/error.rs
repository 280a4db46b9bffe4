//! Engine error taxonomy
//!
//! Every synchronous entry point returns [`VaultResult`]. A returned error
//! means nothing was written. Remote failures are not errors here; they
//! arrive as callbacks and are handled by the saga.

use alloy_primitives::{Address, B256, U256};
use thiserror::Error;

use crate::coordinator::OperationStatus;
use crate::transport::TransportError;
use crate::types::{DomainId, ProtocolId};

pub type VaultResult<T> = std::result::Result<T, VaultError>;

/// Coarse classification used by callers and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input: amount, unknown/inactive protocol, bounds, zero address
    Validation,
    /// Caller is not the admin, an authorized vault, or the gateway
    Authorization,
    /// Withdraw or rebalance exceeds what the position holds
    InsufficientBalance,
    /// The transport refused a call or a message could not be decoded
    Transport,
    /// Operation or engine not in a state that allows the request
    InvalidState,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VaultError {
    #[error("zero address supplied for {0}")]
    ZeroAddress(&'static str),

    #[error("amount must be greater than zero")]
    ZeroAmount,

    #[error("unknown protocol id {0}")]
    UnknownProtocol(ProtocolId),

    #[error("protocol {0} is inactive")]
    ProtocolInactive(ProtocolId),

    #[error("no active protocol available for domain filter {0}")]
    NoEligibleProtocol(DomainId),

    #[error("deposit of {amount} outside protocol bounds [{min}, {max}]")]
    DepositOutOfBounds { amount: U256, min: U256, max: U256 },

    #[error("min deposit {min} exceeds max deposit {max}")]
    InvalidBounds { min: U256, max: U256 },

    #[error("domain {0} has no settlement asset mapping")]
    UnmappedDomain(DomainId),

    #[error("domain {domain} already holds the maximum of {max} protocols")]
    DomainFull { domain: DomainId, max: usize },

    #[error("source and destination are both protocol {0}")]
    SameProtocol(ProtocolId),

    #[error("no active position for {user} in protocol {protocol_id}")]
    PositionInactive { user: Address, protocol_id: ProtocolId },

    #[error("position has no accrued yield to harvest")]
    NothingToHarvest,

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("engine is paused")]
    Paused,

    #[error("caller {0} is not authorized")]
    Unauthorized(Address),

    #[error("insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: U256, available: U256 },

    #[error("unknown operation {0}")]
    UnknownOperation(B256),

    #[error("operation {id} is {status}, expected {expected}")]
    InvalidTransition {
        id: B256,
        status: OperationStatus,
        expected: OperationStatus,
    },

    #[error("callback for {id} reports attempt {attempt}, current attempt is {expected}")]
    StaleAttempt { id: B256, attempt: u8, expected: u8 },

    #[error("transport refused the call: {0}")]
    Transport(String),

    #[error("malformed operation message: {0}")]
    Codec(String),
}

impl From<TransportError> for VaultError {
    fn from(e: TransportError) -> Self {
        VaultError::Transport(e.to_string())
    }
}

impl VaultError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VaultError::ZeroAddress(_)
            | VaultError::ZeroAmount
            | VaultError::UnknownProtocol(_)
            | VaultError::ProtocolInactive(_)
            | VaultError::NoEligibleProtocol(_)
            | VaultError::DepositOutOfBounds { .. }
            | VaultError::InvalidBounds { .. }
            | VaultError::UnmappedDomain(_)
            | VaultError::DomainFull { .. }
            | VaultError::SameProtocol(_)
            | VaultError::PositionInactive { .. }
            | VaultError::NothingToHarvest
            | VaultError::InvalidParameter(_) => ErrorKind::Validation,
            VaultError::Unauthorized(_) => ErrorKind::Authorization,
            VaultError::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            VaultError::Transport(_) | VaultError::Codec(_) => ErrorKind::Transport,
            VaultError::Paused
            | VaultError::UnknownOperation(_)
            | VaultError::InvalidTransition { .. }
            | VaultError::StaleAttempt { .. } => ErrorKind::InvalidState,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_refusal_converts() {
        let err = VaultError::from(TransportError::Rejected("bridge offline".to_string()));
        assert_eq!(err, VaultError::Transport("bridge offline".to_string()));
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(
            VaultError::from(TransportError::Closed).to_string(),
            "transport refused the call: transport channel closed"
        );
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(VaultError::ZeroAmount.kind(), ErrorKind::Validation);
        assert_eq!(
            VaultError::Unauthorized(Address::ZERO).kind(),
            ErrorKind::Authorization
        );
        assert_eq!(
            VaultError::InsufficientBalance {
                requested: U256::from(2u64),
                available: U256::from(1u64),
            }
            .kind(),
            ErrorKind::InsufficientBalance
        );
        assert_eq!(VaultError::Paused.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn test_error_message_carries_reason() {
        let err = VaultError::DomainFull { domain: 8453, max: 10 };
        assert_eq!(
            err.to_string(),
            "domain 8453 already holds the maximum of 10 protocols"
        );
    }
}
