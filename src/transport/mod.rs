//! Cross-domain transport boundary
//!
//! Outbound: the coordinator hands an [`OutboundCall`] to a [`Transport`].
//! The call either fails synchronously (nothing was sent) or is accepted,
//! in which case exactly one [`TransportCallback`] per attempt comes back
//! later through the engine handle.

mod message;
mod relay;

pub use message::{IOmniVault, OperationMessage};
pub use relay::{RelayConfig, SimulatedRelay};

use alloy_primitives::{Address, Bytes, B256, U256};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::types::DomainId;

/// One attempt of an operation, ready for delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundCall {
    pub operation_id: B256,
    pub domain: DomainId,
    /// Asset bridged alongside the call
    pub settlement_asset: Address,
    /// Adapter that executes the message on the target domain
    pub receiver: Address,
    pub amount: U256,
    pub payload: Bytes,
    /// 1 for the first send, incremented on every retry
    pub attempt: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport channel closed")]
    Closed,

    #[error("{0}")]
    Rejected(String),
}

pub trait Transport: Send {
    /// Begin delivery. An error means the transfer never started.
    fn send(&mut self, call: OutboundCall) -> Result<(), TransportError>;
}

// ============================================
// CALLBACK CONTEXTS
// ============================================

/// Delivered with a successful execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    /// Party delivering the callback (must be the gateway)
    pub sender: Address,
    pub source_domain: DomainId,
    /// Attempt this callback answers
    pub attempt: u8,
}

/// Delivered when the remote call reverted; retryable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevertContext {
    pub sender: Address,
    pub asset: Address,
    pub amount: U256,
    /// The original operation message
    pub revert_message: Bytes,
    pub reason: String,
    pub attempt: u8,
}

/// Delivered when the remote call can never succeed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbortContext {
    pub sender: Address,
    pub asset: Address,
    pub amount: U256,
    /// The original operation message
    pub revert_message: Bytes,
    pub reason: String,
    pub attempt: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCallback {
    Call {
        context: CallContext,
        asset: Address,
        amount: U256,
        message: Bytes,
    },
    Revert(RevertContext),
    Abort(AbortContext),
}

// ============================================
// CHANNEL TRANSPORT
// ============================================

/// Forwards outbound calls to a relay task over an unbounded channel
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<OutboundCall>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundCall>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Transport for ChannelTransport {
    fn send(&mut self, call: OutboundCall) -> Result<(), TransportError> {
        self.tx.send(call).map_err(|_| TransportError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call() -> OutboundCall {
        OutboundCall {
            operation_id: B256::repeat_byte(1),
            domain: 8453,
            settlement_asset: Address::repeat_byte(2),
            receiver: Address::repeat_byte(3),
            amount: U256::from(10u64),
            payload: Bytes::new(),
            attempt: 1,
        }
    }

    #[tokio::test]
    async fn test_channel_transport_forwards() {
        let (mut transport, mut rx) = ChannelTransport::new();
        transport.send(call()).unwrap();
        assert_eq!(rx.recv().await, Some(call()));
    }

    #[test]
    fn test_closed_channel_is_synchronous_failure() {
        let (mut transport, rx) = ChannelTransport::new();
        drop(rx);
        assert_eq!(transport.send(call()), Err(TransportError::Closed));
    }
}
