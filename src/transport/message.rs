//! Operation message codec
//!
//! The payload handed to the transport is the ABI-encoded calldata of
//! `IOmniVault.executeOperation`. Callbacks carry it back verbatim, which is
//! how the engine recovers the operation id and the original parameters.

use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::{sol, SolCall};

use crate::coordinator::OperationKind;
use crate::error::{VaultError, VaultResult};
use crate::types::ProtocolId;

sol! {
    #[allow(missing_docs)]
    interface IOmniVault {
        /// Executed by the receiving adapter on the target domain
        function executeOperation(
            bytes32 operationId,
            address user,
            address adapter,
            address settlementAsset,
            uint64 protocolId,
            uint256 amount,
            uint8 kind,
            uint16 slippageBps,
            bool compound
        ) external;
    }
}

/// Decoded operation message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationMessage {
    pub operation_id: B256,
    pub user: Address,
    pub adapter: Address,
    pub settlement_asset: Address,
    pub protocol_id: ProtocolId,
    pub amount: U256,
    pub kind: OperationKind,
    pub slippage_bps: u16,
    /// Harvest should compound on the adapter side too
    pub compound: bool,
}

impl OperationMessage {
    pub fn encode(&self) -> Bytes {
        IOmniVault::executeOperationCall {
            operationId: self.operation_id,
            user: self.user,
            adapter: self.adapter,
            settlementAsset: self.settlement_asset,
            protocolId: self.protocol_id,
            amount: self.amount,
            kind: self.kind.as_u8(),
            slippageBps: self.slippage_bps,
            compound: self.compound,
        }
        .abi_encode()
        .into()
    }

    pub fn decode(data: &[u8]) -> VaultResult<Self> {
        let call = IOmniVault::executeOperationCall::abi_decode(data)
            .map_err(|e| VaultError::Codec(e.to_string()))?;
        let kind = OperationKind::from_u8(call.kind)
            .ok_or_else(|| VaultError::Codec(format!("unknown operation kind {}", call.kind)))?;

        Ok(Self {
            operation_id: call.operationId,
            user: call.user,
            adapter: call.adapter,
            settlement_asset: call.settlementAsset,
            protocol_id: call.protocolId,
            amount: call.amount,
            kind,
            slippage_bps: call.slippageBps,
            compound: call.compound,
        })
    }

    /// Operation id only, for callbacks that need nothing else
    pub fn operation_id(data: &[u8]) -> VaultResult<B256> {
        Self::decode(data).map(|m| m.operation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> OperationMessage {
        OperationMessage {
            operation_id: B256::repeat_byte(0x42),
            user: Address::repeat_byte(0x11),
            adapter: Address::repeat_byte(0xad),
            settlement_asset: Address::repeat_byte(0x5e),
            protocol_id: 2,
            amount: U256::from(50u64),
            kind: OperationKind::Rebalance,
            slippage_bps: 50,
            compound: false,
        }
    }

    #[test]
    fn test_decode_recovers_parameters() {
        let encoded = message().encode();
        // 4-byte selector + 9 words
        assert_eq!(encoded.len(), 4 + 9 * 32);
        assert_eq!(&encoded[..4], IOmniVault::executeOperationCall::SELECTOR.as_slice());
        assert_eq!(OperationMessage::decode(&encoded).unwrap(), message());
    }

    #[test]
    fn test_garbage_is_a_codec_error() {
        assert!(matches!(
            OperationMessage::decode(&[0xde, 0xad]),
            Err(VaultError::Codec(_))
        ));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let call = IOmniVault::executeOperationCall {
            operationId: B256::ZERO,
            user: Address::ZERO,
            adapter: Address::ZERO,
            settlementAsset: Address::ZERO,
            protocolId: 1,
            amount: U256::ZERO,
            kind: 200,
            slippageBps: 0,
            compound: false,
        };
        let err = OperationMessage::decode(&call.abi_encode()).unwrap_err();
        assert!(err.to_string().contains("unknown operation kind 200"));
    }
}
