//! Saga transitions
//!
//! ```text
//! Pending -dispatch-> InProgress -success-> Completed
//! InProgress -recoverable-> Reverted -(retry_count < max)-> Pending
//!                                    -(retry_count >= max)-> Failed
//! InProgress -terminal-> Aborted
//! ```
//!
//! Everything here is a pure function of the operation and the outcome:
//! the coordinator applies the returned [`SagaAction`] to the ledger and
//! the transport.

use super::{Operation, OperationStatus};
use crate::error::{VaultError, VaultResult};

/// What the remote side reported for one attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    Success,
    /// Worth retrying with the same payload
    Recoverable { reason: String },
    /// Never retried
    Terminal { reason: String },
}

/// What the coordinator must do after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SagaAction {
    /// Operation completed; finalize bookkeeping
    Finalize,
    /// Operation is back in `Pending`; send the same payload again
    Redispatch,
    /// Operation ended in `Failed` or `Aborted`; reverse its ledger effect
    Compensate { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub operation: Operation,
    pub action: SagaAction,
}

fn expect_status(op: &Operation, expected: OperationStatus) -> VaultResult<()> {
    if op.status != expected {
        return Err(VaultError::InvalidTransition {
            id: op.id,
            status: op.status,
            expected,
        });
    }
    Ok(())
}

/// Apply a callback outcome to an in-flight operation
pub fn advance(
    op: &Operation,
    outcome: CallbackOutcome,
    max_retries: u8,
    now: u64,
) -> VaultResult<Step> {
    expect_status(op, OperationStatus::InProgress)?;
    let mut next = op.clone();

    let action = match outcome {
        CallbackOutcome::Success => {
            next.transition(OperationStatus::Completed, now, None);
            SagaAction::Finalize
        }
        CallbackOutcome::Recoverable { reason } => {
            next.transition(OperationStatus::Reverted, now, Some(reason.clone()));
            if next.retry_count < max_retries {
                next.retry_count += 1;
                next.transition(OperationStatus::Pending, now, None);
                SagaAction::Redispatch
            } else {
                next.transition(OperationStatus::Failed, now, Some(reason.clone()));
                SagaAction::Compensate { reason }
            }
        }
        CallbackOutcome::Terminal { reason } => {
            next.transition(OperationStatus::Aborted, now, Some(reason.clone()));
            SagaAction::Compensate { reason }
        }
    };

    Ok(Step {
        operation: next,
        action,
    })
}

/// `Pending -> InProgress`, stamping the dispatch time
pub fn begin_dispatch(op: &Operation, now: u64) -> VaultResult<Operation> {
    expect_status(op, OperationStatus::Pending)?;
    let mut next = op.clone();
    next.transition(OperationStatus::InProgress, now, None);
    next.dispatched_at = Some(now);
    Ok(next)
}

/// The transfer could not even begin: fail without waiting for a callback
pub fn fail_dispatch(op: &Operation, reason: String, now: u64) -> VaultResult<Step> {
    if !matches!(op.status, OperationStatus::Pending | OperationStatus::InProgress) {
        return Err(VaultError::InvalidTransition {
            id: op.id,
            status: op.status,
            expected: OperationStatus::InProgress,
        });
    }
    let mut next = op.clone();
    next.transition(OperationStatus::Failed, now, Some(reason.clone()));
    Ok(Step {
        operation: next,
        action: SagaAction::Compensate { reason },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{LedgerEffect, NewOperation, OperationKind};
    use alloy_primitives::{Address, Bytes, B256, U256};

    fn in_flight() -> Operation {
        let op = Operation::new(
            NewOperation {
                user: Address::repeat_byte(0x11),
                protocol_id: 1,
                amount: U256::from(100u64),
                kind: OperationKind::Deposit,
                target_domain: 8453,
                effect: LedgerEffect::Credited {
                    amount: U256::from(100u64),
                },
                parent: None,
            },
            Bytes::new(),
            B256::repeat_byte(0x01),
            0,
        );
        begin_dispatch(&op, 1).unwrap()
    }

    fn recoverable() -> CallbackOutcome {
        CallbackOutcome::Recoverable {
            reason: "gas".to_string(),
        }
    }

    #[test]
    fn test_success_completes() {
        let op = in_flight();
        assert_eq!(op.dispatched_at, Some(1));

        let step = advance(&op, CallbackOutcome::Success, 3, 5).unwrap();
        assert_eq!(step.action, SagaAction::Finalize);
        assert_eq!(step.operation.status, OperationStatus::Completed);
        assert_eq!(step.operation.updated_at, 5);
        // Input untouched
        assert_eq!(op.status, OperationStatus::InProgress);
    }

    #[test]
    fn test_retry_budget_is_honoured() {
        let max_retries = 3;
        let mut op = in_flight();

        for expected in 1..=max_retries {
            let step = advance(&op, recoverable(), max_retries, 10).unwrap();
            assert_eq!(step.action, SagaAction::Redispatch);
            assert_eq!(step.operation.status, OperationStatus::Pending);
            assert_eq!(step.operation.retry_count, expected);
            op = begin_dispatch(&step.operation, 11).unwrap();
        }

        let step = advance(&op, recoverable(), max_retries, 20).unwrap();
        assert_eq!(step.operation.status, OperationStatus::Failed);
        assert_eq!(step.operation.retry_count, max_retries);
        assert!(matches!(step.action, SagaAction::Compensate { .. }));
    }

    #[test]
    fn test_zero_retries_fails_immediately() {
        let step = advance(&in_flight(), recoverable(), 0, 2).unwrap();
        assert_eq!(step.operation.status, OperationStatus::Failed);
        assert_eq!(step.operation.retry_count, 0);
    }

    #[test]
    fn test_terminal_aborts_regardless_of_budget() {
        let step = advance(
            &in_flight(),
            CallbackOutcome::Terminal {
                reason: "slippage".to_string(),
            },
            5,
            2,
        )
        .unwrap();
        assert_eq!(step.operation.status, OperationStatus::Aborted);
        assert_eq!(step.operation.retry_count, 0);
        assert_eq!(
            step.action,
            SagaAction::Compensate {
                reason: "slippage".to_string()
            }
        );
        assert_eq!(step.operation.last_error.as_deref(), Some("slippage"));
    }

    #[test]
    fn test_callbacks_rejected_outside_in_progress() {
        let done = advance(&in_flight(), CallbackOutcome::Success, 3, 2)
            .unwrap()
            .operation;
        assert!(matches!(
            advance(&done, CallbackOutcome::Success, 3, 3),
            Err(VaultError::InvalidTransition {
                status: OperationStatus::Completed,
                ..
            })
        ));

        let pending = advance(&in_flight(), recoverable(), 3, 2).unwrap().operation;
        assert!(advance(&pending, CallbackOutcome::Success, 3, 3).is_err());
    }

    #[test]
    fn test_history_records_each_status() {
        let step = advance(&in_flight(), recoverable(), 1, 2).unwrap();
        let statuses: Vec<_> = step.operation.history.iter().map(|h| h.status).collect();
        assert_eq!(
            statuses,
            vec![
                OperationStatus::Pending,
                OperationStatus::InProgress,
                OperationStatus::Reverted,
                OperationStatus::Pending,
            ]
        );
    }

    #[test]
    fn test_fail_dispatch() {
        let step = fail_dispatch(&in_flight(), "closed".to_string(), 2).unwrap();
        assert_eq!(step.operation.status, OperationStatus::Failed);

        assert!(fail_dispatch(&step.operation, "again".to_string(), 3).is_err());
    }
}
