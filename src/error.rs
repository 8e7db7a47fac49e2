use alloy_primitives::Address;

use crate::asset::AmountError;
use crate::chain::TxHandle;
use crate::config::ConfigError;
use crate::orchestrator::{OperationId, OperationKind, OperationState, TransitionError};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Usage: seyield-sim <scenario.csv>")]
    MissingArgument,

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Invalid amount: {0}")]
    Amount(#[from] AmountError),

    #[error("A {kind} operation is already in flight for {account}")]
    ConcurrentOperation { account: Address, kind: OperationKind },

    #[error("Operation {id} can no longer be cancelled (state {state})")]
    NotCancellable {
        id: OperationId,
        state: OperationState,
    },

    #[error("Transition error: {0}")]
    Transition(#[from] TransitionError),

    #[error("Invalid scenario row: {0}")]
    InvalidScenarioRow(u32),

    #[error("Cannot size duplicate filter: {0}")]
    DuplicateFilter(&'static str),
}

/// Failures reported by a [`crate::chain::ChainClient`].
///
/// Cloneable so a single in-flight read can be shared between callers.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("RPC request failed: {0}")]
    Rpc(String),

    #[error("Unexpected value returned by {call}: expected {expected}")]
    UnexpectedValue {
        call: &'static str,
        expected: &'static str,
    },

    #[error("Unknown transaction {0}")]
    UnknownTransaction(TxHandle),
}

impl ChainError {
    /// Raw provider text, kept for diagnostics.
    pub fn raw(&self) -> String {
        match self {
            ChainError::Rpc(message) => message.clone(),
            other => other.to_string(),
        }
    }
}
