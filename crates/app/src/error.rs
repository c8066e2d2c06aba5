//! Application-level error type.

use thiserror::Error;

use rondo_types::{AddBlockError, InternalError, TransactionError};

/// Any failure surfaced by the period driver or the round FSM.
///
/// `Transaction` variants are reported to the consensus engine so the
/// offending transaction is rejected; the other variants indicate a bug or a
/// replica divergence and must reach the operator.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AppError {
    /// A transaction was rejected; consensus proceeds without it.
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// Programmer error in the application wiring.
    #[error(transparent)]
    Internal(#[from] InternalError),

    /// Block height mismatch on append.
    #[error(transparent)]
    AddBlock(#[from] AddBlockError),
}

impl AppError {
    /// Whether the engine should merely reject the transaction.
    pub fn is_transaction_rejection(&self) -> bool {
        matches!(self, AppError::Transaction(_))
    }
}
