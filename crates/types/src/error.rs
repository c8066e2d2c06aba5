//! Shared error taxonomy.
//!
//! Transaction-level errors are reported back to the consensus engine so the
//! offending transaction is rejected; internal errors indicate a bug in the
//! application wiring and must surface to the operator.

use thiserror::Error;

use crate::identifiers::Address;

/// A transaction was rejected before reaching the application state.
///
/// None of these variants mutate round state; the engine flags the
/// transaction as invalid and consensus proceeds without it.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransactionError {
    /// The byte form could not be decoded.
    #[error("malformed transaction: {0}")]
    Malformed(String),

    /// The payload tag is not registered, or not accepted by the current round.
    #[error("transaction type '{0}' not recognized")]
    TypeNotRecognized(String),

    /// Signature verification failed.
    #[error("signature not valid for sender {0}")]
    SignatureNotValid(Address),

    /// The payload failed the current round's admission checks.
    #[error("transaction not valid: {0}")]
    NotValid(String),

    /// The payload belongs to the previous round.
    #[error("request '{0}' is from the previous round; skipping")]
    LateArriving(String),
}

/// Programmer error in the application.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("internal error: {0}")]
pub struct InternalError(pub String);

impl InternalError {
    /// Build an internal error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
