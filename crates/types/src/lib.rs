//! Foundation types for the rondo round-based application framework.
//!
//! This crate provides the foundational types used by the state machine:
//!
//! - **Identifiers**: [`Address`], [`TxId`], [`BlockHeight`]
//! - **Payload codec**: [`TxPayload`], [`PayloadKind`], [`PayloadRegistry`]
//! - **Transaction envelope**: [`Transaction`], the [`Verifier`] collaborator
//! - **Blocks**: [`Header`], [`Block`], [`BlockBuilder`], [`Blockchain`]
//! - **Quorum arithmetic**: [`consensus_threshold`], [`ConsensusParams`],
//!   the majority-possible predicates
//!
//! # Design Philosophy
//!
//! This crate is self-contained and does not depend on any other workspace
//! crates, making it the foundation layer. Everything that crosses a node
//! boundary is encoded as canonical JSON (sorted keys, no whitespace) so two
//! replicas always produce byte-identical output for equal values.

mod block;
mod error;
mod identifiers;
mod payload;
mod quorum;
pub mod serializer;
mod transaction;

pub use block::{AddBlockError, Block, BlockBuilder, Blockchain, Header};
pub use error::{InternalError, TransactionError};
pub use identifiers::{Address, BlockHeight, TxId};
pub use payload::{PayloadKind, PayloadRegistry, RegistryError, TxPayload};
pub use quorum::{
    check_majority_possible, check_majority_possible_with_new_voter, consensus_threshold,
    is_majority_possible, ConsensusParams, QuorumError,
};
pub use transaction::{Transaction, Verifier};

/// Test utilities.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
