//! Application-side view of the consensus engine's blocks.
//!
//! The engine guarantees ordering and data consistency; this module only
//! mirrors the delivered blocks into an append-only in-memory chain so the
//! application can reason about height and block time.

use std::time::Duration;

use thiserror::Error;

use crate::error::InternalError;
use crate::identifiers::{Address, BlockHeight};
use crate::transaction::Transaction;

/// A block was appended out of order.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("expected height {expected}, got {actual}")]
pub struct AddBlockError {
    /// The height the chain would accept next.
    pub expected: BlockHeight,
    /// The height carried by the rejected block.
    pub actual: BlockHeight,
}

/// The subset of an engine block header the application depends on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    /// Position in the chain, starting at 1.
    pub height: BlockHeight,
    /// Block time. Monotonically non-decreasing across blocks.
    pub timestamp: Duration,
    /// The engine-selected proposer.
    pub proposer: Address,
}

/// An engine block: header plus the transactions delivered within it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    header: Header,
    transactions: Vec<Transaction>,
}

impl Block {
    /// Build a block from its parts.
    pub fn new(header: Header, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            transactions,
        }
    }

    /// The block header.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// The delivered transactions, in delivery order.
    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    /// The block time.
    pub fn timestamp(&self) -> Duration {
        self.header.timestamp
    }
}

/// Scratch space for the block currently under construction.
///
/// States: empty, header-set, sealed via [`BlockBuilder::get_block`].
/// `reset` returns to empty.
#[derive(Debug, Default)]
pub struct BlockBuilder {
    header: Option<Header>,
    transactions: Vec<Transaction>,
}

impl BlockBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the header and the pending transactions.
    pub fn reset(&mut self) {
        self.header = None;
        self.transactions.clear();
    }

    /// Set the header of the block in progress.
    ///
    /// Setting it twice without a reset is a programmer error.
    pub fn set_header(&mut self, header: Header) -> Result<(), InternalError> {
        if self.header.is_some() {
            return Err(InternalError::new("header already set"));
        }
        self.header = Some(header);
        Ok(())
    }

    /// Append a transaction. The engine guarantees uniqueness, no dedup here.
    pub fn add_transaction(&mut self, transaction: Transaction) {
        self.transactions.push(transaction);
    }

    /// Number of transactions collected so far.
    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    /// Seal the current contents into a block. Empty blocks are allowed.
    pub fn get_block(&self) -> Result<Block, InternalError> {
        let header = self
            .header
            .clone()
            .ok_or_else(|| InternalError::new("header not set"))?;
        Ok(Block::new(header, self.transactions.clone()))
    }
}

/// Append-only ordered log of committed blocks.
#[derive(Debug, Default)]
pub struct Blockchain {
    blocks: Vec<Block>,
}

impl Blockchain {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a block.
    ///
    /// Heights must form a dense sequence starting at 1; anything else means
    /// the engine and the application have diverged.
    pub fn add_block(&mut self, block: Block) -> Result<(), AddBlockError> {
        let expected = BlockHeight(self.height().0 + 1);
        let actual = block.header.height;
        if expected != actual {
            return Err(AddBlockError { expected, actual });
        }
        self.blocks.push(block);
        Ok(())
    }

    /// Height of the latest committed block; 0 when the chain is empty.
    pub fn height(&self) -> BlockHeight {
        BlockHeight(self.blocks.len() as u64)
    }

    /// The committed blocks, oldest first.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Timestamp of the latest committed block.
    pub fn last_timestamp(&self) -> Option<Duration> {
        self.blocks.last().map(Block::timestamp)
    }
}
