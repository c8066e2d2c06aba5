//! Engine-facing period driver.
//!
//! Translates the consensus engine's block lifecycle, `begin_block`,
//! `deliver_tx`, `end_block`, `commit`, into round operations, and mirrors
//! the delivered blocks into an append-only chain. Callbacks arrive strictly
//! sequentially; each must return before the next is issued.

use std::fmt;
use std::time::Duration;

use tracing::{debug, instrument};

use rondo_types::{
    Block, BlockBuilder, Blockchain, BlockHeight, Header, InternalError, PayloadRegistry,
    Transaction, Verifier,
};

use crate::app::AbciApp;
use crate::error::AppError;
use crate::round::RoundId;
use crate::state::PeriodState;

/// Where the driver stands in the block lifecycle.
///
/// `begin_block` opens a block, any number of `deliver_tx` fill it,
/// `end_block` closes it, `commit` appends it to the chain. Out-of-phase
/// callbacks indicate a broken adapter and are internal errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BlockPhase {
    AwaitingBeginBlock,
    CollectingTransactions,
    AwaitingCommit,
}

/// One full application cycle: a sequence of rounds driven by the engine.
pub struct Period<E> {
    abci_app: AbciApp<E>,
    blockchain: Blockchain,
    block_builder: BlockBuilder,
    phase: BlockPhase,

    registry: PayloadRegistry,
    verifier: Box<dyn Verifier>,
    ledger_id: String,
}

impl<E: Clone + Ord + fmt::Debug> Period<E> {
    /// Create a period over an application state machine.
    ///
    /// The registry and verifier serve [`Period::deliver_raw`]: raw bytes
    /// from the engine are decoded against the registry and the payload
    /// signature is checked before delivery.
    pub fn new(
        abci_app: AbciApp<E>,
        registry: PayloadRegistry,
        verifier: Box<dyn Verifier>,
        ledger_id: impl Into<String>,
    ) -> Self {
        Self {
            abci_app,
            blockchain: Blockchain::new(),
            block_builder: BlockBuilder::new(),
            phase: BlockPhase::AwaitingBeginBlock,
            registry,
            verifier,
            ledger_id: ledger_id.into(),
        }
    }

    /// Instantiate the initial round.
    pub fn setup(&mut self) -> Result<(), InternalError> {
        self.abci_app.setup()
    }

    /// The application state machine.
    pub fn abci_app(&self) -> &AbciApp<E> {
        &self.abci_app
    }

    /// The committed chain.
    pub fn blockchain(&self) -> &Blockchain {
        &self.blockchain
    }

    /// Height of the committed chain.
    pub fn height(&self) -> BlockHeight {
        self.blockchain.height()
    }

    /// Whether the period has reached a final round.
    pub fn is_finished(&self) -> bool {
        self.abci_app.is_finished()
    }

    /// Id of the current round.
    pub fn current_round_id(&self) -> Option<RoundId> {
        self.abci_app.current_round_id()
    }

    /// Id of the round that last produced a verdict.
    pub fn last_round_id(&self) -> Option<RoundId> {
        self.abci_app.last_round_id()
    }

    /// Timestamp of the latest committed block.
    pub fn last_timestamp(&self) -> Result<Duration, InternalError> {
        self.blockchain
            .last_timestamp()
            .ok_or_else(|| InternalError::new("no block has been committed yet"))
    }

    /// The latest replicated state.
    pub fn latest_state(&self) -> &PeriodState {
        self.abci_app.state()
    }

    /// Open a new block.
    ///
    /// Observing the header timestamp may fire expired timeouts, which can
    /// swap rounds or even finish the period before any transaction lands.
    pub fn begin_block(&mut self, header: Header) -> Result<(), InternalError> {
        if self.is_finished() {
            return Err(InternalError::new(
                "period is finished, cannot accept new blocks",
            ));
        }
        if self.phase != BlockPhase::AwaitingBeginBlock {
            return Err(InternalError::new(format!(
                "cannot accept a 'begin_block' request in phase {:?}",
                self.phase
            )));
        }
        self.phase = BlockPhase::CollectingTransactions;
        self.block_builder.reset();
        let timestamp = header.timestamp;
        self.block_builder.set_header(header)?;
        self.abci_app.update_time(timestamp)
    }

    /// Deliver one transaction of the open block.
    ///
    /// The transaction is checked against the current round before it is
    /// processed; on any failure the error propagates so the adapter reports
    /// the transaction as invalid, and the round state is left untouched.
    #[instrument(skip(self, transaction), fields(tx_type = transaction.payload().transaction_type()))]
    pub fn deliver_tx(&mut self, transaction: Transaction) -> Result<(), AppError> {
        if self.phase != BlockPhase::CollectingTransactions {
            return Err(InternalError::new(format!(
                "cannot accept a 'deliver_tx' request in phase {:?}",
                self.phase
            ))
            .into());
        }
        self.abci_app.check_transaction(&transaction)?;
        self.abci_app.process_transaction(&transaction)?;
        self.block_builder.add_transaction(transaction);
        Ok(())
    }

    /// Decode, verify, and deliver a raw transaction.
    pub fn deliver_raw(&mut self, bytes: &[u8]) -> Result<(), AppError> {
        let transaction = Transaction::decode(bytes, &self.registry)
            .map_err(AppError::Transaction)?;
        transaction.verify(&self.ledger_id, self.verifier.as_ref())?;
        self.deliver_tx(transaction)
    }

    /// Close the open block and ask the current round for its verdict.
    ///
    /// A verdict swaps rounds (or finishes the period) through the
    /// transition table; no verdict leaves the round in place until a later
    /// block or a timeout.
    pub fn end_block(&mut self) -> Result<(), InternalError> {
        if self.phase != BlockPhase::CollectingTransactions {
            return Err(InternalError::new(format!(
                "cannot accept a 'end_block' request in phase {:?}",
                self.phase
            )));
        }
        self.phase = BlockPhase::AwaitingCommit;

        if self.is_finished() {
            // a timeout fired at begin_block already ended the period; the
            // remaining lifecycle callbacks still have to run
            debug!("period finished mid-block, skipping verdict");
            return Ok(());
        }
        let verdict = self.abci_app.current_round_mut()?.end_block();
        if let Some((state, event)) = verdict {
            self.abci_app.process_event(event, Some(state))?;
        }
        Ok(())
    }

    /// Seal the open block and append it to the chain.
    pub fn commit(&mut self) -> Result<(), AppError> {
        if self.phase != BlockPhase::AwaitingCommit {
            return Err(InternalError::new(format!(
                "cannot accept a 'commit' request in phase {:?}",
                self.phase
            ))
            .into());
        }
        let block: Block = self.block_builder.get_block()?;
        self.blockchain.add_block(block)?;
        self.block_builder.reset();
        self.phase = BlockPhase::AwaitingBeginBlock;
        Ok(())
    }
}

impl<E: fmt::Debug> fmt::Debug for Period<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Period")
            .field("phase", &self.phase)
            .field("height", &self.blockchain.height())
            .field("abci_app", &self.abci_app)
            .finish()
    }
}
