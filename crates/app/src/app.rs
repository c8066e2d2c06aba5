//! The round FSM.
//!
//! Holds the current round, applies the transition table when a round ends,
//! and fires block-time timeouts. Synchronous and deterministic: the same
//! sequence of transactions and block timestamps produces the same sequence
//! of rounds on every replica.

use std::fmt;
use std::time::Duration;

use tracing::{debug, info, warn};

use rondo_types::{ConsensusParams, InternalError, Transaction, TransactionError};

use crate::config::AbciAppConfig;
use crate::error::AppError;
use crate::round::{Round, RoundId};
use crate::state::PeriodState;
use crate::timeouts::Timeouts;

/// The application state machine driven by the period driver.
///
/// Rounds are swapped atomically at `end_block` verdicts; between blocks only
/// timeouts can force a transition. Once a final round is reached the current
/// round becomes `None` and the app stops accepting input.
pub struct AbciApp<E> {
    config: AbciAppConfig<E>,
    consensus_params: ConsensusParams,
    initial_state: PeriodState,

    current_round: Option<Box<dyn Round<E>>>,
    last_round_id: Option<RoundId>,
    /// Tag admitted by the previous round, when it differs from the current
    /// round's. Used to recognize late-arriving transactions.
    previous_round_tx_type: Option<&'static str>,
    round_results: Vec<PeriodState>,

    last_timestamp: Option<Duration>,
    current_timeout_entries: Vec<u64>,
    timeouts: Timeouts<E>,
}

impl<E: Clone + Ord + fmt::Debug> AbciApp<E> {
    /// Create the state machine; the configuration is validated once here.
    pub fn new(
        config: AbciAppConfig<E>,
        initial_state: PeriodState,
        consensus_params: ConsensusParams,
    ) -> Result<Self, InternalError> {
        config.validate()?;
        Ok(Self {
            config,
            consensus_params,
            initial_state,
            current_round: None,
            last_round_id: None,
            previous_round_tx_type: None,
            round_results: Vec::new(),
            last_timestamp: None,
            current_timeout_entries: Vec::new(),
            timeouts: Timeouts::new(),
        })
    }

    /// Instantiate the initial round.
    ///
    /// No timeouts are scheduled here: deadlines are block-time relative and
    /// no block timestamp has been observed yet.
    pub fn setup(&mut self) -> Result<(), InternalError> {
        self.schedule_round(self.config.initial_round())
    }

    /// The current round.
    pub fn current_round(&self) -> Result<&dyn Round<E>, InternalError> {
        self.current_round
            .as_deref()
            .ok_or_else(|| InternalError::new("current round is not set"))
    }

    /// The current round, mutably.
    pub fn current_round_mut(&mut self) -> Result<&mut dyn Round<E>, InternalError> {
        match self.current_round.as_deref_mut() {
            Some(round) => Ok(round),
            None => Err(InternalError::new("current round is not set")),
        }
    }

    /// Id of the current round, `None` once the period has finished.
    pub fn current_round_id(&self) -> Option<RoundId> {
        self.current_round.as_ref().map(|round| round.round_id())
    }

    /// Id of the round that last produced a verdict.
    pub fn last_round_id(&self) -> Option<RoundId> {
        self.last_round_id
    }

    /// The latest observed block timestamp.
    pub fn last_timestamp(&self) -> Result<Duration, InternalError> {
        self.last_timestamp
            .ok_or_else(|| InternalError::new("last timestamp is not set"))
    }

    /// The state produced by the last completed round, if any.
    pub fn latest_result(&self) -> Option<&PeriodState> {
        self.round_results.last()
    }

    /// The replicated state: the latest result, or the initial state.
    pub fn state(&self) -> &PeriodState {
        self.latest_result().unwrap_or(&self.initial_state)
    }

    /// Whether the period has reached a final round.
    pub fn is_finished(&self) -> bool {
        self.current_round.is_none()
    }

    /// Validate a transaction against the current round, without mutating it.
    pub fn check_transaction(&self, transaction: &Transaction) -> Result<(), AppError> {
        let round = self.current_round.as_deref().ok_or_else(|| {
            InternalError::new("period is finished, cannot accept new transactions")
        })?;
        self.check_late_arriving(transaction)?;
        round.check_transaction(transaction)?;
        Ok(())
    }

    /// Apply a transaction to the current round's accumulator.
    pub fn process_transaction(&mut self, transaction: &Transaction) -> Result<(), AppError> {
        if let Some(previous) = self.previous_round_tx_type {
            if transaction.payload().transaction_type() == previous {
                return Err(TransactionError::LateArriving(previous.to_owned()).into());
            }
        }
        let round = self.current_round.as_deref_mut().ok_or_else(|| {
            InternalError::new("period is finished, cannot accept new transactions")
        })?;
        round.check_allowed_tx_type(transaction)?;
        round.process_payload(transaction.payload().clone())?;
        Ok(())
    }

    /// Apply a round event: look up the transition and swap rounds.
    ///
    /// `result` is the verdict state of the finishing round; `None` means the
    /// round was ended preemptively (timeout) and the state is carried over
    /// unchanged. Events with no wired transition are logged and ignored,
    /// the engine cannot be trusted to deliver only known events.
    pub fn process_event(
        &mut self,
        event: E,
        result: Option<PeriodState>,
    ) -> Result<(), InternalError> {
        let Some(current) = self.current_round.as_deref() else {
            info!(?event, "cannot process event: current round is not set");
            return Ok(());
        };
        let current_id = current.round_id();

        let Some(next_id) = self.config.next_round(current_id, &event) else {
            warn!(round = current_id, ?event, "no transition for event, ignoring");
            return Ok(());
        };

        let result_state = match result {
            Some(state) => state,
            // the round ended without a verdict, carry its state forward
            None => current.period_state().clone(),
        };
        self.round_results.push(result_state);
        info!(round = current_id, ?event, "round is done");
        self.last_round_id = Some(current_id);

        if self.config.is_final(next_id) {
            info!(round = next_id, "period has reached a final round");
            self.cancel_outstanding_timeouts();
            self.previous_round_tx_type = None;
            self.current_round = None;
            return Ok(());
        }
        self.schedule_round(next_id)
    }

    /// Observe the timestamp of a new block and fire expired timeouts.
    ///
    /// Every timeout whose deadline is at or before `timestamp` fires, in
    /// deadline order, each through [`AbciApp::process_event`].
    pub fn update_time(&mut self, timestamp: Duration) -> Result<(), InternalError> {
        debug!(?timestamp, last = ?self.last_timestamp, "observed block timestamp");
        self.timeouts.pop_earliest_cancelled_timeouts();

        loop {
            let expired = match self.timeouts.get_earliest_timeout() {
                Some((deadline, _)) if deadline <= timestamp => true,
                _ => false,
            };
            if !expired {
                break;
            }
            let Some((deadline, event)) = self.timeouts.pop_timeout() else {
                break;
            };
            warn!(?deadline, ?event, ?timestamp, "timeout expired");
            // advance time first so timeouts of the next round are scheduled
            // against the new block's timestamp
            self.last_timestamp = Some(timestamp);
            self.process_event(event, None)?;
            self.timeouts.pop_earliest_cancelled_timeouts();
        }

        self.last_timestamp = Some(timestamp);
        Ok(())
    }

    fn check_late_arriving(&self, transaction: &Transaction) -> Result<(), TransactionError> {
        if let Some(previous) = self.previous_round_tx_type {
            if transaction.payload().transaction_type() == previous {
                return Err(TransactionError::LateArriving(previous.to_owned()));
            }
        }
        Ok(())
    }

    /// Instantiate `round_id` as the current round.
    ///
    /// Cancels the outgoing round's timeouts and schedules a timeout for each
    /// of the new round's outgoing events that has one configured.
    fn schedule_round(&mut self, round_id: RoundId) -> Result<(), InternalError> {
        debug!(round = round_id, "scheduling new round");
        self.cancel_outstanding_timeouts();

        if let Some(last_timestamp) = self.last_timestamp {
            let timeouts: Vec<(E, Duration)> = self
                .config
                .outgoing_events(round_id)
                .filter_map(|event| {
                    self.config
                        .timeout_for(event)
                        .map(|duration| (event.clone(), duration))
                })
                .collect();
            for (event, duration) in timeouts {
                let deadline = last_timestamp + duration;
                info!(?event, ?duration, ?deadline, "scheduling timeout");
                let entry_id = self.timeouts.add_timeout(deadline, event);
                self.current_timeout_entries.push(entry_id);
            }
        }

        let state = self
            .round_results
            .last()
            .cloned()
            .unwrap_or_else(|| self.initial_state.clone());
        let factory = self.config.factory(round_id).ok_or_else(|| {
            InternalError::new(format!("no factory registered for round '{round_id}'"))
        })?;
        let new_round = factory(state, self.consensus_params);

        // A transaction tagged like the previous round is late-arriving, not
        // unknown. Except when both rounds admit the same tag: flagging it
        // would block the new round's own input.
        let previous_type = self
            .current_round
            .as_deref()
            .and_then(|round| round.allowed_tx_type());
        self.previous_round_tx_type = match (previous_type, new_round.allowed_tx_type()) {
            (Some(previous), Some(current)) if previous == current => None,
            (previous, _) => previous,
        };

        info!(round = round_id, "entered round");
        self.current_round = Some(new_round);
        Ok(())
    }

    fn cancel_outstanding_timeouts(&mut self) {
        for entry_id in self.current_timeout_entries.drain(..) {
            // entries that already fired are gone from the queue; nothing to do
            let _ = self.timeouts.cancel_timeout(entry_id);
        }
    }
}

impl<E: fmt::Debug> fmt::Debug for AbciApp<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbciApp")
            .field(
                "current_round",
                &self.current_round.as_ref().map(|round| round.round_id()),
            )
            .field("last_round_id", &self.last_round_id)
            .field("last_timestamp", &self.last_timestamp)
            .field("round_results", &self.round_results.len())
            .field("pending_timeouts", &self.timeouts.size())
            .finish()
    }
}
