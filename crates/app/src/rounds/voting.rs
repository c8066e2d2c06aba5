//! Boolean voting round.

use std::fmt;

use serde_json::Value;

use rondo_types::{
    check_majority_possible_with_new_voter, is_majority_possible, serializer, ConsensusParams,
    InternalError, TransactionError, TxPayload,
};

use crate::round::{Collection, Round, RoundContext, RoundId};
use crate::state::PeriodState;

/// Wiring for [`VotingRound`].
#[derive(Clone, Debug)]
pub struct VotingConfig<E> {
    /// Stable round identifier.
    pub round_id: RoundId,
    /// The only payload tag the round admits.
    pub allowed_tx_type: &'static str,
    /// The payload data field carrying the boolean vote.
    pub payload_attribute: &'static str,
    /// State key receiving the vote collection on a positive outcome.
    pub collection_key: &'static str,
    /// Event emitted when `true` reaches the quorum.
    pub done_event: E,
    /// Event emitted when `false` reaches the quorum.
    pub negative_event: E,
    /// Event emitted when `null` reaches the quorum.
    pub none_event: E,
    /// Event emitted when no outcome can reach the quorum anymore.
    pub no_majority_event: E,
}

/// Collects boolean votes; passes when a quorum agrees on `true`.
///
/// At any tally at most one of the three outcomes can hold the quorum, so
/// the emitted events are mutually exclusive.
pub struct VotingRound<E> {
    config: VotingConfig<E>,
    context: RoundContext,
    collection: Collection,
}

impl<E> VotingRound<E> {
    /// Start the round over the given state.
    pub fn new(config: VotingConfig<E>, state: PeriodState, params: ConsensusParams) -> Self {
        let context = RoundContext::new(config.round_id, config.allowed_tx_type, state, params);
        Self {
            config,
            context,
            collection: Collection::new(),
        }
    }

    /// Number of votes for the given value.
    fn vote_count(&self, vote: &Value) -> usize {
        let key = serializer::to_canonical_string(vote);
        self.collection
            .tally(self.config.payload_attribute)
            .get(&key)
            .map_or(0, |(_, count)| *count)
    }

    /// Whether `true` votes have reached the quorum.
    pub fn positive_vote_threshold_reached(&self) -> bool {
        self.vote_count(&Value::Bool(true)) >= self.context.consensus_threshold()
    }

    /// Whether `false` votes have reached the quorum.
    pub fn negative_vote_threshold_reached(&self) -> bool {
        self.vote_count(&Value::Bool(false)) >= self.context.consensus_threshold()
    }

    /// Whether `null` votes have reached the quorum.
    pub fn none_vote_threshold_reached(&self) -> bool {
        self.vote_count(&Value::Null) >= self.context.consensus_threshold()
    }

    fn admission_error(&self, payload: &TxPayload) -> Option<String> {
        if let Some(message) =
            self.collection
                .admission_error(self.context.state(), payload, self.config.round_id)
        {
            return Some(message);
        }
        match payload.attribute(self.config.payload_attribute) {
            Value::Bool(_) | Value::Null => None,
            other => Some(format!(
                "vote must be a boolean or null, got {other}"
            )),
        }
    }
}

impl<E: Clone + fmt::Debug> Round<E> for VotingRound<E> {
    fn context(&self) -> &RoundContext {
        &self.context
    }

    fn check_payload(&self, payload: &TxPayload) -> Result<(), TransactionError> {
        match self.admission_error(payload) {
            Some(message) => Err(TransactionError::NotValid(message)),
            None => Ok(()),
        }
    }

    fn process_payload(&mut self, payload: TxPayload) -> Result<(), InternalError> {
        if let Some(message) = self.admission_error(&payload) {
            return Err(InternalError::new(message));
        }
        let vote_key =
            serializer::to_canonical_string(payload.attribute(self.config.payload_attribute));
        check_majority_possible_with_new_voter(
            &self.collection.vote_keys(self.config.payload_attribute),
            payload.sender(),
            &vote_key,
            self.context.state().nb_participants(),
        )
        .map_err(|e| InternalError::new(e.to_string()))?;

        self.collection.insert(payload);
        Ok(())
    }

    fn end_block(&mut self) -> Option<(PeriodState, E)> {
        if self.positive_vote_threshold_reached() {
            let state = self.context.state().update([(
                self.config.collection_key.to_owned(),
                self.collection.to_value(),
            )]);
            return Some((state, self.config.done_event.clone()));
        }
        if self.negative_vote_threshold_reached() {
            return Some((
                self.context.state().clone(),
                self.config.negative_event.clone(),
            ));
        }
        if self.none_vote_threshold_reached() {
            return Some((self.context.state().clone(), self.config.none_event.clone()));
        }
        if !is_majority_possible(
            &self.collection.vote_keys(self.config.payload_attribute),
            self.context.state().nb_participants(),
        ) {
            return Some((
                self.context.state().clone(),
                self.config.no_majority_event.clone(),
            ));
        }
        None
    }
}

impl<E> fmt::Debug for VotingRound<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VotingRound")
            .field("round_id", &self.config.round_id)
            .field("collected", &self.collection.len())
            .finish()
    }
}
