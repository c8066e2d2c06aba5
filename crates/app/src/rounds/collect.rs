//! Collection-based round variants.

use std::fmt;

use serde_json::Value;

use rondo_types::{
    check_majority_possible_with_new_voter, is_majority_possible, serializer, ConsensusParams,
    InternalError, TransactionError, TxPayload,
};

use crate::round::{Collection, Round, RoundContext, RoundId};
use crate::state::PeriodState;

/// Wiring for [`CollectDifferentUntilAllRound`].
#[derive(Clone, Debug)]
pub struct CollectDifferentUntilAllConfig<E> {
    /// Stable round identifier.
    pub round_id: RoundId,
    /// The only payload tag the round admits.
    pub allowed_tx_type: &'static str,
    /// The payload data field whose values must be pairwise distinct.
    pub payload_attribute: &'static str,
    /// State key receiving the collected payloads on completion.
    pub collection_key: &'static str,
    /// State key receiving the contributing senders on completion.
    pub selection_key: &'static str,
    /// Event emitted once every participant has contributed.
    pub done_event: E,
}

/// Collects one distinct value from every participant.
///
/// Complete only when all `n` participants have contributed. Used for
/// registration-style rounds where each participant brings its own value.
pub struct CollectDifferentUntilAllRound<E> {
    config: CollectDifferentUntilAllConfig<E>,
    context: RoundContext,
    collection: Collection,
}

impl<E> CollectDifferentUntilAllRound<E> {
    /// Start the round over the given state.
    pub fn new(
        config: CollectDifferentUntilAllConfig<E>,
        state: PeriodState,
        params: ConsensusParams,
    ) -> Self {
        let context = RoundContext::new(config.round_id, config.allowed_tx_type, state, params);
        Self {
            config,
            context,
            collection: Collection::new(),
        }
    }

    /// Whether every participant has contributed.
    pub fn collection_threshold_reached(&self) -> bool {
        self.collection.len() >= self.context.params().max_participants()
    }

    fn admission_error(&self, payload: &TxPayload) -> Option<String> {
        if let Some(message) =
            self.collection
                .admission_error(self.context.state(), payload, self.config.round_id)
        {
            return Some(message);
        }
        let key = serializer::to_canonical_string(payload.attribute(self.config.payload_attribute));
        if self.collection.tally(self.config.payload_attribute).contains_key(&key) {
            return Some(format!(
                "value {key} has already been sent for round: {}",
                self.config.round_id
            ));
        }
        None
    }
}

impl<E: Clone + fmt::Debug> Round<E> for CollectDifferentUntilAllRound<E> {
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
        self.collection.insert(payload);
        Ok(())
    }

    fn end_block(&mut self) -> Option<(PeriodState, E)> {
        if !self.collection_threshold_reached() {
            return None;
        }
        let state = self.context.state().update([
            (
                self.config.selection_key.to_owned(),
                self.collection.senders_value(),
            ),
            (
                self.config.collection_key.to_owned(),
                self.collection.to_value(),
            ),
        ]);
        Some((state, self.config.done_event.clone()))
    }
}

impl<E> fmt::Debug for CollectDifferentUntilAllRound<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectDifferentUntilAllRound")
            .field("round_id", &self.config.round_id)
            .field("collected", &self.collection.len())
            .finish()
    }
}

/// Wiring for [`CollectSameUntilThresholdRound`].
#[derive(Clone, Debug)]
pub struct CollectSameConfig<E> {
    /// Stable round identifier.
    pub round_id: RoundId,
    /// The only payload tag the round admits.
    pub allowed_tx_type: &'static str,
    /// The payload data field being voted on.
    pub payload_attribute: &'static str,
    /// State key receiving the collected payloads on completion.
    pub collection_key: &'static str,
    /// State key receiving the agreed value on completion.
    pub selection_key: &'static str,
    /// Event emitted when a non-null value reaches the quorum.
    pub done_event: E,
    /// Event emitted when the agreed value is null.
    pub none_event: E,
    /// Event emitted when no value can reach the quorum anymore.
    pub no_majority_event: E,
}

/// Collects the same value from a quorum of participants.
pub struct CollectSameUntilThresholdRound<E> {
    config: CollectSameConfig<E>,
    context: RoundContext,
    collection: Collection,
}

impl<E> CollectSameUntilThresholdRound<E> {
    /// Start the round over the given state.
    pub fn new(config: CollectSameConfig<E>, state: PeriodState, params: ConsensusParams) -> Self {
        let context = RoundContext::new(config.round_id, config.allowed_tx_type, state, params);
        Self {
            config,
            context,
            collection: Collection::new(),
        }
    }

    /// Whether some value has reached the quorum.
    pub fn threshold_reached(&self) -> bool {
        self.most_voted()
            .map_or(false, |(_, count)| count >= self.context.consensus_threshold())
    }

    /// The value that reached the quorum.
    ///
    /// Asking before the threshold is reached is a programmer error.
    pub fn most_voted_payload(&self) -> Result<Value, InternalError> {
        match self.most_voted() {
            Some((value, count)) if count >= self.context.consensus_threshold() => Ok(value),
            _ => Err(InternalError::new("not enough votes")),
        }
    }

    fn most_voted(&self) -> Option<(Value, usize)> {
        self.collection.most_voted(self.config.payload_attribute)
    }
}

impl<E: Clone + fmt::Debug> Round<E> for CollectSameUntilThresholdRound<E> {
    fn context(&self) -> &RoundContext {
        &self.context
    }

    fn check_payload(&self, payload: &TxPayload) -> Result<(), TransactionError> {
        match self
            .collection
            .admission_error(self.context.state(), payload, self.config.round_id)
        {
            Some(message) => Err(TransactionError::NotValid(message)),
            None => Ok(()),
        }
    }

    fn process_payload(&mut self, payload: TxPayload) -> Result<(), InternalError> {
        if let Some(message) =
            self.collection
                .admission_error(self.context.state(), &payload, self.config.round_id)
        {
            return Err(InternalError::new(message));
        }
        // Abort as soon as divergent votes make the quorum unreachable,
        // instead of waiting for the remaining participants.
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
        if let Some((value, count)) = self.most_voted() {
            if count >= self.context.consensus_threshold() {
                if value.is_null() {
                    return Some((self.context.state().clone(), self.config.none_event.clone()));
                }
                let state = self.context.state().update([
                    (
                        self.config.collection_key.to_owned(),
                        self.collection.to_value(),
                    ),
                    (self.config.selection_key.to_owned(), value),
                ]);
                return Some((state, self.config.done_event.clone()));
            }
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

impl<E> fmt::Debug for CollectSameUntilThresholdRound<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectSameUntilThresholdRound")
            .field("round_id", &self.config.round_id)
            .field("collected", &self.collection.len())
            .finish()
    }
}

/// Wiring for [`CollectDifferentUntilThresholdRound`].
#[derive(Clone, Debug)]
pub struct CollectDifferentUntilThresholdConfig<E> {
    /// Stable round identifier.
    pub round_id: RoundId,
    /// The only payload tag the round admits.
    pub allowed_tx_type: &'static str,
    /// The payload data field tallied for the majority backstop.
    pub payload_attribute: &'static str,
    /// State key receiving the collected payloads on completion.
    pub collection_key: &'static str,
    /// State key receiving the contributing senders on completion.
    pub selection_key: &'static str,
    /// Event emitted once a quorum of participants has contributed.
    pub done_event: E,
    /// Event emitted when no value can reach the quorum anymore.
    pub no_majority_event: E,
    /// Extra end-blocks the threshold must hold before the verdict,
    /// giving slower participants time to join.
    pub required_block_confirmations: usize,
}

/// Collects payloads, no value constraint, from a quorum of participants.
pub struct CollectDifferentUntilThresholdRound<E> {
    config: CollectDifferentUntilThresholdConfig<E>,
    context: RoundContext,
    collection: Collection,
    block_confirmations: usize,
}

impl<E> CollectDifferentUntilThresholdRound<E> {
    /// Start the round over the given state.
    pub fn new(
        config: CollectDifferentUntilThresholdConfig<E>,
        state: PeriodState,
        params: ConsensusParams,
    ) -> Self {
        let context = RoundContext::new(config.round_id, config.allowed_tx_type, state, params);
        Self {
            config,
            context,
            collection: Collection::new(),
            block_confirmations: 0,
        }
    }

    /// Whether a quorum of participants has contributed.
    pub fn collection_threshold_reached(&self) -> bool {
        self.collection.len() >= self.context.consensus_threshold()
    }
}

impl<E: Clone + fmt::Debug> Round<E> for CollectDifferentUntilThresholdRound<E> {
    fn context(&self) -> &RoundContext {
        &self.context
    }

    fn check_payload(&self, payload: &TxPayload) -> Result<(), TransactionError> {
        match self
            .collection
            .admission_error(self.context.state(), payload, self.config.round_id)
        {
            Some(message) => Err(TransactionError::NotValid(message)),
            None => Ok(()),
        }
    }

    fn process_payload(&mut self, payload: TxPayload) -> Result<(), InternalError> {
        if let Some(message) =
            self.collection
                .admission_error(self.context.state(), &payload, self.config.round_id)
        {
            return Err(InternalError::new(message));
        }
        self.collection.insert(payload);
        Ok(())
    }

    fn end_block(&mut self) -> Option<(PeriodState, E)> {
        if self.collection_threshold_reached() {
            self.block_confirmations += 1;
        }
        if self.collection_threshold_reached()
            && self.block_confirmations > self.config.required_block_confirmations
        {
            let state = self.context.state().update([
                (
                    self.config.selection_key.to_owned(),
                    self.collection.senders_value(),
                ),
                (
                    self.config.collection_key.to_owned(),
                    self.collection.to_value(),
                ),
            ]);
            return Some((state, self.config.done_event.clone()));
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

impl<E> fmt::Debug for CollectDifferentUntilThresholdRound<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectDifferentUntilThresholdRound")
            .field("round_id", &self.config.round_id)
            .field("collected", &self.collection.len())
            .field("block_confirmations", &self.block_confirmations)
            .finish()
    }
}

/// Wiring for [`CollectNonEmptyUntilThresholdRound`].
#[derive(Clone, Debug)]
pub struct CollectNonEmptyUntilThresholdConfig<E> {
    /// Stable round identifier.
    pub round_id: RoundId,
    /// The only payload tag the round admits.
    pub allowed_tx_type: &'static str,
    /// The payload data field whose non-null values are kept.
    pub payload_attribute: &'static str,
    /// State key receiving the non-null values on completion.
    pub collection_key: &'static str,
    /// State key receiving the contributing senders on completion.
    pub selection_key: &'static str,
    /// Event emitted when at least one non-null value was collected.
    pub done_event: E,
    /// Event emitted when every collected value was null.
    pub none_event: E,
    /// Event emitted when no value can reach the quorum anymore.
    pub no_majority_event: E,
    /// Extra end-blocks the threshold must hold before the verdict.
    pub required_block_confirmations: usize,
}

/// Collects optional values from a quorum and keeps only the non-null ones.
///
/// Useful when every participant reports but only some have data, such as
/// late-arriving observations.
pub struct CollectNonEmptyUntilThresholdRound<E> {
    config: CollectNonEmptyUntilThresholdConfig<E>,
    context: RoundContext,
    collection: Collection,
    block_confirmations: usize,
}

impl<E> CollectNonEmptyUntilThresholdRound<E> {
    /// Start the round over the given state.
    pub fn new(
        config: CollectNonEmptyUntilThresholdConfig<E>,
        state: PeriodState,
        params: ConsensusParams,
    ) -> Self {
        let context = RoundContext::new(config.round_id, config.allowed_tx_type, state, params);
        Self {
            config,
            context,
            collection: Collection::new(),
            block_confirmations: 0,
        }
    }

    /// Whether a quorum of participants has contributed.
    pub fn collection_threshold_reached(&self) -> bool {
        self.collection.len() >= self.context.consensus_threshold()
    }

    fn non_empty_values(&self) -> Vec<Value> {
        self.collection
            .payloads()
            .map(|payload| payload.attribute(self.config.payload_attribute))
            .filter(|value| !value.is_null())
            .cloned()
            .collect()
    }
}

impl<E: Clone + fmt::Debug> Round<E> for CollectNonEmptyUntilThresholdRound<E> {
    fn context(&self) -> &RoundContext {
        &self.context
    }

    fn check_payload(&self, payload: &TxPayload) -> Result<(), TransactionError> {
        match self
            .collection
            .admission_error(self.context.state(), payload, self.config.round_id)
        {
            Some(message) => Err(TransactionError::NotValid(message)),
            None => Ok(()),
        }
    }

    fn process_payload(&mut self, payload: TxPayload) -> Result<(), InternalError> {
        if let Some(message) =
            self.collection
                .admission_error(self.context.state(), &payload, self.config.round_id)
        {
            return Err(InternalError::new(message));
        }
        self.collection.insert(payload);
        Ok(())
    }

    fn end_block(&mut self) -> Option<(PeriodState, E)> {
        if self.collection_threshold_reached() {
            self.block_confirmations += 1;
        }
        if self.collection_threshold_reached()
            && self.block_confirmations > self.config.required_block_confirmations
        {
            let non_empty = self.non_empty_values();
            let all_null = non_empty.is_empty();
            let state = self.context.state().update([
                (
                    self.config.selection_key.to_owned(),
                    self.collection.senders_value(),
                ),
                (self.config.collection_key.to_owned(), Value::Array(non_empty)),
            ]);
            let event = if all_null {
                self.config.none_event.clone()
            } else {
                self.config.done_event.clone()
            };
            return Some((state, event));
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

impl<E> fmt::Debug for CollectNonEmptyUntilThresholdRound<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectNonEmptyUntilThresholdRound")
            .field("round_id", &self.config.round_id)
            .field("collected", &self.collection.len())
            .finish()
    }
}
