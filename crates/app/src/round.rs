//! The round abstraction.
//!
//! A round is a bounded phase of a period: it admits payloads of a single
//! transaction type from the participants, accumulates them, and produces a
//! verdict at the end of a consensus block. A round may be read and mutated
//! only between `begin_block` and `end_block` of a single block.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Value};

use rondo_types::{
    serializer, Address, ConsensusParams, InternalError, Transaction, TransactionError, TxPayload,
};

use crate::state::PeriodState;

/// Stable identifier of a round kind within a period.
pub type RoundId = &'static str;

/// What every round carries: identity, admitted tag, state, and parameters.
#[derive(Clone, Debug)]
pub struct RoundContext {
    round_id: RoundId,
    allowed_tx_type: Option<&'static str>,
    state: PeriodState,
    params: ConsensusParams,
}

impl RoundContext {
    /// Build the context for a round admitting `allowed_tx_type` payloads.
    pub fn new(
        round_id: RoundId,
        allowed_tx_type: &'static str,
        state: PeriodState,
        params: ConsensusParams,
    ) -> Self {
        Self {
            round_id,
            allowed_tx_type: Some(allowed_tx_type),
            state,
            params,
        }
    }

    /// The round identifier.
    pub fn round_id(&self) -> RoundId {
        self.round_id
    }

    /// The only payload tag this round admits, if any.
    pub fn allowed_tx_type(&self) -> Option<&'static str> {
        self.allowed_tx_type
    }

    /// The replicated state at the start of the round.
    pub fn state(&self) -> &PeriodState {
        &self.state
    }

    /// The consensus parameters.
    pub fn params(&self) -> &ConsensusParams {
        &self.params
    }

    /// The Byzantine quorum for this period's committee.
    pub fn consensus_threshold(&self) -> usize {
        self.params.consensus_threshold()
    }
}

/// A phase of the period, generic over the application's event type.
///
/// `check_payload` must be side-effect free: a transaction that fails it is
/// rejected by the engine and the round state stays untouched. Processing a
/// payload that would not pass the check is a programmer error and surfaces
/// as [`InternalError`].
pub trait Round<E>: fmt::Debug {
    /// The round's context.
    fn context(&self) -> &RoundContext;

    /// Validate a payload against the current round state.
    fn check_payload(&self, payload: &TxPayload) -> Result<(), TransactionError>;

    /// Apply a payload to the round's accumulator.
    fn process_payload(&mut self, payload: TxPayload) -> Result<(), InternalError>;

    /// Produce the round's verdict, if it is complete.
    ///
    /// The verdict state is a new value derived from the round's starting
    /// state; the event drives the period's transition table. Reads of the
    /// accumulated data happen here, once per consensus block, never per
    /// transaction.
    fn end_block(&mut self) -> Option<(PeriodState, E)>;

    /// The round identifier.
    fn round_id(&self) -> RoundId {
        self.context().round_id()
    }

    /// The only payload tag this round admits.
    fn allowed_tx_type(&self) -> Option<&'static str> {
        self.context().allowed_tx_type()
    }

    /// The replicated state at the start of the round.
    fn period_state(&self) -> &PeriodState {
        self.context().state()
    }

    /// Reject transactions whose payload tag the round does not admit.
    fn check_allowed_tx_type(&self, transaction: &Transaction) -> Result<(), TransactionError> {
        let tx_type = transaction.payload().transaction_type();
        match self.allowed_tx_type() {
            Some(allowed) if tx_type == allowed => Ok(()),
            _ => Err(TransactionError::TypeNotRecognized(tx_type.to_owned())),
        }
    }

    /// Full admission check: tag first, then the payload itself.
    fn check_transaction(&self, transaction: &Transaction) -> Result<(), TransactionError> {
        self.check_allowed_tx_type(transaction)?;
        self.check_payload(transaction.payload())
    }
}

/// Accumulator of one payload per sender.
///
/// Backing store for the collection round family. Iteration is key-sorted so
/// every tally and tie-break is deterministic across replicas.
#[derive(Clone, Debug, Default)]
pub struct Collection {
    entries: BTreeMap<Address, TxPayload>,
}

impl Collection {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Why the payload cannot be admitted, if it cannot.
    ///
    /// Shared by `check_payload` (engine rejection) and `process_payload`
    /// (programmer error) so both report the same condition.
    pub fn admission_error(
        &self,
        state: &PeriodState,
        payload: &TxPayload,
        round_id: RoundId,
    ) -> Option<String> {
        let sender = payload.sender();
        if !state.is_participant(sender) {
            let participants: Vec<&str> =
                state.sorted_participants().map(Address::as_str).collect();
            return Some(format!(
                "{sender} not in list of participants: {participants:?}"
            ));
        }
        if self.entries.contains_key(sender) {
            return Some(format!(
                "sender {sender} has already sent value for round: {round_id}"
            ));
        }
        None
    }

    /// Insert a payload, keyed by sender.
    pub fn insert(&mut self, payload: TxPayload) {
        self.entries.insert(payload.sender().clone(), payload);
    }

    /// Number of payloads collected.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been collected yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the sender has already contributed.
    pub fn contains_sender(&self, sender: &Address) -> bool {
        self.entries.contains_key(sender)
    }

    /// The collected payloads, in sender order.
    pub fn payloads(&self) -> impl Iterator<Item = &TxPayload> {
        self.entries.values()
    }

    /// The contributing senders, in sorted order.
    pub fn senders(&self) -> impl Iterator<Item = &Address> {
        self.entries.keys()
    }

    /// Per-sender vote keys for the given payload attribute.
    ///
    /// The key is the canonical JSON encoding of the attribute value, which
    /// gives buckets a total order.
    pub fn vote_keys(&self, attribute: &str) -> BTreeMap<Address, String> {
        self.entries
            .iter()
            .map(|(sender, payload)| {
                (
                    sender.clone(),
                    serializer::to_canonical_string(payload.attribute(attribute)),
                )
            })
            .collect()
    }

    /// Bucketed tally of the given payload attribute.
    pub fn tally(&self, attribute: &str) -> BTreeMap<String, (Value, usize)> {
        let mut buckets: BTreeMap<String, (Value, usize)> = BTreeMap::new();
        for payload in self.entries.values() {
            let value = payload.attribute(attribute);
            let key = serializer::to_canonical_string(value);
            buckets
                .entry(key)
                .and_modify(|(_, count)| *count += 1)
                .or_insert_with(|| (value.clone(), 1));
        }
        buckets
    }

    /// The most voted attribute value and its count.
    ///
    /// Ties go to the value with the lexicographically smallest canonical
    /// encoding, identically on every replica.
    pub fn most_voted(&self, attribute: &str) -> Option<(Value, usize)> {
        let mut best: Option<(Value, usize)> = None;
        for (_, (value, count)) in self.tally(attribute) {
            // strict '>' keeps the earliest (smallest-key) bucket on ties
            if best.as_ref().map_or(true, |(_, max)| count > *max) {
                best = Some((value, count));
            }
        }
        best
    }

    /// The collection as a JSON object mapping sender to payload.
    ///
    /// Used to record the round's raw input into the period state.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        for (sender, payload) in &self.entries {
            map.insert(sender.as_str().to_owned(), payload.to_json());
        }
        Value::Object(map)
    }

    /// The contributing senders as a sorted JSON array.
    pub fn senders_value(&self) -> Value {
        Value::Array(
            self.entries
                .keys()
                .map(|sender| Value::String(sender.as_str().to_owned()))
                .collect(),
        )
    }
}
