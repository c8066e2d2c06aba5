//! Replicated period state.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use rondo_types::{Address, InternalError};

/// State key under which the elected keeper is stored, by convention.
pub const MOST_VOTED_KEEPER_KEY: &str = "most_voted_keeper_address";

/// The replicated application state at the start of the current round.
///
/// An immutable value object: [`PeriodState::update`] returns a new state
/// with the named entries shadowed, the original is never mutated. The
/// participant set is fixed at construction; everything the rounds agree on
/// rides in the named-value map.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeriodState {
    participants: BTreeSet<Address>,
    data: BTreeMap<String, Value>,
}

impl PeriodState {
    /// Create a state with the given participant set and no named values.
    pub fn new(participants: impl IntoIterator<Item = Address>) -> Self {
        Self {
            participants: participants.into_iter().collect(),
            data: BTreeMap::new(),
        }
    }

    /// Create a state with participants and initial named values.
    pub fn with_data(
        participants: impl IntoIterator<Item = Address>,
        data: impl IntoIterator<Item = (String, Value)>,
    ) -> Self {
        Self {
            participants: participants.into_iter().collect(),
            data: data.into_iter().collect(),
        }
    }

    /// The participant set.
    pub fn participants(&self) -> &BTreeSet<Address> {
        &self.participants
    }

    /// Number of participants.
    pub fn nb_participants(&self) -> usize {
        self.participants.len()
    }

    /// Participants in their canonical (sorted) order.
    pub fn sorted_participants(&self) -> impl Iterator<Item = &Address> {
        self.participants.iter()
    }

    /// Whether the address is a participant of this period.
    pub fn is_participant(&self, address: &Address) -> bool {
        self.participants.contains(address)
    }

    /// Look up a named value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Look up a named value; its absence is a programmer error.
    pub fn get_strict(&self, key: &str) -> Result<&Value, InternalError> {
        self.data
            .get(key)
            .ok_or_else(|| InternalError::new(format!("'{key}' field is not set for period state")))
    }

    /// The participant elected to send this round's sole payload.
    pub fn most_voted_keeper_address(&self) -> Result<Address, InternalError> {
        match self.get_strict(MOST_VOTED_KEEPER_KEY)? {
            Value::String(address) => Ok(Address::new(address.clone())),
            other => Err(InternalError::new(format!(
                "'{MOST_VOTED_KEEPER_KEY}' must be a string, got {other}"
            ))),
        }
    }

    /// Copy the state, shadowing the named entries.
    pub fn update(&self, entries: impl IntoIterator<Item = (String, Value)>) -> Self {
        let mut next = self.clone();
        next.data.extend(entries);
        next
    }
}
