//! Static wiring of a period: rounds, transitions, timeouts, final rounds.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use rondo_types::{ConsensusParams, InternalError};

use crate::round::{Round, RoundId};
use crate::state::PeriodState;

/// Builds a fresh round instance over the given state.
pub type RoundFactory<E> = Box<dyn Fn(PeriodState, ConsensusParams) -> Box<dyn Round<E>>>;

/// The transition structure of a period.
///
/// A flat table keyed by stable round ids: each round has a factory, each
/// `(round, event)` pair maps to the next round id, and events may carry a
/// timeout. Populated at startup and validated once; read-only afterwards.
pub struct AbciAppConfig<E> {
    initial_round: RoundId,
    factories: BTreeMap<RoundId, RoundFactory<E>>,
    transitions: BTreeMap<RoundId, BTreeMap<E, RoundId>>,
    event_to_timeout: BTreeMap<E, Duration>,
    final_rounds: BTreeSet<RoundId>,
}

impl<E: Clone + Ord + fmt::Debug> AbciAppConfig<E> {
    /// Start a configuration with the period's initial round.
    pub fn new(initial_round: RoundId) -> Self {
        Self {
            initial_round,
            factories: BTreeMap::new(),
            transitions: BTreeMap::new(),
            event_to_timeout: BTreeMap::new(),
            final_rounds: BTreeSet::new(),
        }
    }

    /// Register a round and its factory.
    pub fn with_round(
        mut self,
        round_id: RoundId,
        factory: impl Fn(PeriodState, ConsensusParams) -> Box<dyn Round<E>> + 'static,
    ) -> Self {
        self.factories.insert(round_id, Box::new(factory));
        self
    }

    /// Register a transition.
    pub fn with_transition(mut self, from: RoundId, event: E, to: RoundId) -> Self {
        self.transitions.entry(from).or_default().insert(event, to);
        self
    }

    /// Attach a timeout to an event.
    pub fn with_timeout(mut self, event: E, duration: Duration) -> Self {
        self.event_to_timeout.insert(event, duration);
        self
    }

    /// Mark a round id as final: reaching it ends the period.
    pub fn with_final_round(mut self, round_id: RoundId) -> Self {
        self.final_rounds.insert(round_id);
        self
    }

    /// The period's initial round.
    pub fn initial_round(&self) -> RoundId {
        self.initial_round
    }

    /// Whether the round id marks the end of the period.
    pub fn is_final(&self, round_id: RoundId) -> bool {
        self.final_rounds.contains(round_id)
    }

    /// The timeout attached to an event, if any.
    pub fn timeout_for(&self, event: &E) -> Option<Duration> {
        self.event_to_timeout.get(event).copied()
    }

    /// The target of a `(round, event)` pair, if one is wired.
    pub fn next_round(&self, from: RoundId, event: &E) -> Option<RoundId> {
        self.transitions.get(from)?.get(event).copied()
    }

    /// The factory for a round id.
    pub fn factory(&self, round_id: RoundId) -> Option<&RoundFactory<E>> {
        self.factories.get(round_id)
    }

    /// The events leading out of a round.
    pub fn outgoing_events(&self, round_id: RoundId) -> impl Iterator<Item = &E> {
        self.transitions
            .get(round_id)
            .into_iter()
            .flat_map(|transitions| transitions.keys())
    }

    /// Check the structural consistency of the wiring.
    ///
    /// Violations are configuration bugs, caught once at startup:
    /// - the initial round must have a factory and must not be final;
    /// - every transition source needs a factory, every target a factory or a
    ///   final marker;
    /// - final rounds cannot have outgoing transitions;
    /// - every non-final round needs at least one non-timeout way out and at
    ///   most one timeout way out.
    pub fn validate(&self) -> Result<(), InternalError> {
        if !self.factories.contains_key(self.initial_round) {
            return Err(InternalError::new(format!(
                "initial round '{}' has no factory",
                self.initial_round
            )));
        }
        if self.final_rounds.contains(self.initial_round) {
            return Err(InternalError::new(format!(
                "initial round '{}' cannot be a final round",
                self.initial_round
            )));
        }

        for (from, transitions) in &self.transitions {
            if self.final_rounds.contains(from) {
                return Err(InternalError::new(format!(
                    "final round '{from}' cannot have outgoing transitions"
                )));
            }
            if !self.factories.contains_key(from) {
                return Err(InternalError::new(format!(
                    "round '{from}' has transitions but no factory"
                )));
            }
            for to in transitions.values() {
                if !self.factories.contains_key(to) && !self.final_rounds.contains(to) {
                    return Err(InternalError::new(format!(
                        "transition target '{to}' is neither a registered round nor final"
                    )));
                }
            }
        }

        for round_id in self.factories.keys().copied() {
            let mut timeout_events = 0usize;
            let mut other_events = 0usize;
            for event in self.outgoing_events(round_id) {
                if self.event_to_timeout.contains_key(event) {
                    timeout_events += 1;
                } else {
                    other_events += 1;
                }
            }
            if other_events == 0 {
                return Err(InternalError::new(format!(
                    "round '{round_id}' must have at least one non-timeout transition"
                )));
            }
            if timeout_events > 1 {
                return Err(InternalError::new(format!(
                    "round '{round_id}' cannot have more than one outgoing timeout event"
                )));
            }
        }
        Ok(())
    }
}

impl<E: fmt::Debug> fmt::Debug for AbciAppConfig<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbciAppConfig")
            .field("initial_round", &self.initial_round)
            .field("rounds", &self.factories.keys().collect::<Vec<_>>())
            .field("transitions", &self.transitions)
            .field("event_to_timeout", &self.event_to_timeout)
            .field("final_rounds", &self.final_rounds)
            .finish()
    }
}
