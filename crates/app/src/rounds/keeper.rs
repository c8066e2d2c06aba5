//! Round where only the designated keeper sends a payload.

use std::fmt;

use serde_json::Value;

use rondo_types::{Address, ConsensusParams, InternalError, TransactionError, TxPayload};

use crate::round::{Round, RoundContext, RoundId};
use crate::state::PeriodState;

/// Wiring for [`OnlyKeeperSendsRound`].
#[derive(Clone, Debug)]
pub struct OnlyKeeperSendsConfig<E> {
    /// Stable round identifier.
    pub round_id: RoundId,
    /// The only payload tag the round admits.
    pub allowed_tx_type: &'static str,
    /// The payload data field carrying the keeper's result.
    pub payload_attribute: &'static str,
    /// State key receiving the keeper's value on success.
    pub payload_key: &'static str,
    /// Event emitted when the keeper delivered a non-null value.
    pub done_event: E,
    /// Event emitted when the keeper delivered a null value.
    pub fail_event: E,
}

/// Holds the single payload of the participant elected as keeper.
///
/// The keeper is read from the period state under the
/// [`MOST_VOTED_KEEPER_KEY`](crate::state::MOST_VOTED_KEEPER_KEY) convention;
/// a second payload, or one from anybody else, is rejected.
pub struct OnlyKeeperSendsRound<E> {
    config: OnlyKeeperSendsConfig<E>,
    context: RoundContext,
    keeper_payload: Option<Value>,
    keeper_sent_payload: bool,
}

impl<E> OnlyKeeperSendsRound<E> {
    /// Start the round over the given state.
    pub fn new(
        config: OnlyKeeperSendsConfig<E>,
        state: PeriodState,
        params: ConsensusParams,
    ) -> Self {
        let context = RoundContext::new(config.round_id, config.allowed_tx_type, state, params);
        Self {
            config,
            context,
            keeper_payload: None,
            keeper_sent_payload: false,
        }
    }

    /// Whether the keeper has delivered its payload.
    pub fn has_keeper_sent_payload(&self) -> bool {
        self.keeper_sent_payload
    }

    fn admission_error(&self, payload: &TxPayload) -> Result<Option<String>, InternalError> {
        let sender = payload.sender();
        if !self.context.state().is_participant(sender) {
            let participants: Vec<&str> = self
                .context
                .state()
                .sorted_participants()
                .map(Address::as_str)
                .collect();
            return Ok(Some(format!(
                "{sender} not in list of participants: {participants:?}"
            )));
        }
        let keeper = self.context.state().most_voted_keeper_address()?;
        if *sender != keeper {
            return Ok(Some(format!("{sender} not elected as keeper")));
        }
        if self.keeper_sent_payload {
            return Ok(Some("keeper already set the payload".to_owned()));
        }
        Ok(None)
    }
}

impl<E: Clone + fmt::Debug> Round<E> for OnlyKeeperSendsRound<E> {
    fn context(&self) -> &RoundContext {
        &self.context
    }

    fn check_payload(&self, payload: &TxPayload) -> Result<(), TransactionError> {
        match self.admission_error(payload) {
            Ok(None) => Ok(()),
            Ok(Some(message)) => Err(TransactionError::NotValid(message)),
            // a keeper round without an elected keeper is a wiring bug, but
            // through this path the engine only needs to reject the tx
            Err(internal) => Err(TransactionError::NotValid(internal.to_string())),
        }
    }

    fn process_payload(&mut self, payload: TxPayload) -> Result<(), InternalError> {
        match self.admission_error(&payload)? {
            Some(message) => Err(InternalError::new(message)),
            None => {
                self.keeper_payload =
                    Some(payload.attribute(self.config.payload_attribute).clone());
                self.keeper_sent_payload = true;
                Ok(())
            }
        }
    }

    fn end_block(&mut self) -> Option<(PeriodState, E)> {
        if !self.keeper_sent_payload {
            return None;
        }
        match &self.keeper_payload {
            Some(value) if !value.is_null() => {
                let state = self
                    .context
                    .state()
                    .update([(self.config.payload_key.to_owned(), value.clone())]);
                Some((state, self.config.done_event.clone()))
            }
            _ => Some((self.context.state().clone(), self.config.fail_event.clone())),
        }
    }
}

impl<E> fmt::Debug for OnlyKeeperSendsRound<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnlyKeeperSendsRound")
            .field("round_id", &self.config.round_id)
            .field("keeper_sent_payload", &self.keeper_sent_payload)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MOST_VOTED_KEEPER_KEY;
    use rondo_types::test_utils::{observation, test_participants};
    use serde_json::json;

    #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
    enum Event {
        Done,
        Fail,
    }

    fn keeper_round() -> OnlyKeeperSendsRound<Event> {
        let state = PeriodState::with_data(
            test_participants(4),
            [(MOST_VOTED_KEEPER_KEY.to_owned(), json!("0x00"))],
        );
        OnlyKeeperSendsRound::new(
            OnlyKeeperSendsConfig {
                round_id: "deploy",
                allowed_tx_type: "observation",
                payload_attribute: "value",
                payload_key: "deployed_contract",
                done_event: Event::Done,
                fail_event: Event::Fail,
            },
            state,
            ConsensusParams::new(4),
        )
    }

    #[test]
    fn only_the_keeper_may_send() {
        let participants = test_participants(4);
        let mut round = keeper_round();

        assert!(matches!(
            round.check_payload(&observation(&participants[1], json!("0xcafe"))),
            Err(TransactionError::NotValid(_))
        ));

        let payload = observation(&participants[0], json!("0xcafe"));
        assert!(round.check_payload(&payload).is_ok());
        round.process_payload(payload).unwrap();
        assert!(round.has_keeper_sent_payload());

        let (state, event) = round.end_block().unwrap();
        assert_eq!(event, Event::Done);
        assert_eq!(state.get("deployed_contract"), Some(&json!("0xcafe")));
    }

    #[test]
    fn second_keeper_payload_is_rejected() {
        let participants = test_participants(4);
        let mut round = keeper_round();
        round
            .process_payload(observation(&participants[0], json!("first")))
            .unwrap();
        assert!(matches!(
            round.check_payload(&observation(&participants[0], json!("second"))),
            Err(TransactionError::NotValid(_))
        ));
        assert!(round
            .process_payload(observation(&participants[0], json!("second")))
            .is_err());
    }

    #[test]
    fn null_keeper_payload_emits_fail() {
        let participants = test_participants(4);
        let mut round = keeper_round();
        assert!(round.end_block().is_none());
        round
            .process_payload(observation(&participants[0], Value::Null))
            .unwrap();
        let (_, event) = round.end_block().unwrap();
        assert_eq!(event, Event::Fail);
    }

    #[test]
    fn missing_keeper_election_fails_processing() {
        let participants = test_participants(4);
        let state = PeriodState::new(participants.clone());
        let mut round = OnlyKeeperSendsRound::new(
            OnlyKeeperSendsConfig {
                round_id: "deploy",
                allowed_tx_type: "observation",
                payload_attribute: "value",
                payload_key: "deployed_contract",
                done_event: Event::Done,
                fail_event: Event::Fail,
            },
            state,
            ConsensusParams::new(4),
        );
        assert!(round
            .process_payload(observation(&participants[0], json!("x")))
            .is_err());
    }
}
