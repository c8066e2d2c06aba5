//! End-to-end tests driving a period through the engine-facing lifecycle.
//!
//! A four-participant committee (quorum 3) runs a small application:
//! collect an observation, vote on it, then let the elected keeper deploy
//! the result.
//!
//! ```text
//! collect --Done--> validate --Done--> deploy --Done--> finished
//!    ^  ^              |                  |
//!    |  '--Negative----'                  |
//!    '-------------Fail-------------------'
//! ```

use std::time::Duration;

use serde_json::{json, Value};

use rondo_app::{
    AbciApp, AbciAppConfig, AppError, Period, PeriodState, Round, MOST_VOTED_KEEPER_KEY,
};
use rondo_app::rounds::{
    CollectSameConfig, CollectSameUntilThresholdRound, OnlyKeeperSendsConfig,
    OnlyKeeperSendsRound, VotingConfig, VotingRound,
};
use rondo_types::test_utils::{test_participants, AllowAllVerifier, RejectAllVerifier};
use rondo_types::{
    Address, BlockHeight, ConsensusParams, Header, InternalError, PayloadKind, PayloadRegistry,
    Transaction, TransactionError, TxId, TxPayload, Verifier,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Event {
    Done,
    Negative,
    NoMajority,
    RoundTimeout,
    Fail,
}

const OBSERVATION: PayloadKind = PayloadKind::new("observation", &["value"]);
const VOTE: PayloadKind = PayloadKind::new("vote", &["vote"]);
const DEPLOYMENT: PayloadKind = PayloadKind::new("deployment", &["value"]);

fn registry() -> PayloadRegistry {
    let mut registry = PayloadRegistry::new();
    registry.register(OBSERVATION).unwrap();
    registry.register(VOTE).unwrap();
    registry.register(DEPLOYMENT).unwrap();
    registry
}

fn app_config() -> AbciAppConfig<Event> {
    AbciAppConfig::new("collect")
        .with_round("collect", |state, params| {
            Box::new(CollectSameUntilThresholdRound::new(
                CollectSameConfig {
                    round_id: "collect",
                    allowed_tx_type: "observation",
                    payload_attribute: "value",
                    collection_key: "participant_to_observation",
                    selection_key: "most_voted_observation",
                    done_event: Event::Done,
                    none_event: Event::NoMajority,
                    no_majority_event: Event::NoMajority,
                },
                state,
                params,
            )) as Box<dyn Round<Event>>
        })
        .with_round("validate", |state, params| {
            Box::new(VotingRound::new(
                VotingConfig {
                    round_id: "validate",
                    allowed_tx_type: "vote",
                    payload_attribute: "vote",
                    collection_key: "participant_to_votes",
                    done_event: Event::Done,
                    negative_event: Event::Negative,
                    none_event: Event::NoMajority,
                    no_majority_event: Event::NoMajority,
                },
                state,
                params,
            )) as Box<dyn Round<Event>>
        })
        .with_round("deploy", |state, params| {
            Box::new(OnlyKeeperSendsRound::new(
                OnlyKeeperSendsConfig {
                    round_id: "deploy",
                    allowed_tx_type: "deployment",
                    payload_attribute: "value",
                    payload_key: "deployed_contract",
                    done_event: Event::Done,
                    fail_event: Event::Fail,
                },
                state,
                params,
            )) as Box<dyn Round<Event>>
        })
        .with_transition("collect", Event::Done, "validate")
        .with_transition("collect", Event::NoMajority, "collect")
        .with_transition("collect", Event::RoundTimeout, "collect")
        .with_transition("validate", Event::Done, "deploy")
        .with_transition("validate", Event::Negative, "collect")
        .with_transition("validate", Event::NoMajority, "collect")
        .with_transition("deploy", Event::Done, "finished")
        .with_transition("deploy", Event::Fail, "collect")
        .with_timeout(Event::RoundTimeout, Duration::from_secs(30))
        .with_final_round("finished")
}

fn new_period_with(verifier: Box<dyn Verifier>) -> Period<Event> {
    let state = PeriodState::with_data(
        test_participants(4),
        [(MOST_VOTED_KEEPER_KEY.to_owned(), json!("0x00"))],
    );
    let app = AbciApp::new(app_config(), state, ConsensusParams::new(4)).unwrap();
    let mut period = Period::new(app, registry(), verifier, "ethereum");
    period.setup().unwrap();
    period
}

fn new_period() -> Period<Event> {
    new_period_with(Box::new(AllowAllVerifier))
}

fn header(height: u64, secs: u64) -> Header {
    Header {
        height: BlockHeight(height),
        timestamp: Duration::from_secs(secs),
        proposer: Address::from("0x00"),
    }
}

fn tx(kind: &PayloadKind, sender: &Address, field: &str, value: Value) -> Transaction {
    let payload = TxPayload::with_id(
        kind,
        sender.clone(),
        TxId::random(),
        [(field.to_owned(), value)],
    )
    .unwrap();
    Transaction::new(payload, "deadbeef")
}

/// Run one full block: begin, deliver every transaction, end, commit.
fn run_block(period: &mut Period<Event>, height: u64, secs: u64, transactions: Vec<Transaction>) {
    period.begin_block(header(height, secs)).unwrap();
    for transaction in transactions {
        period.deliver_tx(transaction).unwrap();
    }
    period.end_block().unwrap();
    period.commit().unwrap();
}

#[test]
fn collect_same_happy_path() {
    let participants = test_participants(4);
    let mut period = new_period();
    assert_eq!(period.current_round_id(), Some("collect"));

    let observations = participants[..3]
        .iter()
        .map(|sender| tx(&OBSERVATION, sender, "value", json!("x")))
        .collect();
    run_block(&mut period, 1, 0, observations);

    assert_eq!(period.current_round_id(), Some("validate"));
    assert_eq!(period.last_round_id(), Some("collect"));
    assert_eq!(period.height(), BlockHeight(1));
    assert_eq!(
        period.latest_state().get("most_voted_observation"),
        Some(&json!("x"))
    );
}

#[test]
fn divergent_observations_fast_fail() {
    let participants = test_participants(4);
    let mut period = new_period();

    period.begin_block(header(1, 0)).unwrap();
    period
        .deliver_tx(tx(&OBSERVATION, &participants[0], "value", json!("x")))
        .unwrap();
    period
        .deliver_tx(tx(&OBSERVATION, &participants[1], "value", json!("y")))
        .unwrap();

    // remaining=1 + largest=1 < 3: the third divergent vote is refused
    let err = period
        .deliver_tx(tx(&OBSERVATION, &participants[2], "value", json!("z")))
        .unwrap_err();
    assert!(matches!(err, AppError::Internal(InternalError(_))));

    // no verdict, the round carries on
    period.end_block().unwrap();
    period.commit().unwrap();
    assert_eq!(period.current_round_id(), Some("collect"));
    assert_eq!(period.height(), BlockHeight(1));
}

#[test]
fn negative_vote_returns_to_collect() {
    let participants = test_participants(4);
    let mut period = new_period();

    let observations = participants[..3]
        .iter()
        .map(|sender| tx(&OBSERVATION, sender, "value", json!("x")))
        .collect();
    run_block(&mut period, 1, 0, observations);
    assert_eq!(period.current_round_id(), Some("validate"));

    let votes = participants[..3]
        .iter()
        .map(|sender| tx(&VOTE, sender, "vote", json!(false)))
        .collect();
    run_block(&mut period, 2, 10, votes);

    assert_eq!(period.current_round_id(), Some("collect"));
    assert_eq!(period.last_round_id(), Some("validate"));
}

#[test]
fn keeper_round_and_period_completion() {
    let participants = test_participants(4);
    let mut period = new_period();

    let observations = participants[..3]
        .iter()
        .map(|sender| tx(&OBSERVATION, sender, "value", json!("x")))
        .collect();
    run_block(&mut period, 1, 0, observations);

    let votes = participants[..3]
        .iter()
        .map(|sender| tx(&VOTE, sender, "vote", json!(true)))
        .collect();
    run_block(&mut period, 2, 10, votes);
    assert_eq!(period.current_round_id(), Some("deploy"));

    period.begin_block(header(3, 20)).unwrap();
    // only the elected keeper (0x00) may send
    let err = period
        .deliver_tx(tx(&DEPLOYMENT, &participants[1], "value", json!("0xcafe")))
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::Transaction(TransactionError::NotValid(_))
    ));
    period
        .deliver_tx(tx(&DEPLOYMENT, &participants[0], "value", json!("0xcafe")))
        .unwrap();
    period.end_block().unwrap();
    period.commit().unwrap();

    assert!(period.is_finished());
    assert_eq!(
        period.latest_state().get("deployed_contract"),
        Some(&json!("0xcafe"))
    );
    // a finished period accepts no further blocks
    assert!(period.begin_block(header(4, 30)).is_err());
}

#[test]
fn timeout_fires_on_late_block() {
    let participants = test_participants(4);
    let mut period = new_period();

    let observations = participants[..3]
        .iter()
        .map(|sender| tx(&OBSERVATION, sender, "value", json!("x")))
        .collect();
    run_block(&mut period, 1, 0, observations);

    // the negative outcome re-enters collect, scheduling its timeout at 10+30
    let votes = participants[..3]
        .iter()
        .map(|sender| tx(&VOTE, sender, "vote", json!(false)))
        .collect();
    run_block(&mut period, 2, 10, votes);
    assert_eq!(period.current_round_id(), Some("collect"));
    assert_eq!(period.last_round_id(), Some("validate"));

    // an empty block lands past the deadline: the timeout restarts collect
    run_block(&mut period, 3, 41, vec![]);
    assert_eq!(period.current_round_id(), Some("collect"));
    assert_eq!(period.last_round_id(), Some("collect"));
    assert_eq!(period.height(), BlockHeight(3));
    assert_eq!(period.last_timestamp().unwrap(), Duration::from_secs(41));
}

#[test]
fn block_height_gap_is_rejected() {
    let mut period = new_period();

    for height in 1..=3u64 {
        period.begin_block(header(height, height)).unwrap();
        period.end_block().unwrap();
        period.commit().unwrap();
    }
    assert_eq!(period.height(), BlockHeight(3));

    // the engine skips ahead: the commit must fail and leave the chain as-is
    period.begin_block(header(5, 5)).unwrap();
    period.end_block().unwrap();
    let err = period.commit().unwrap_err();
    assert!(matches!(err, AppError::AddBlock(_)));
    assert_eq!(period.height(), BlockHeight(3));
}

#[test]
fn raw_transactions_are_decoded_and_verified() {
    let participants = test_participants(4);
    let mut period = new_period();
    period.begin_block(header(1, 0)).unwrap();

    let encoded = tx(&OBSERVATION, &participants[0], "value", json!("x")).encode();
    period.deliver_raw(&encoded).unwrap();

    // unknown payload tag
    let mystery = PayloadKind::new("mystery", &["value"]);
    let unknown = tx(&mystery, &participants[1], "value", json!("x")).encode();
    assert!(matches!(
        period.deliver_raw(&unknown).unwrap_err(),
        AppError::Transaction(TransactionError::TypeNotRecognized(_))
    ));

    // undecodable bytes
    assert!(matches!(
        period.deliver_raw(b"not json").unwrap_err(),
        AppError::Transaction(TransactionError::Malformed(_))
    ));
}

#[test]
fn invalid_signature_is_rejected() {
    let participants = test_participants(4);
    let mut period = new_period_with(Box::new(RejectAllVerifier));
    period.begin_block(header(1, 0)).unwrap();

    let encoded = tx(&OBSERVATION, &participants[0], "value", json!("x")).encode();
    assert!(matches!(
        period.deliver_raw(&encoded).unwrap_err(),
        AppError::Transaction(TransactionError::SignatureNotValid(_))
    ));
}

#[test]
fn out_of_phase_callbacks_are_internal_errors() {
    let mut period = new_period();

    assert!(period.end_block().is_err());
    assert!(period.commit().is_err());

    period.begin_block(header(1, 0)).unwrap();
    assert!(period.begin_block(header(2, 1)).is_err());
    period.end_block().unwrap();

    let participants = test_participants(4);
    let err = period
        .deliver_tx(tx(&OBSERVATION, &participants[0], "value", json!("x")))
        .unwrap_err();
    assert!(matches!(err, AppError::Internal(_)));
    period.commit().unwrap();
}
