//! Test fixtures shared across the workspace.

use serde_json::Value;

use crate::identifiers::{Address, TxId};
use crate::payload::{PayloadKind, PayloadRegistry, TxPayload};
use crate::transaction::{Transaction, Verifier};

/// Payload variant carrying a single free-form `value` field.
pub const OBSERVATION_KIND: PayloadKind = PayloadKind::new("observation", &["value"]);

/// Payload variant carrying a boolean (or null) `vote` field.
pub const VOTE_KIND: PayloadKind = PayloadKind::new("vote", &["vote"]);

/// Verifier that accepts every signature.
pub struct AllowAllVerifier;

impl Verifier for AllowAllVerifier {
    fn verify(&self, _: &str, _: &Address, _: &[u8], _: &str) -> bool {
        true
    }
}

/// Verifier that rejects every signature.
pub struct RejectAllVerifier;

impl Verifier for RejectAllVerifier {
    fn verify(&self, _: &str, _: &Address, _: &[u8], _: &str) -> bool {
        false
    }
}

/// A registry with the fixture payload kinds installed.
pub fn test_registry() -> PayloadRegistry {
    let mut registry = PayloadRegistry::new();
    registry.register(OBSERVATION_KIND).expect("fresh registry");
    registry.register(VOTE_KIND).expect("fresh registry");
    registry
}

/// A deterministic committee of `n` addresses: 0x00, 0x01, ...
pub fn test_participants(n: usize) -> Vec<Address> {
    (0..n).map(|i| Address::new(format!("0x{i:02}"))).collect()
}

/// An observation payload with a deterministic id derived from the sender.
pub fn observation(sender: &Address, value: Value) -> TxPayload {
    TxPayload::with_id(
        &OBSERVATION_KIND,
        sender.clone(),
        TxId::new(format!("{:0>32}", sender.as_str().trim_start_matches("0x"))),
        [("value".to_owned(), value)],
    )
    .expect("declared field")
}

/// A vote payload with a deterministic id derived from the sender.
pub fn vote(sender: &Address, vote: Value) -> TxPayload {
    TxPayload::with_id(
        &VOTE_KIND,
        sender.clone(),
        TxId::new(format!("{:0>32}", sender.as_str().trim_start_matches("0x"))),
        [("vote".to_owned(), vote)],
    )
    .expect("declared field")
}

/// Wrap a payload in a transaction with a placeholder signature.
pub fn signed(payload: TxPayload) -> Transaction {
    Transaction::new(payload, "deadbeef")
}
