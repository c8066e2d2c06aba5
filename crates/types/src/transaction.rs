//! Transaction envelope: a payload paired with its sender's signature.

use serde_json::{Map, Value};

use crate::error::TransactionError;
use crate::identifiers::Address;
use crate::payload::{PayloadRegistry, TxPayload};
use crate::serializer;

/// Signature verification collaborator.
///
/// The framework never touches key material; it hands the canonical payload
/// bytes to this trait and acts on the boolean answer. Implementations wrap
/// the ledger-specific recovery/verification routine.
pub trait Verifier {
    /// Check that `signature_hex` over `message` was produced by `sender`.
    fn verify(
        &self,
        ledger_id: &str,
        sender: &Address,
        message: &[u8],
        signature_hex: &str,
    ) -> bool;
}

/// A signed payload, as delivered by the consensus engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    payload: TxPayload,
    signature: String,
}

impl Transaction {
    /// Wrap a payload with its signature.
    pub fn new(payload: TxPayload, signature: impl Into<String>) -> Self {
        Self {
            payload,
            signature: signature.into(),
        }
    }

    /// The enclosed payload.
    pub fn payload(&self) -> &TxPayload {
        &self.payload
    }

    /// The signature over the canonical payload bytes, hex encoded.
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Consume the envelope and return the payload.
    pub fn into_payload(self) -> TxPayload {
        self.payload
    }

    /// Encode to canonical bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut map = Map::new();
        map.insert("payload".to_owned(), self.payload.to_json());
        map.insert(
            "signature".to_owned(),
            Value::String(self.signature.clone()),
        );
        serializer::to_canonical_bytes(&Value::Object(map))
    }

    /// Decode from bytes, recovering the payload variant through the registry.
    pub fn decode(bytes: &[u8], registry: &PayloadRegistry) -> Result<Self, TransactionError> {
        let value = serializer::from_bytes(bytes)?;
        let Value::Object(mut map) = value else {
            return Err(TransactionError::Malformed(
                "transaction must be a JSON object".to_owned(),
            ));
        };
        let signature = match map.remove("signature") {
            Some(Value::String(s)) => s,
            _ => {
                return Err(TransactionError::Malformed(
                    "'signature' must be a string".to_owned(),
                ))
            }
        };
        let payload_value = map
            .remove("payload")
            .ok_or_else(|| TransactionError::Malformed("'payload' is required".to_owned()))?;
        let payload = TxPayload::from_json(payload_value, registry)?;
        Ok(Self { payload, signature })
    }

    /// Verify the signature against the canonical payload bytes.
    pub fn verify(&self, ledger_id: &str, verifier: &dyn Verifier) -> Result<(), TransactionError> {
        let message = self.payload.encode();
        if verifier.verify(ledger_id, self.payload.sender(), &message, &self.signature) {
            Ok(())
        } else {
            Err(TransactionError::SignatureNotValid(
                self.payload.sender().clone(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::PayloadKind;
    use crate::test_utils::{AllowAllVerifier, RejectAllVerifier};
    use serde_json::json;

    const OBSERVATION: PayloadKind = PayloadKind::new("observation", &["value"]);

    fn registry() -> PayloadRegistry {
        let mut registry = PayloadRegistry::new();
        registry.register(OBSERVATION).unwrap();
        registry
    }

    fn sample_payload() -> TxPayload {
        TxPayload::new(
            &OBSERVATION,
            Address::from("0xaa"),
            [("value".to_owned(), json!("1.5"))],
        )
        .unwrap()
    }

    #[test]
    fn round_trip() {
        let registry = registry();
        let tx = Transaction::new(sample_payload(), "deadbeef");
        let decoded = Transaction::decode(&tx.encode(), &registry).unwrap();
        assert_eq!(decoded, tx);
    }

    #[test]
    fn verify_delegates_to_collaborator() {
        let tx = Transaction::new(sample_payload(), "deadbeef");
        assert!(tx.verify("ethereum", &AllowAllVerifier).is_ok());
        assert_eq!(
            tx.verify("ethereum", &RejectAllVerifier),
            Err(TransactionError::SignatureNotValid(Address::from("0xaa")))
        );
    }

    #[test]
    fn missing_signature_is_malformed() {
        let registry = registry();
        assert!(matches!(
            Transaction::decode(br#"{"payload":{}}"#, &registry),
            Err(TransactionError::Malformed(_))
        ));
    }
}
