//! Payload variants, codec, and the transaction-type registry.
//!
//! A payload is the unit a participant submits to a round: a variant tag, a
//! sender address, a unique id, and the variant's data fields. The registry
//! maps tags to variant declarations so the correct shape can be recovered at
//! decode time. It is populated once at startup and read-only thereafter.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::TransactionError;
use crate::identifiers::{Address, TxId};
use crate::serializer;

/// Keys every payload carries in its wire form; variant data may not use them.
const RESERVED_KEYS: [&str; 3] = ["transaction_type", "sender", "id"];

/// Fatal configuration error while populating the registry.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Two variants declared the same tag.
    #[error("transaction type '{0}' already registered")]
    DuplicateTransactionType(String),

    /// A variant declared a reserved key as a data field.
    #[error("field '{0}' is reserved and cannot be a payload data field")]
    ReservedField(&'static str),
}

/// Declaration of one payload variant.
///
/// `fields` is the exact set of data fields the variant carries on the wire.
/// Every field is always present; `null` is a legal value for optional data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PayloadKind {
    transaction_type: &'static str,
    fields: &'static [&'static str],
}

impl PayloadKind {
    /// Declare a payload variant.
    pub const fn new(transaction_type: &'static str, fields: &'static [&'static str]) -> Self {
        Self {
            transaction_type,
            fields,
        }
    }

    /// The variant tag.
    pub fn transaction_type(&self) -> &'static str {
        self.transaction_type
    }

    /// The declared data fields.
    pub fn fields(&self) -> &'static [&'static str] {
        self.fields
    }
}

/// Registry of payload variants, keyed by transaction type.
#[derive(Debug, Default)]
pub struct PayloadRegistry {
    kinds: BTreeMap<&'static str, PayloadKind>,
}

impl PayloadRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a payload variant.
    ///
    /// Duplicate tags are a fatal configuration error: the registry must be
    /// populated at startup, before any payload is decoded.
    pub fn register(&mut self, kind: PayloadKind) -> Result<(), RegistryError> {
        if let Some(field) = kind.fields.iter().copied().find(|f| RESERVED_KEYS.contains(f)) {
            return Err(RegistryError::ReservedField(field));
        }
        if self.kinds.contains_key(kind.transaction_type) {
            return Err(RegistryError::DuplicateTransactionType(
                kind.transaction_type.to_owned(),
            ));
        }
        self.kinds.insert(kind.transaction_type, kind);
        Ok(())
    }

    /// Look up a variant by tag.
    pub fn get(&self, transaction_type: &str) -> Option<&PayloadKind> {
        self.kinds.get(transaction_type)
    }
}

/// A concrete payload value.
///
/// Created by a participant, encoded, signed, and transmitted; decoded and
/// verified on the receiving side; consumed by exactly one round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxPayload {
    transaction_type: String,
    sender: Address,
    id: TxId,
    data: BTreeMap<String, Value>,
}

impl TxPayload {
    /// Author a payload with a fresh random id.
    pub fn new(
        kind: &PayloadKind,
        sender: Address,
        data: impl IntoIterator<Item = (String, Value)>,
    ) -> Result<Self, TransactionError> {
        Self::with_id(kind, sender, TxId::random(), data)
    }

    /// Author a payload with an explicit id.
    pub fn with_id(
        kind: &PayloadKind,
        sender: Address,
        id: TxId,
        data: impl IntoIterator<Item = (String, Value)>,
    ) -> Result<Self, TransactionError> {
        let data: BTreeMap<String, Value> = data.into_iter().collect();
        check_fields(kind, &data)?;
        Ok(Self {
            transaction_type: kind.transaction_type.to_owned(),
            sender,
            id,
            data,
        })
    }

    /// The variant tag.
    pub fn transaction_type(&self) -> &str {
        &self.transaction_type
    }

    /// The authoring participant.
    pub fn sender(&self) -> &Address {
        &self.sender
    }

    /// The unique transaction id.
    pub fn id(&self) -> &TxId {
        &self.id
    }

    /// The variant data fields.
    pub fn data(&self) -> &BTreeMap<String, Value> {
        &self.data
    }

    /// A single data field, `Value::Null` if the field is absent.
    pub fn attribute(&self, field: &str) -> &Value {
        self.data.get(field).unwrap_or(&Value::Null)
    }

    /// The payload's JSON object form: reserved keys plus data fields.
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        map.insert(
            "transaction_type".to_owned(),
            Value::String(self.transaction_type.clone()),
        );
        map.insert(
            "sender".to_owned(),
            Value::String(self.sender.as_str().to_owned()),
        );
        map.insert("id".to_owned(), Value::String(self.id.as_str().to_owned()));
        for (key, value) in &self.data {
            map.insert(key.clone(), value.clone());
        }
        Value::Object(map)
    }

    /// Encode to canonical bytes.
    ///
    /// Two equal payloads encode to byte-identical output on every node; this
    /// is what signatures are computed over.
    pub fn encode(&self) -> Vec<u8> {
        serializer::to_canonical_bytes(&self.to_json())
    }

    /// Decode from bytes, recovering the variant through the registry.
    pub fn decode(bytes: &[u8], registry: &PayloadRegistry) -> Result<Self, TransactionError> {
        let value = serializer::from_bytes(bytes)?;
        Self::from_json(value, registry)
    }

    /// Build a payload from its JSON object form.
    pub fn from_json(value: Value, registry: &PayloadRegistry) -> Result<Self, TransactionError> {
        let Value::Object(mut map) = value else {
            return Err(TransactionError::Malformed(
                "payload must be a JSON object".to_owned(),
            ));
        };

        let transaction_type = take_string(&mut map, "transaction_type")?;
        let kind = registry
            .get(&transaction_type)
            .ok_or_else(|| TransactionError::TypeNotRecognized(transaction_type.clone()))?;
        let sender = Address::new(take_string(&mut map, "sender")?);
        let id = TxId::new(take_string(&mut map, "id")?);

        let data: BTreeMap<String, Value> = map.into_iter().collect();
        check_fields(kind, &data)?;

        Ok(Self {
            transaction_type,
            sender,
            id,
            data,
        })
    }
}

fn check_fields(kind: &PayloadKind, data: &BTreeMap<String, Value>) -> Result<(), TransactionError> {
    for field in kind.fields {
        if !data.contains_key(*field) {
            return Err(TransactionError::Malformed(format!(
                "payload '{}' is missing field '{field}'",
                kind.transaction_type
            )));
        }
    }
    for key in data.keys() {
        if !kind.fields.contains(&key.as_str()) {
            return Err(TransactionError::Malformed(format!(
                "payload '{}' has undeclared field '{key}'",
                kind.transaction_type
            )));
        }
    }
    Ok(())
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> Result<String, TransactionError> {
    match map.remove(key) {
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(TransactionError::Malformed(format!(
            "'{key}' must be a string"
        ))),
        None => Err(TransactionError::Malformed(format!("'{key}' is required"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const OBSERVATION: PayloadKind = PayloadKind::new("observation", &["value"]);
    const VOTE: PayloadKind = PayloadKind::new("vote", &["vote"]);

    fn registry() -> PayloadRegistry {
        let mut registry = PayloadRegistry::new();
        registry.register(OBSERVATION).unwrap();
        registry.register(VOTE).unwrap();
        registry
    }

    #[test]
    fn duplicate_tag_is_fatal() {
        let mut registry = registry();
        assert_eq!(
            registry.register(PayloadKind::new("vote", &["other"])),
            Err(RegistryError::DuplicateTransactionType("vote".to_owned()))
        );
    }

    #[test]
    fn reserved_field_is_rejected_at_registration() {
        let mut registry = PayloadRegistry::new();
        assert_eq!(
            registry.register(PayloadKind::new("bad", &["sender"])),
            Err(RegistryError::ReservedField("sender"))
        );
    }

    #[test]
    fn round_trip() {
        let registry = registry();
        let payload = TxPayload::new(
            &OBSERVATION,
            Address::from("0xaa"),
            [("value".to_owned(), json!("1.5"))],
        )
        .unwrap();
        let decoded = TxPayload::decode(&payload.encode(), &registry).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn encoding_is_canonical() {
        // Same fields, different construction order, identical bytes.
        let a = TxPayload::with_id(
            &PayloadKind::new("multi", &["x", "y"]),
            Address::from("0xaa"),
            TxId::new("00000000000000000000000000000001"),
            [("x".to_owned(), json!(1)), ("y".to_owned(), json!(2))],
        )
        .unwrap();
        let b = TxPayload::with_id(
            &PayloadKind::new("multi", &["x", "y"]),
            Address::from("0xaa"),
            TxId::new("00000000000000000000000000000001"),
            [("y".to_owned(), json!(2)), ("x".to_owned(), json!(1))],
        )
        .unwrap();
        assert_eq!(a.encode(), b.encode());
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let registry = registry();
        let bytes =
            br#"{"id":"00","sender":"0xaa","transaction_type":"mystery","value":"1"}"#.to_vec();
        assert_eq!(
            TxPayload::decode(&bytes, &registry),
            Err(TransactionError::TypeNotRecognized("mystery".to_owned()))
        );
    }

    #[test]
    fn missing_field_is_malformed() {
        let registry = registry();
        let bytes = br#"{"id":"00","sender":"0xaa","transaction_type":"observation"}"#.to_vec();
        assert!(matches!(
            TxPayload::decode(&bytes, &registry),
            Err(TransactionError::Malformed(_))
        ));
    }

    #[test]
    fn undeclared_field_is_malformed() {
        let registry = registry();
        let bytes = br#"{"extra":1,"id":"00","sender":"0xaa","transaction_type":"vote","vote":true}"#
            .to_vec();
        assert!(matches!(
            TxPayload::decode(&bytes, &registry),
            Err(TransactionError::Malformed(_))
        ));
    }

    #[test]
    fn null_field_values_are_legal() {
        let registry = registry();
        let payload = TxPayload::new(
            &VOTE,
            Address::from("0xaa"),
            [("vote".to_owned(), Value::Null)],
        )
        .unwrap();
        let decoded = TxPayload::decode(&payload.encode(), &registry).unwrap();
        assert_eq!(decoded.attribute("vote"), &Value::Null);
    }
}
