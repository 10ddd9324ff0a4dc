//! JSON payloads carried inside protocol frames.

use rkyv::{Archive, Deserialize, Serialize};
use serde_json::Value;

use crate::Error;

/// An application payload, stored as JSON-encoded bytes.
///
/// The protocol does not interpret payloads. Arguments, replies and pushed
/// updates are arbitrary JSON values; encoding them as bytes keeps the frame
/// envelope non-recursive for rkyv.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct Payload(pub Vec<u8>);

impl Payload {
    /// Encode a JSON value as a payload.
    pub fn from_value(value: &Value) -> Result<Self, Error> {
        serde_json::to_vec(value)
            .map(Payload)
            .map_err(|e| Error::Serialization(format!("failed to encode payload: {}", e)))
    }

    /// Decode the payload back into a JSON value.
    pub fn to_value(&self) -> Result<Value, Error> {
        serde_json::from_slice(&self.0)
            .map_err(|e| Error::Deserialization(format!("failed to decode payload: {}", e)))
    }

    /// Encode a list of JSON values.
    pub fn encode_all(values: &[Value]) -> Result<Vec<Payload>, Error> {
        values.iter().map(Payload::from_value).collect()
    }

    /// Decode a list of payloads.
    pub fn decode_all(payloads: &[Payload]) -> Result<Vec<Value>, Error> {
        payloads.iter().map(Payload::to_value).collect()
    }

    /// Size of the encoded payload in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the payload is empty (never true for a valid JSON payload).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
