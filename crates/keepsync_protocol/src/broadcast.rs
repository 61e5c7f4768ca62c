//! Cross-instance broadcast message.

use keepsync_codec::{from_cbor, to_canonical_cbor, CodecError, CodecResult, Value};

/// What happened to a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastPayload {
    /// The document was written (full body).
    Write(Value),
    /// The document with this id was removed.
    Remove(String),
}

/// A mirror write posted by one application instance to its peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastMessage {
    /// Id of the posting instance; receivers ignore their own messages.
    pub origin: u64,
    /// Entity type name.
    pub entity_type: String,
    /// The write or removal.
    pub payload: BroadcastPayload,
}

impl BroadcastMessage {
    /// A document write.
    pub fn write(origin: u64, entity_type: impl Into<String>, doc: Value) -> Self {
        Self {
            origin,
            entity_type: entity_type.into(),
            payload: BroadcastPayload::Write(doc),
        }
    }

    /// A document removal.
    pub fn remove(origin: u64, entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            origin,
            entity_type: entity_type.into(),
            payload: BroadcastPayload::Remove(id.into()),
        }
    }

    /// Converts to a value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let body = match &self.payload {
            BroadcastPayload::Write(doc) => ("doc", doc.clone()),
            BroadcastPayload::Remove(id) => ("id", Value::Text(id.clone())),
        };
        Value::object(vec![
            ("origin", Value::Integer(self.origin as i64)),
            ("name", Value::Text(self.entity_type.clone())),
            body,
        ])
    }

    /// Converts from a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a broadcast message.
    pub fn from_value(value: &Value) -> CodecResult<Self> {
        let map = value
            .as_map()
            .ok_or_else(|| CodecError::invalid_structure("expected map for BroadcastMessage"))?;

        let get_field = |name: &str| {
            map.iter()
                .find(|(k, _)| k.as_text() == Some(name))
                .map(|(_, v)| v)
        };

        let origin = get_field("origin")
            .and_then(Value::as_integer)
            .ok_or_else(|| CodecError::invalid_structure("missing origin"))? as u64;
        let entity_type = get_field("name")
            .and_then(Value::as_text)
            .ok_or_else(|| CodecError::invalid_structure("missing name"))?
            .to_string();
        let payload = match (get_field("doc"), get_field("id").and_then(Value::as_text)) {
            (Some(doc), _) => BroadcastPayload::Write(doc.clone()),
            (None, Some(id)) => BroadcastPayload::Remove(id.to_string()),
            (None, None) => return Err(CodecError::invalid_structure("missing doc or id")),
        };

        Ok(Self {
            origin,
            entity_type,
            payload,
        })
    }

    /// Encodes to CBOR.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        to_canonical_cbor(&self.to_value())
    }

    /// Decodes from CBOR.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a broadcast message.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        Self::from_value(&from_cbor(bytes)?)
    }
}
