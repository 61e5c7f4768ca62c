//! Mirrored documents.

use crate::error::{CoreError, CoreResult};
use crate::id::EntityId;
use keepsync_codec::{from_cbor, to_canonical_cbor, Value};

/// Field holding a document's identifier.
pub const ID_FIELD: &str = "_id";

/// A document held in the mirror store.
///
/// The body is always a map and always carries `_id` as text equal to
/// [`MirrorDocument::id`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorDocument {
    id: EntityId,
    body: Value,
}

impl MirrorDocument {
    /// Builds a document from a map value.
    ///
    /// An object-id wrapper in `_id` is normalised to its hex string form;
    /// other fields are kept as given.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidDocument`] if `body` is not a map or has
    /// no usable `_id`.
    pub fn from_value(mut body: Value) -> CoreResult<Self> {
        if body.as_map().is_none() {
            return Err(CoreError::invalid_document("document must be a map"));
        }
        let id = body
            .get(ID_FIELD)
            .and_then(EntityId::from_value)
            .ok_or_else(|| CoreError::invalid_document("document has no text _id"))?;
        body.set(ID_FIELD, id.to_value());
        Ok(Self { id, body })
    }

    /// Builds a document from an id and fields, setting `_id`.
    #[must_use]
    pub fn new<K: Into<String>>(id: impl Into<EntityId>, fields: Vec<(K, Value)>) -> Self {
        let id = id.into();
        let mut body = Value::object(fields);
        body.set(ID_FIELD, id.to_value());
        Self { id, body }
    }

    /// Returns the document id.
    #[must_use]
    pub fn id(&self) -> &EntityId {
        &self.id
    }

    /// Returns the full body, including `_id`.
    #[must_use]
    pub fn body(&self) -> &Value {
        &self.body
    }

    /// Consumes the document, returning its body.
    #[must_use]
    pub fn into_value(self) -> Value {
        self.body
    }

    /// Reads a (possibly dotted) field.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        self.body.get_path(path)
    }

    /// Encodes the body to canonical CBOR.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        Ok(to_canonical_cbor(&self.body)?)
    }

    /// Decodes a document from CBOR.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid document.
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        Self::from_value(from_cbor(bytes)?)
    }
}
