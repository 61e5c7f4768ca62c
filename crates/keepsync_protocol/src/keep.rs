//! Reconciliation (`_keep`) request and response.

use keepsync_codec::{from_cbor, to_canonical_cbor, CodecError, CodecResult, Value};

/// Reserved name of the server reconciliation operation.
pub const KEEP_METHOD: &str = "_keep";

fn field<'a>(map: &'a [(Value, Value)], name: &str) -> Option<&'a Value> {
    map.iter()
        .find(|(k, _)| k.as_text() == Some(name))
        .map(|(_, v)| v)
}

fn text(map: &[(Value, Value)], name: &str) -> CodecResult<String> {
    field(map, name)
        .and_then(Value::as_text)
        .map(str::to_string)
        .ok_or_else(|| CodecError::invalid_structure(format!("missing {name}")))
}

fn integer(map: &[(Value, Value)], name: &str) -> CodecResult<i64> {
    field(map, name)
        .and_then(Value::as_integer)
        .ok_or_else(|| CodecError::invalid_structure(format!("missing {name}")))
}

fn as_map<'a>(value: &'a Value, what: &str) -> CodecResult<&'a [(Value, Value)]> {
    value
        .as_map()
        .ok_or_else(|| CodecError::invalid_structure(format!("expected map for {what}")))
}

fn as_array<'a>(value: Option<&'a Value>, what: &str) -> CodecResult<&'a [Value]> {
    value
        .and_then(Value::as_array)
        .ok_or_else(|| CodecError::invalid_structure(format!("expected array for {what}")))
}

/// Last successful reconciliation of one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatermarkEntry {
    /// Entity type name.
    pub entity_type: String,
    /// Milliseconds since the Unix epoch.
    pub last_reconciled_at: i64,
}

impl WatermarkEntry {
    /// Creates an entry.
    pub fn new(entity_type: impl Into<String>, last_reconciled_at: i64) -> Self {
        Self {
            entity_type: entity_type.into(),
            last_reconciled_at,
        }
    }

    /// Converts to a value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::object(vec![
            ("name", Value::Text(self.entity_type.clone())),
            ("syncedAt", Value::Integer(self.last_reconciled_at)),
        ])
    }

    /// Converts from a value.
    ///
    /// # Errors
    ///
    /// Returns an error if required fields are missing.
    pub fn from_value(value: &Value) -> CodecResult<Self> {
        let map = as_map(value, "WatermarkEntry")?;
        Ok(Self {
            entity_type: text(map, "name")?,
            last_reconciled_at: integer(map, "syncedAt")?,
        })
    }
}

/// Request sent to [`KEEP_METHOD`].
///
/// An empty request asks the server for fresh watermarks only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeepRequest {
    /// Current watermarks of the client.
    pub syncs: Vec<WatermarkEntry>,
}

impl KeepRequest {
    /// Creates a request.
    #[must_use]
    pub fn new(syncs: Vec<WatermarkEntry>) -> Self {
        Self { syncs }
    }

    /// Returns `true` if the client has no watermarks yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.syncs.is_empty()
    }

    /// Looks up the watermark of `entity_type`.
    #[must_use]
    pub fn watermark(&self, entity_type: &str) -> Option<i64> {
        self.syncs
            .iter()
            .find(|s| s.entity_type == entity_type)
            .map(|s| s.last_reconciled_at)
    }

    /// Converts to the argument list of the call.
    #[must_use]
    pub fn to_args(&self) -> Vec<Value> {
        vec![Value::Array(
            self.syncs.iter().map(WatermarkEntry::to_value).collect(),
        )]
    }

    /// Parses the argument list of the call.
    ///
    /// # Errors
    ///
    /// Returns an error if the arguments are malformed.
    pub fn from_args(args: &[Value]) -> CodecResult<Self> {
        let syncs = as_array(args.first(), "KeepRequest")?
            .iter()
            .map(WatermarkEntry::from_value)
            .collect::<CodecResult<_>>()?;
        Ok(Self { syncs })
    }
}

/// Outcome of reconciling one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncedType {
    /// Entity type name.
    pub entity_type: String,
    /// Ids the client should drop from its mirror.
    pub remove_ids: Vec<String>,
    /// Watermark to store for the type.
    pub new_watermark: i64,
}

impl SyncedType {
    /// Converts to a value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::object(vec![
            ("name", Value::Text(self.entity_type.clone())),
            (
                "removeIds",
                Value::Array(self.remove_ids.iter().cloned().map(Value::Text).collect()),
            ),
            ("syncedAt", Value::Integer(self.new_watermark)),
        ])
    }

    /// Converts from a value.
    ///
    /// # Errors
    ///
    /// Returns an error if required fields are missing.
    pub fn from_value(value: &Value) -> CodecResult<Self> {
        let map = as_map(value, "SyncedType")?;
        let remove_ids = as_array(field(map, "removeIds"), "removeIds")?
            .iter()
            .map(|v| {
                v.as_text()
                    .map(str::to_string)
                    .ok_or_else(|| CodecError::invalid_structure("removeIds must be text"))
            })
            .collect::<CodecResult<_>>()?;
        Ok(Self {
            entity_type: text(map, "name")?,
            remove_ids,
            new_watermark: integer(map, "syncedAt")?,
        })
    }
}

/// A type the server failed to reconcile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepError {
    /// Entity type name.
    pub entity_type: String,
    /// Error description.
    pub error: String,
}

impl KeepError {
    /// Creates an error entry.
    pub fn new(entity_type: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            error: error.into(),
        }
    }

    /// Converts to a value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::object(vec![
            ("name", Value::Text(self.entity_type.clone())),
            ("error", Value::Text(self.error.clone())),
        ])
    }

    /// Converts from a value.
    ///
    /// # Errors
    ///
    /// Returns an error if required fields are missing.
    pub fn from_value(value: &Value) -> CodecResult<Self> {
        let map = as_map(value, "KeepError")?;
        Ok(Self {
            entity_type: text(map, "name")?,
            error: text(map, "error")?,
        })
    }
}

/// Response of [`KEEP_METHOD`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeepResponse {
    /// Successfully reconciled types.
    pub synced: Vec<SyncedType>,
    /// Types that failed.
    pub errors: Vec<KeepError>,
}

impl KeepResponse {
    /// Converts to a value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::object(vec![
            (
                "synced",
                Value::Array(self.synced.iter().map(SyncedType::to_value).collect()),
            ),
            (
                "errors",
                Value::Array(self.errors.iter().map(KeepError::to_value).collect()),
            ),
        ])
    }

    /// Converts from a value. A missing `errors` list is treated as empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is malformed.
    pub fn from_value(value: &Value) -> CodecResult<Self> {
        let map = as_map(value, "KeepResponse")?;
        let synced = as_array(field(map, "synced"), "synced")?
            .iter()
            .map(SyncedType::from_value)
            .collect::<CodecResult<_>>()?;
        let errors = match field(map, "errors") {
            None => Vec::new(),
            errors => as_array(errors, "errors")?
                .iter()
                .map(KeepError::from_value)
                .collect::<CodecResult<_>>()?,
        };
        Ok(Self { synced, errors })
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
    /// Returns an error if the bytes are not a response.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        Self::from_value(&from_cbor(bytes)?)
    }
}
