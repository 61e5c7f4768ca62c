//! Entity identifier.

use keepsync_codec::Value;
use std::fmt;
use uuid::Uuid;

/// Key under which an extended-JSON object id wraps its hex string.
pub const OBJECT_ID_KEY: &str = "$oid";

/// Unique identifier of a mirrored document.
///
/// Entity IDs are opaque strings. Identifiers from richer id types (12-byte
/// object ids) are carried in their 24-character lowercase hex form and
/// round-trip losslessly through it.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityId(String);

impl EntityId {
    /// Creates an entity ID from its string form.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a new random ID suitable for a client-side insert.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Creates an entity ID from a 12-byte object id.
    #[must_use]
    pub fn from_object_id(bytes: [u8; 12]) -> Self {
        let mut hex = String::with_capacity(24);
        for byte in bytes {
            hex.push(char::from(HEX[usize::from(byte >> 4)]));
            hex.push(char::from(HEX[usize::from(byte & 0x0f)]));
        }
        Self(hex)
    }

    /// Parses the string form back into a 12-byte object id.
    ///
    /// Returns `None` unless the ID is exactly 24 hex digits.
    #[must_use]
    pub fn object_id(&self) -> Option<[u8; 12]> {
        let digits = self.0.as_bytes();
        if digits.len() != 24 {
            return None;
        }
        let mut out = [0u8; 12];
        for (slot, pair) in out.iter_mut().zip(digits.chunks_exact(2)) {
            *slot = (hex_digit(pair[0])? << 4) | hex_digit(pair[1])?;
        }
        Some(out)
    }

    /// Returns the string form.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extracts an ID from a document value.
    ///
    /// Accepts plain text and `{"$oid": "<hex>"}` wrappers.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Text(s) => Some(Self(s.clone())),
            Value::Map(_) => unwrap_object_id(value).map(Self::new),
            _ => None,
        }
    }

    /// Returns the ID as a text value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Text(self.0.clone())
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<EntityId> for Value {
    fn from(id: EntityId) -> Self {
        Value::Text(id.0)
    }
}

/// Replaces every `{"$oid": "<hex>"}` wrapper inside `value` with its text.
///
/// Returns the number of ids rewritten.
pub fn stringify_ids(value: &mut Value) -> usize {
    value.rewrite(&mut |node| match unwrap_object_id(node) {
        Some(hex) => {
            *node = Value::Text(hex);
            true
        }
        None => false,
    })
}

fn unwrap_object_id(value: &Value) -> Option<String> {
    match value.as_map()? {
        [(key, Value::Text(hex))] if key.as_text() == Some(OBJECT_ID_KEY) => Some(hex.clone()),
        _ => None,
    }
}

const HEX: &[u8; 16] = b"0123456789abcdef";

fn hex_digit(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}
