//! Dynamic document value type.

use std::cmp::Ordering;

/// A dynamic document value.
///
/// Documents, queued operation arguments and wire messages are all modelled
/// with this type. Floats are intentionally not supported: timestamps are
/// integer milliseconds and ids are text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer (supports full i64 range).
    Integer(i64),
    /// Byte string.
    Bytes(Vec<u8>),
    /// Text string (UTF-8).
    Text(String),
    /// Array of values.
    Array(Vec<Value>),
    /// Map of key-value pairs (keys are sorted for canonical encoding).
    Map(Vec<(Value, Value)>),
}

impl Value {
    /// Create a map value with sorted keys.
    ///
    /// Keys are sorted by their canonical CBOR encoding (length first, then
    /// bytewise). Later duplicates of a key replace earlier ones.
    pub fn map(pairs: Vec<(Value, Value)>) -> Self {
        let mut sorted: Vec<(Value, Value)> = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            match sorted.iter_mut().find(|(k, _)| *k == key) {
                Some(slot) => slot.1 = value,
                None => sorted.push((key, value)),
            }
        }
        sorted.sort_by(|a, b| a.0.cmp_canonical(&b.0));
        Value::Map(sorted)
    }

    /// Create a map from string keys.
    pub fn object<K: Into<String>>(fields: Vec<(K, Value)>) -> Self {
        Self::map(
            fields
                .into_iter()
                .map(|(k, v)| (Value::Text(k.into()), v))
                .collect(),
        )
    }

    /// Compare two values by their canonical CBOR encoding.
    pub fn cmp_canonical(&self, other: &Self) -> Ordering {
        // Text keys dominate documents; their encoding order is length-first
        // then bytewise, which can be computed without encoding.
        if let (Value::Text(a), Value::Text(b)) = (self, other) {
            return a.len().cmp(&b.len()).then_with(|| a.as_bytes().cmp(b.as_bytes()));
        }
        let a = crate::cbor::to_canonical_cbor(self).unwrap_or_default();
        let b = crate::cbor::to_canonical_cbor(other).unwrap_or_default();
        a.len().cmp(&b.len()).then_with(|| a.cmp(&b))
    }

    /// Total order used for retention sorting.
    ///
    /// Values of different kinds order as
    /// null < bool < integer < text < bytes < array < map, so a missing sort
    /// field (null) is always the least recent.
    pub fn cmp_sort(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            (Value::Array(a), Value::Array(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.cmp_sort(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Value::Map(a), Value::Map(b)) => {
                for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
                    let ord = ka.cmp_sort(kb).then_with(|| va.cmp_sort(vb));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => self.sort_rank().cmp(&other.sort_rank()),
        }
    }

    fn sort_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Integer(_) => 2,
            Value::Text(_) => 3,
            Value::Bytes(_) => 4,
            Value::Array(_) => 5,
            Value::Map(_) => 6,
        }
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get this value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get this value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as bytes, if it is a byte string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Get this value as a string, if it is a text string.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as an array, if it is one.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Get this value as a map, if it is one.
    pub fn as_map(&self) -> Option<&[(Value, Value)]> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Look up a text key in this map value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(pairs) => pairs
                .iter()
                .find(|(k, _)| k.as_text() == Some(key))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// Look up a dotted path (`"owner.id"`) through nested maps.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        path.split('.').try_fold(self, |value, segment| value.get(segment))
    }

    /// Sets a text key on this map value, keeping keys sorted.
    ///
    /// Returns `false` (and leaves the value untouched) if this is not a map.
    pub fn set(&mut self, key: &str, value: Value) -> bool {
        let Value::Map(pairs) = self else {
            return false;
        };
        if let Some(slot) = pairs.iter_mut().find(|(k, _)| k.as_text() == Some(key)) {
            slot.1 = value;
            return true;
        }
        let key = Value::Text(key.to_string());
        let at = pairs
            .iter()
            .position(|(k, _)| k.cmp_canonical(&key) == Ordering::Greater)
            .unwrap_or(pairs.len());
        pairs.insert(at, (key, value));
        true
    }

    /// Returns `true` if `target` occurs anywhere in this value.
    ///
    /// Matching is exact: `Text("5")` never matches `Integer(5)` and text is
    /// never matched by substring. Map keys are not searched.
    pub fn contains_value(&self, target: &Value) -> bool {
        self.any(&mut |value| value == target)
    }

    /// Replaces every exact occurrence of `target` with `replacement`.
    ///
    /// Returns the number of replacements made.
    pub fn replace_value(&mut self, target: &Value, replacement: &Value) -> usize {
        self.rewrite(&mut |value| {
            if value == target {
                *value = replacement.clone();
                true
            } else {
                false
            }
        })
    }

    /// Visits this value and every nested array element and map value,
    /// stopping at the first node for which `pred` returns `true`.
    pub fn any<F: FnMut(&Value) -> bool>(&self, pred: &mut F) -> bool {
        if pred(self) {
            return true;
        }
        match self {
            Value::Array(items) => items.iter().any(|item| item.any(pred)),
            Value::Map(pairs) => pairs.iter().any(|(_, v)| v.any(pred)),
            _ => false,
        }
    }

    /// Visits nodes top-down, letting `visit` rewrite them in place.
    ///
    /// When `visit` reports that it rewrote a node, that node's children are
    /// not visited. Returns the number of rewritten nodes.
    pub fn rewrite<F: FnMut(&mut Value) -> bool>(&mut self, visit: &mut F) -> usize {
        if visit(self) {
            return 1;
        }
        match self {
            Value::Array(items) => items.iter_mut().map(|item| item.rewrite(visit)).sum(),
            Value::Map(pairs) => pairs.iter_mut().map(|(_, v)| v.rewrite(visit)).sum(),
            _ => 0,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Value::Null
    }
}
