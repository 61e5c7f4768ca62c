//! Canonical CBOR encoding backed by `ciborium`.
//!
//! [`Value`] is mapped onto `ciborium::value::Value` one-to-one. Because
//! [`Value::map`] keeps keys in canonical order and ciborium always emits
//! definite lengths with the shortest integer encoding, identical values
//! produce identical bytes.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use ciborium::value::{Integer, Value as Cbor};

/// Encode a value to canonical CBOR bytes.
///
/// # Errors
///
/// Returns an error if the underlying serializer fails.
pub fn to_canonical_cbor(value: &Value) -> CodecResult<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(&to_cbor(value), &mut out)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(out)
}

/// Decode CBOR bytes into a value.
///
/// Map keys are re-sorted so the result is canonical even when the input
/// was not.
///
/// # Errors
///
/// Returns an error for malformed input, floats, tags, or integers outside
/// the `i64` range.
pub fn from_cbor(bytes: &[u8]) -> CodecResult<Value> {
    let raw: Cbor = ciborium::de::from_reader(bytes)
        .map_err(|e| CodecError::decoding_failed(e.to_string()))?;
    from_cbor_value(raw)
}

fn to_cbor(value: &Value) -> Cbor {
    match value {
        Value::Null => Cbor::Null,
        Value::Bool(b) => Cbor::Bool(*b),
        Value::Integer(n) => Cbor::Integer(Integer::from(*n)),
        Value::Bytes(b) => Cbor::Bytes(b.clone()),
        Value::Text(s) => Cbor::Text(s.clone()),
        Value::Array(items) => Cbor::Array(items.iter().map(to_cbor).collect()),
        Value::Map(pairs) => Cbor::Map(
            pairs
                .iter()
                .map(|(k, v)| (to_cbor(k), to_cbor(v)))
                .collect(),
        ),
    }
}

fn from_cbor_value(raw: Cbor) -> CodecResult<Value> {
    Ok(match raw {
        Cbor::Null => Value::Null,
        Cbor::Bool(b) => Value::Bool(b),
        Cbor::Integer(n) => Value::Integer(i64::try_from(n).map_err(|_| CodecError::IntegerOverflow)?),
        Cbor::Bytes(b) => Value::Bytes(b),
        Cbor::Text(s) => Value::Text(s),
        Cbor::Float(_) => return Err(CodecError::FloatForbidden),
        Cbor::Tag(tag, _) => return Err(CodecError::UnsupportedTag { tag }),
        Cbor::Array(items) => Value::Array(
            items
                .into_iter()
                .map(from_cbor_value)
                .collect::<CodecResult<_>>()?,
        ),
        Cbor::Map(pairs) => Value::map(
            pairs
                .into_iter()
                .map(|(k, v)| Ok((from_cbor_value(k)?, from_cbor_value(v)?)))
                .collect::<CodecResult<_>>()?,
        ),
        _ => return Err(CodecError::decoding_failed("unknown CBOR item")),
    })
}
