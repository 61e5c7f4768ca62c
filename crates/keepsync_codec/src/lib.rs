//! # keepsync codec
//!
//! Document value model and canonical CBOR encoding for keepsync.
//!
//! Everything keepsync persists or exchanges (mirrored documents, queued
//! operation arguments, watermarks, broadcast and reconciliation messages)
//! is a [`Value`]. Values are encoded as canonical CBOR:
//!
//! - Maps are sorted by key (length-first, then bytewise)
//! - Integers use the shortest encoding
//! - No floats, no tags
//! - No indefinite-length items
//!
//! ## Usage
//!
//! ```
//! use keepsync_codec::{to_canonical_cbor, from_cbor, Value};
//!
//! let doc = Value::object(vec![("_id", Value::from("n1")), ("createdAt", Value::Integer(1))]);
//! let bytes = to_canonical_cbor(&doc).unwrap();
//! assert_eq!(from_cbor(&bytes).unwrap(), doc);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cbor;
mod error;
mod value;

pub use cbor::{from_cbor, to_canonical_cbor};
pub use error::{CodecError, CodecResult};
pub use value::Value;

/// Trait for types that can be encoded to canonical CBOR.
pub trait Encode {
    /// Encode this value to canonical CBOR bytes.
    fn encode(&self) -> CodecResult<Vec<u8>>;
}

/// Trait for types that can be decoded from CBOR.
pub trait Decode: Sized {
    /// Decode this value from CBOR bytes.
    fn decode(bytes: &[u8]) -> CodecResult<Self>;
}

impl Encode for Value {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        to_canonical_cbor(self)
    }
}

impl Decode for Value {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        from_cbor(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            (-5i64..5).prop_map(Value::Integer),
            "[a-c]{0,2}".prop_map(Value::Text),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::vec(("[a-c]{1}", inner), 0..4).prop_map(|fields| {
                    Value::object(fields)
                }),
            ]
        })
    }

    proptest! {
        #[test]
        fn replaced_target_is_gone(mut value in arb_value(), target in "[a-c]{1,2}") {
            let target = Value::Text(target);
            let replacement = Value::Text("zz".into());
            let had = value.contains_value(&target);
            let count = value.replace_value(&target, &replacement);
            prop_assert_eq!(had, count > 0);
            prop_assert!(!value.contains_value(&target));
        }

        #[test]
        fn encoding_is_deterministic(value in arb_value()) {
            let bytes = value.encode().unwrap();
            let decoded = Value::decode(&bytes).unwrap();
            prop_assert_eq!(decoded.encode().unwrap(), bytes);
        }
    }
}
