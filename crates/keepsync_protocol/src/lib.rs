//! # keepsync protocol
//!
//! Message types exchanged by keepsync components.
//!
//! This crate provides:
//! - [`KeepRequest`] / [`KeepResponse`] for the reserved `_keep`
//!   reconciliation operation
//! - [`BroadcastMessage`] for same-origin cross-instance propagation
//! - Conversions to [`keepsync_codec::Value`] and canonical CBOR
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod broadcast;
mod keep;

pub use broadcast::{BroadcastMessage, BroadcastPayload};
pub use keep::{KeepError, KeepRequest, KeepResponse, SyncedType, WatermarkEntry, KEEP_METHOD};

#[cfg(test)]
mod tests {
    use super::*;
    use keepsync_codec::Value;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn watermarks_survive_the_wire(
            marks in prop::collection::vec(("[a-z]{1,8}", any::<i64>()), 0..6),
        ) {
            let request = KeepRequest::new(
                marks.into_iter().map(|(name, at)| WatermarkEntry::new(name, at)).collect(),
            );
            prop_assert_eq!(KeepRequest::from_args(&request.to_args()).unwrap(), request);
        }

        #[test]
        fn broadcast_ids_survive_the_wire(origin in any::<u32>(), id in "[A-Za-z0-9]{1,24}") {
            let msg = BroadcastMessage::remove(u64::from(origin), "notes", id);
            prop_assert_eq!(BroadcastMessage::decode(&msg.encode().unwrap()).unwrap(), msg);
        }
    }

    #[test]
    fn keep_method_name_is_reserved() {
        assert_eq!(KEEP_METHOD, "_keep");
        assert!(KeepResponse::from_value(&Value::Null).is_err());
    }
}
