//! Same-origin broadcast between application instances.
//!
//! Best effort only: a lagging receiver loses messages and nobody retries.
//! The shared storage engine stays the source of truth.

use crate::cache::{ChangeContext, ChangeOrigin, ReactiveCache};
use crate::error::SyncResult;
use keepsync_core::{EntityId, MirrorDocument};
use keepsync_protocol::{BroadcastMessage, BroadcastPayload};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Default number of messages a slow instance may fall behind.
pub const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// The shared medium every instance of one origin joins.
#[derive(Clone)]
pub struct BroadcastHub {
    sender: broadcast::Sender<BroadcastMessage>,
    next_instance: Arc<AtomicU64>,
}

impl BroadcastHub {
    /// Creates a hub holding up to `capacity` undelivered messages.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            next_instance: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Joins the hub as a new instance.
    pub fn join(&self) -> BroadcastChannel {
        BroadcastChannel {
            instance: self.next_instance.fetch_add(1, Ordering::Relaxed),
            sender: self.sender.clone(),
            receiver: Mutex::new(self.sender.subscribe()),
        }
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_BROADCAST_CAPACITY)
    }
}

impl std::fmt::Debug for BroadcastHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastHub")
            .field("instances", &self.sender.receiver_count())
            .finish()
    }
}

/// One instance's endpoint on a [`BroadcastHub`].
pub struct BroadcastChannel {
    instance: u64,
    sender: broadcast::Sender<BroadcastMessage>,
    receiver: Mutex<broadcast::Receiver<BroadcastMessage>>,
}

impl BroadcastChannel {
    /// Id of this instance.
    pub fn instance(&self) -> u64 {
        self.instance
    }

    /// Posts a write or removal to every other instance.
    pub fn post(&self, entity_type: &str, payload: BroadcastPayload) {
        let message = BroadcastMessage {
            origin: self.instance,
            entity_type: entity_type.to_string(),
            payload,
        };
        // No receivers is not an error: this may be the only instance.
        let _ = self.sender.send(message);
    }

    /// Takes every pending message posted by other instances.
    pub fn drain(&self) -> Vec<BroadcastMessage> {
        let mut receiver = self.receiver.lock();
        let mut out = Vec::new();
        loop {
            match receiver.try_recv() {
                Ok(message) if message.origin == self.instance => {}
                Ok(message) => out.push(message),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(instance = self.instance, skipped, "broadcast receiver lagged");
                }
                Err(_) => break,
            }
        }
        out
    }
}

impl std::fmt::Debug for BroadcastChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastChannel")
            .field("instance", &self.instance)
            .finish_non_exhaustive()
    }
}

/// Applies a message from another instance to the local cache.
///
/// The mirror is bypassed: the change carries [`ChangeOrigin::Broadcast`],
/// which observers never write back.
///
/// # Errors
///
/// Returns an error if a written document has no usable id.
pub fn apply_broadcast(cache: &dyn ReactiveCache, message: &BroadcastMessage) -> SyncResult<()> {
    let ctx = ChangeContext::new(ChangeOrigin::Broadcast);
    match &message.payload {
        BroadcastPayload::Write(body) => {
            let doc = MirrorDocument::from_value(body.clone())?;
            tracing::debug!(entity_type = %message.entity_type, id = %doc.id(), "applying broadcast write");
            cache.upsert(&message.entity_type, doc, ctx)?;
        }
        BroadcastPayload::Remove(id) => {
            tracing::debug!(entity_type = %message.entity_type, id = %id, "applying broadcast removal");
            cache.remove(&message.entity_type, &EntityId::new(id.as_str()), ctx);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use keepsync_codec::Value;

    fn body(id: &str) -> Value {
        Value::object(vec![("_id", Value::from(id)), ("text", Value::from("hi"))])
    }

    #[test]
    fn instances_do_not_hear_themselves() {
        let hub = BroadcastHub::default();
        let first = hub.join();
        let second = hub.join();
        assert_ne!(first.instance(), second.instance());

        first.post("notes", BroadcastPayload::Write(body("n1")));
        assert!(first.drain().is_empty());
        let received = second.drain();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].origin, first.instance());
        assert!(second.drain().is_empty());
    }

    #[test]
    fn lagging_receiver_keeps_newest() {
        let hub = BroadcastHub::new(2);
        let first = hub.join();
        let second = hub.join();
        for i in 0..5 {
            first.post("notes", BroadcastPayload::Remove(format!("n{i}")));
        }
        let received = second.drain();
        assert_eq!(received.len(), 2);
        assert_eq!(received[1].payload, BroadcastPayload::Remove("n4".into()));
    }

    #[test]
    fn apply_writes_and_removes() {
        let cache = MemoryCache::new();
        apply_broadcast(&cache, &BroadcastMessage::write(1, "notes", body("n1"))).unwrap();
        apply_broadcast(&cache, &BroadcastMessage::write(1, "notes", body("n1"))).unwrap();
        assert_eq!(cache.len("notes"), 1);

        apply_broadcast(&cache, &BroadcastMessage::remove(1, "notes", "n1")).unwrap();
        assert!(cache.is_empty("notes"));
    }

    #[test]
    fn apply_rejects_documents_without_id() {
        let cache = MemoryCache::new();
        let msg = BroadcastMessage::write(1, "notes", Value::object(vec![("text", Value::from("x"))]));
        assert!(apply_broadcast(&cache, &msg).is_err());
    }
}
