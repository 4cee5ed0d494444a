//! Sync Channel
//!
//! Best-effort publish/subscribe used for save requests and save
//! acknowledgements. Nothing is buffered for absent subscribers and nothing is
//! redelivered, so every consumer waits with a timeout.

use crate::error::SyncResult;
use crate::profile::types::OwnerId;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

/// Router -> node: flush this owner's profile. Payload: owner id.
pub const TOPIC_SAVE_REQUESTED: &str = "midgard:sync:req_save";
/// Node -> router: flush finished. Payload: owner id.
pub const TOPIC_SAVE_COMPLETED: &str = "midgard:sync:saved";
/// Prefix of the node-local per-owner acknowledgement topic.
pub const LOCAL_SAVED_PREFIX: &str = "sync:saved:";
pub const LOCAL_SAVED_PAYLOAD: &str = "saved";

pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// `sync:saved:<owner_id>`
pub fn local_saved_topic(owner_id: &OwnerId) -> String {
    format!("{}{}", LOCAL_SAVED_PREFIX, owner_id)
}

/// Whether `topic` is covered by a subscription `pattern`.
///
/// A pattern is either an exact topic or a prefix followed by `*`.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => topic.starts_with(prefix),
        None => pattern == topic,
    }
}

/// The remote subscription pattern that covers `topic`.
pub fn subscription_pattern(topic: &str) -> String {
    if topic.starts_with(LOCAL_SAVED_PREFIX) {
        format!("{}*", LOCAL_SAVED_PREFIX)
    } else {
        topic.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMessage {
    pub topic: String,
    pub payload: String,
}

#[async_trait]
pub trait SyncChannel: Send + Sync {
    /// Publishes to whoever is listening right now.
    ///
    /// Returns how many receivers the message was handed to, 0 when unknown.
    async fn publish(&self, topic: &str, payload: &str) -> SyncResult<usize>;

    /// Starts listening on `topic`. Messages published before this call are
    /// never seen.
    async fn subscribe(&self, topic: &str) -> SyncResult<Subscription>;
}

/// A live subscription to one topic.
pub struct Subscription {
    topic: String,
    receiver: broadcast::Receiver<SyncMessage>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next message on this topic; `None` once the channel is gone.
    ///
    /// A lagging subscriber skips what it missed, in keeping with at-most-once
    /// delivery.
    pub async fn recv(&mut self) -> Option<SyncMessage> {
        loop {
            let message = match self.receiver.recv().await {
                Ok(message) => message,
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    tracing::warn!(topic = %self.topic, lagged = count, "Subscriber lagged, messages dropped");
                    continue;
                }
            };

            if message.topic == self.topic {
                return Some(message);
            }
        }
    }
}

/// Process-local bus on `tokio::sync::broadcast`.
///
/// Used directly when node and router share a process (and in tests), and as
/// the local delivery stage of the remote channel.
pub struct InMemorySyncChannel {
    sender: broadcast::Sender<SyncMessage>,
    published: AtomicU64,
}

impl InMemorySyncChannel {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            published: AtomicU64::new(0),
        }
    }

    pub fn subscribe_local(&self, topic: &str) -> Subscription {
        Subscription {
            topic: topic.to_string(),
            receiver: self.sender.subscribe(),
        }
    }

    pub fn deliver(&self, message: SyncMessage) -> usize {
        self.published.fetch_add(1, Ordering::Relaxed);
        match self.sender.send(message) {
            Ok(receivers) => receivers,
            Err(e) => {
                tracing::debug!(topic = %e.0.topic, "Message dropped (no subscribers)");
                0
            }
        }
    }

    pub fn messages_published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for InMemorySyncChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SyncChannel for InMemorySyncChannel {
    async fn publish(&self, topic: &str, payload: &str) -> SyncResult<usize> {
        let receivers = self.deliver(SyncMessage {
            topic: topic.to_string(),
            payload: payload.to_string(),
        });
        tracing::debug!(topic, payload, receivers, "Published");
        Ok(receivers)
    }

    async fn subscribe(&self, topic: &str) -> SyncResult<Subscription> {
        Ok(self.subscribe_local(topic))
    }
}
