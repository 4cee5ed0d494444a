//! Message fan-out.
//!
//! The hub keeps, per topic pattern, the UDP addresses that asked for it and
//! sends each published message to every live match as one bincode datagram.
//! Delivery is fire-and-forget: a lost datagram is never resent.

use crate::coordination::channel::{SyncMessage, topic_matches};
use crate::error::{SyncError, SyncResult};

use dashmap::DashMap;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;

/// Registrations not refreshed within this window are dropped.
pub const SUBSCRIPTION_TTL: Duration = Duration::from_secs(30);

pub struct HubFanout {
    socket: Arc<UdpSocket>,
    /// pattern -> subscriber address -> expiry
    subscribers: DashMap<String, DashMap<SocketAddr, Instant>>,
}

impl HubFanout {
    pub async fn bind(addr: SocketAddr) -> SyncResult<Arc<Self>> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| SyncError::transient("fanout bind", e))?;
        Ok(Arc::new(Self {
            socket: Arc::new(socket),
            subscribers: DashMap::new(),
        }))
    }

    pub fn local_addr(&self) -> SyncResult<SocketAddr> {
        self.socket
            .local_addr()
            .map_err(|e| SyncError::transient("fanout addr", e))
    }

    /// Adds or refreshes a registration. Returns `true` if it is new.
    pub fn register(&self, pattern: &str, addr: SocketAddr) -> bool {
        let expires_at = Instant::now() + SUBSCRIPTION_TTL;
        let fresh = self
            .subscribers
            .entry(pattern.to_string())
            .or_default()
            .insert(addr, expires_at)
            .is_none();

        if fresh {
            tracing::info!("Subscribed {} to '{}'", addr, pattern);
        }
        fresh
    }

    /// Live addresses whose pattern covers `topic`, each listed once.
    pub fn targets(&self, topic: &str) -> Vec<SocketAddr> {
        let now = Instant::now();
        let mut targets = HashSet::new();

        for entry in self.subscribers.iter() {
            if !topic_matches(entry.key(), topic) {
                continue;
            }
            for subscriber in entry.value().iter() {
                if *subscriber.value() > now {
                    targets.insert(*subscriber.key());
                }
            }
        }

        targets.into_iter().collect()
    }

    /// Sends `message` to every matching subscriber. Returns datagrams sent.
    pub async fn fanout(&self, message: &SyncMessage) -> SyncResult<usize> {
        let encoded =
            bincode::serialize(message).map_err(|e| SyncError::transient("fanout encode", e))?;

        let mut sent = 0;
        for addr in self.targets(&message.topic) {
            match self.socket.send_to(&encoded, addr).await {
                Ok(_) => sent += 1,
                Err(e) => tracing::warn!("Failed to send '{}' to {}: {}", message.topic, addr, e),
            }
        }

        tracing::debug!(topic = %message.topic, sent, "Fanned out");
        Ok(sent)
    }

    /// Drops expired registrations. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;

        for entry in self.subscribers.iter() {
            let before = entry.value().len();
            entry.value().retain(|_, expires_at| *expires_at > now);
            removed += before - entry.value().len();
        }
        self.subscribers.retain(|_, subscribers| !subscribers.is_empty());

        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.iter().map(|entry| entry.value().len()).sum()
    }
}
