//! Hub clients.
//!
//! `HubClient` gives node and router processes the hub's profile table and
//! lock table behind the `ProfileBackend` and `CoordinationStore` seams.
//! `RemoteSyncChannel` implements `SyncChannel`: publishes go to the hub over
//! HTTP, and fanned-out datagrams arrive on a local UDP socket and are handed
//! to a process-local bus.

use super::protocol::{
    AckResponse, AcquireLockRequest, AcquireLockResponse, ENDPOINT_LOCK_ACQUIRE,
    ENDPOINT_LOCK_RELEASE, ENDPOINT_LOCK_STATUS, ENDPOINT_PROFILE, ENDPOINT_PROFILE_FETCH,
    ENDPOINT_PUBLISH, ENDPOINT_SUBSCRIBE, FetchProfileRequest, FetchProfileResponse,
    LockStatusRequest, LockStatusResponse, PublishRequest, PublishResponse, ReleaseLockRequest,
    SubscribeRequest,
};
use crate::coordination::channel::{
    InMemorySyncChannel, Subscription, SyncChannel, SyncMessage, subscription_pattern,
};
use crate::coordination::lock::CoordinationStore;
use crate::error::{SyncError, SyncResult};
use crate::profile::types::{OwnerId, ProfileRecord};
use crate::storage::backend::ProfileBackend;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

const REQUEST_TIMEOUT: Duration = Duration::from_millis(500);
/// Reads are idempotent and retried; writes that must not repeat are not.
const READ_ATTEMPTS: usize = 3;
const WRITE_ATTEMPTS: usize = 3;
const SINGLE_ATTEMPT: usize = 1;
const RETRY_BASE_MS: u64 = 150;
const RETRY_CAP_MS: u64 = 1200;
const RETRY_JITTER_MS: u64 = 50;
const MAX_DATAGRAM: usize = 65536;
/// Subscriptions are re-registered well inside the hub's expiry window.
const SUBSCRIPTION_REFRESH: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct HubClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl HubClient {
    /// `hub_addr` is the hub's HTTP `host:port`.
    pub fn new(hub_addr: &str) -> Self {
        Self {
            base_url: format!("http://{}", hub_addr),
            http_client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// POSTs `payload` and decodes the reply. Any non-2xx status is an
    /// error, so a missing route is never mistaken for a missing row.
    async fn post_json<T, R>(&self, path: &str, payload: &T, attempts: usize) -> Result<R>
    where
        T: serde::Serialize,
        R: serde::de::DeserializeOwned,
    {
        let url = self.url(path);
        let response = Self::send_with_retry(
            || self.http_client.post(url.as_str()).json(payload),
            attempts,
        )
        .await?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("POST {} failed: {}", path, status);
        }

        Ok(response.json().await?)
    }

    /// Sends the request built by `build`, rebuilding it for each attempt.
    /// Only transport errors are retried, with jittered exponential backoff.
    async fn send_with_retry<F>(build: F, attempts: usize) -> Result<reqwest::Response>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut delay_ms = RETRY_BASE_MS;
        let mut attempt = 1;

        loop {
            match build().timeout(REQUEST_TIMEOUT).send().await {
                Ok(response) => return Ok(response),
                Err(e) if attempt >= attempts => {
                    anyhow::bail!("{} (after {} attempt(s))", e, attempt);
                }
                Err(e) => {
                    tracing::debug!("Hub request attempt {} failed: {}", attempt, e);
                    let jitter = rand::random::<u64>() % RETRY_JITTER_MS;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(RETRY_CAP_MS);
                    attempt += 1;
                }
            }
        }
    }

    async fn fetch_record(&self, owner_id: &OwnerId) -> Result<Option<ProfileRecord>> {
        let request = FetchProfileRequest {
            owner_id: owner_id.clone(),
        };
        let response: FetchProfileResponse = self
            .post_json(ENDPOINT_PROFILE_FETCH, &request, READ_ATTEMPTS)
            .await?;
        Ok(response.record)
    }

    async fn lock_held(&self, key: &str) -> Result<bool> {
        let request = LockStatusRequest {
            key: key.to_string(),
        };
        let response: LockStatusResponse = self
            .post_json(ENDPOINT_LOCK_STATUS, &request, READ_ATTEMPTS)
            .await?;
        Ok(response.held)
    }
}

#[async_trait]
impl ProfileBackend for HubClient {
    async fn fetch(&self, owner_id: &OwnerId) -> SyncResult<Option<ProfileRecord>> {
        self.fetch_record(owner_id)
            .await
            .map_err(|e| SyncError::transient("hub fetch", e))
    }

    async fn upsert(&self, record: ProfileRecord) -> SyncResult<()> {
        // An upsert repeats safely: the row ends up the same.
        let ack: AckResponse = self
            .post_json(ENDPOINT_PROFILE, &record, WRITE_ATTEMPTS)
            .await
            .map_err(|e| SyncError::transient("hub upsert", e))?;

        if ack.success {
            Ok(())
        } else {
            Err(SyncError::transient("hub upsert", "rejected by hub"))
        }
    }
}

#[async_trait]
impl CoordinationStore for HubClient {
    async fn acquire(&self, key: &str, ttl: Duration) -> SyncResult<bool> {
        let request = AcquireLockRequest {
            key: key.to_string(),
            ttl_ms: ttl.as_millis() as u64,
        };
        // A retried acquire could find our own first attempt and report the
        // lock as taken.
        let response: AcquireLockResponse = self
            .post_json(ENDPOINT_LOCK_ACQUIRE, &request, SINGLE_ATTEMPT)
            .await
            .map_err(|e| SyncError::transient("lock acquire", e))?;
        Ok(response.acquired)
    }

    async fn release(&self, key: &str) -> SyncResult<()> {
        let request = ReleaseLockRequest {
            key: key.to_string(),
        };
        let _: AckResponse = self
            .post_json(ENDPOINT_LOCK_RELEASE, &request, WRITE_ATTEMPTS)
            .await
            .map_err(|e| SyncError::transient("lock release", e))?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> SyncResult<bool> {
        self.lock_held(key)
            .await
            .map_err(|e| SyncError::transient("lock check", e))
    }
}

/// `SyncChannel` over the hub.
pub struct RemoteSyncChannel {
    client: HubClient,
    local: InMemorySyncChannel,
    socket: Arc<UdpSocket>,
    udp_addr: SocketAddr,
    patterns: DashSet<String>,
}

impl RemoteSyncChannel {
    /// Binds the datagram socket. `udp_addr` must be reachable from the hub.
    pub async fn bind(client: HubClient, udp_addr: SocketAddr) -> SyncResult<Arc<Self>> {
        let socket = UdpSocket::bind(udp_addr)
            .await
            .map_err(|e| SyncError::transient("channel bind", e))?;
        let udp_addr = socket
            .local_addr()
            .map_err(|e| SyncError::transient("channel bind", e))?;

        tracing::info!("Receiving sync messages on {}", udp_addr);

        Ok(Arc::new(Self {
            client,
            local: InMemorySyncChannel::new(),
            socket: Arc::new(socket),
            udp_addr,
            patterns: DashSet::new(),
        }))
    }

    pub fn udp_addr(&self) -> SocketAddr {
        self.udp_addr
    }

    /// Spawns the datagram receive loop and the subscription refresh loop.
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let receiver = {
            let channel = self.clone();
            tokio::spawn(async move {
                channel.receive_loop().await;
            })
        };

        let refresher = {
            let channel = self.clone();
            tokio::spawn(async move {
                channel.refresh_loop().await;
            })
        };

        vec![receiver, refresher]
    }

    /// Hands every decodable datagram to local subscribers. Undecodable
    /// datagrams are dropped.
    async fn receive_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            let (len, src) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    tracing::error!("Sync socket receive failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };

            let message: SyncMessage = match bincode::deserialize(&buf[..len]) {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!("Dropping undecodable datagram from {}: {}", src, e);
                    continue;
                }
            };

            let delivered = self.local.deliver(message);
            tracing::trace!(from = %src, delivered, "Sync datagram delivered");
        }
    }

    async fn refresh_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(SUBSCRIPTION_REFRESH);
        interval.tick().await;

        loop {
            interval.tick().await;

            let patterns: Vec<String> = self.patterns.iter().map(|p| p.key().clone()).collect();
            for pattern in patterns {
                if let Err(e) = self.register(&pattern).await {
                    tracing::warn!("Failed to refresh subscription '{}': {}", pattern, e);
                }
            }
        }
    }

    async fn register(&self, pattern: &str) -> SyncResult<()> {
        let request = SubscribeRequest {
            pattern: pattern.to_string(),
            udp_addr: self.udp_addr,
        };
        let ack: AckResponse = self
            .client
            .post_json(ENDPOINT_SUBSCRIBE, &request, WRITE_ATTEMPTS)
            .await
            .map_err(|e| SyncError::transient("subscribe", e))?;

        if ack.success {
            Ok(())
        } else {
            Err(SyncError::transient("subscribe", "rejected by hub"))
        }
    }
}

#[async_trait]
impl SyncChannel for RemoteSyncChannel {
    async fn publish(&self, topic: &str, payload: &str) -> SyncResult<usize> {
        let request = PublishRequest {
            topic: topic.to_string(),
            payload: payload.to_string(),
        };
        // Never retried: a repeat would be a duplicate delivery.
        let response: PublishResponse = self
            .client
            .post_json(ENDPOINT_PUBLISH, &request, SINGLE_ATTEMPT)
            .await
            .map_err(|e| SyncError::transient("publish", e))?;

        tracing::debug!(topic, payload, delivered = response.delivered, "Published via hub");
        Ok(response.delivered)
    }

    async fn subscribe(&self, topic: &str) -> SyncResult<Subscription> {
        let subscription = self.local.subscribe_local(topic);

        let pattern = subscription_pattern(topic);
        if self.patterns.insert(pattern.clone()) {
            if let Err(e) = self.register(&pattern).await {
                self.patterns.remove(&pattern);
                return Err(e);
            }
        }

        Ok(subscription)
    }
}
