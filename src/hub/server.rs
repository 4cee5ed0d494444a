use axum::{Router, extract::Extension, routing::post};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use super::fanout::HubFanout;
use super::handlers::{
    handle_acquire_lock, handle_fetch_profile, handle_lock_status, handle_publish,
    handle_release_lock, handle_subscribe, handle_upsert_profile,
};
use super::protocol::{
    ENDPOINT_LOCK_ACQUIRE, ENDPOINT_LOCK_RELEASE, ENDPOINT_LOCK_STATUS, ENDPOINT_PROFILE,
    ENDPOINT_PROFILE_FETCH, ENDPOINT_PUBLISH, ENDPOINT_SUBSCRIBE,
};
use crate::coordination::lock::MemoryCoordinationStore;
use crate::error::SyncResult;
use crate::storage::memory::MemoryProfileBackend;

const SUBSCRIPTION_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Shared state of the hub process.
pub struct Hub {
    pub profiles: Arc<MemoryProfileBackend>,
    pub locks: Arc<MemoryCoordinationStore>,
    pub fanout: Arc<HubFanout>,
}

impl Hub {
    pub async fn new(udp_addr: SocketAddr) -> SyncResult<Self> {
        Ok(Self {
            profiles: Arc::new(MemoryProfileBackend::new()),
            locks: Arc::new(MemoryCoordinationStore::new()),
            fanout: HubFanout::bind(udp_addr).await?,
        })
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(ENDPOINT_PROFILE, post(handle_upsert_profile))
            .route(ENDPOINT_PROFILE_FETCH, post(handle_fetch_profile))
            .route(ENDPOINT_LOCK_ACQUIRE, post(handle_acquire_lock))
            .route(ENDPOINT_LOCK_RELEASE, post(handle_release_lock))
            .route(ENDPOINT_LOCK_STATUS, post(handle_lock_status))
            .route(ENDPOINT_PUBLISH, post(handle_publish))
            .route(ENDPOINT_SUBSCRIBE, post(handle_subscribe))
            .layer(Extension(self.profiles.clone()))
            .layer(Extension(self.locks.clone()))
            .layer(Extension(self.fanout.clone()))
    }

    /// Spawns the lock sweeper and the subscription sweeper.
    pub fn start_background(&self) {
        let _lock_sweeper = self.locks.start_sweeper();

        let fanout = self.fanout.clone();
        let _subscription_sweeper = tokio::spawn(async move {
            let mut interval = tokio::time::interval(SUBSCRIPTION_SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                let removed = fanout.purge_expired();
                if removed > 0 {
                    tracing::info!("Dropped {} stale subscription(s)", removed);
                }
            }
        });

        let stats_profiles = self.profiles.clone();
        let stats_locks = self.locks.clone();
        let stats_fanout = self.fanout.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                interval.tick().await;
                tracing::info!(
                    "Hub stats: {} profile(s), {} lock(s) held, {} subscriber(s)",
                    stats_profiles.row_count(),
                    stats_locks.held_count(),
                    stats_fanout.subscriber_count()
                );
            }
        });
    }
}
