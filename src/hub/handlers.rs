use axum::{
    Json,
    extract::Extension,
    http::StatusCode,
};
use std::sync::Arc;
use std::time::Duration;

use super::fanout::HubFanout;
use super::protocol::{
    AckResponse, AcquireLockRequest, AcquireLockResponse, FetchProfileRequest,
    FetchProfileResponse, LockStatusRequest, LockStatusResponse, PublishRequest, PublishResponse,
    ReleaseLockRequest, SubscribeRequest,
};
use crate::coordination::channel::SyncMessage;
use crate::coordination::lock::{CoordinationStore, MemoryCoordinationStore};
use crate::profile::types::ProfileRecord;
use crate::storage::backend::ProfileBackend;
use crate::storage::memory::MemoryProfileBackend;

pub async fn handle_fetch_profile(
    Extension(profiles): Extension<Arc<MemoryProfileBackend>>,
    Json(req): Json<FetchProfileRequest>,
) -> (StatusCode, Json<FetchProfileResponse>) {
    let record = profiles.get_local(&req.owner_id);
    if record.is_none() {
        tracing::debug!("No stored profile for {}", req.owner_id);
    }
    (StatusCode::OK, Json(FetchProfileResponse { record }))
}

pub async fn handle_upsert_profile(
    Extension(profiles): Extension<Arc<MemoryProfileBackend>>,
    Json(record): Json<ProfileRecord>,
) -> (StatusCode, Json<AckResponse>) {
    let owner_id = record.owner_id.clone();

    match profiles.upsert(record).await {
        Ok(()) => {
            tracing::debug!("Stored profile {}", owner_id);
            (StatusCode::OK, Json(AckResponse { success: true }))
        }
        Err(e) => {
            tracing::error!("Failed to store profile {}: {}", owner_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(AckResponse { success: false }),
            )
        }
    }
}

pub async fn handle_acquire_lock(
    Extension(locks): Extension<Arc<MemoryCoordinationStore>>,
    Json(req): Json<AcquireLockRequest>,
) -> (StatusCode, Json<AcquireLockResponse>) {
    match locks.acquire(&req.key, Duration::from_millis(req.ttl_ms)).await {
        Ok(acquired) => (StatusCode::OK, Json(AcquireLockResponse { acquired })),
        Err(e) => {
            tracing::error!("Failed to acquire {}: {}", req.key, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(AcquireLockResponse { acquired: false }),
            )
        }
    }
}

pub async fn handle_release_lock(
    Extension(locks): Extension<Arc<MemoryCoordinationStore>>,
    Json(req): Json<ReleaseLockRequest>,
) -> (StatusCode, Json<AckResponse>) {
    match locks.release(&req.key).await {
        Ok(()) => (StatusCode::OK, Json(AckResponse { success: true })),
        Err(e) => {
            tracing::error!("Failed to release {}: {}", req.key, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(AckResponse { success: false }),
            )
        }
    }
}

pub async fn handle_lock_status(
    Extension(locks): Extension<Arc<MemoryCoordinationStore>>,
    Json(req): Json<LockStatusRequest>,
) -> (StatusCode, Json<LockStatusResponse>) {
    let key = req.key;
    match locks.exists(&key).await {
        Ok(held) => (StatusCode::OK, Json(LockStatusResponse { key, held })),
        Err(e) => {
            tracing::error!("Failed to check {}: {}", key, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(LockStatusResponse { key, held: true }),
            )
        }
    }
}

pub async fn handle_publish(
    Extension(fanout): Extension<Arc<HubFanout>>,
    Json(req): Json<PublishRequest>,
) -> (StatusCode, Json<PublishResponse>) {
    let message = SyncMessage {
        topic: req.topic,
        payload: req.payload,
    };

    match fanout.fanout(&message).await {
        Ok(delivered) => (StatusCode::OK, Json(PublishResponse { delivered })),
        Err(e) => {
            tracing::error!("Failed to fan out '{}': {}", message.topic, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(PublishResponse { delivered: 0 }),
            )
        }
    }
}

pub async fn handle_subscribe(
    Extension(fanout): Extension<Arc<HubFanout>>,
    Json(req): Json<SubscribeRequest>,
) -> (StatusCode, Json<AckResponse>) {
    fanout.register(&req.pattern, req.udp_addr);
    (StatusCode::OK, Json(AckResponse { success: true }))
}
