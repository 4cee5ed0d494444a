use axum::{
    Json,
    extract::{Extension, Path},
    http::StatusCode,
};
use std::sync::Arc;

use super::protocol::{JoinRequest, JoinResponse, LeaveRequest, LeaveResponse, SessionResponse};
use super::service::NodeService;
use crate::error::SyncError;
use crate::profile::types::OwnerId;

pub async fn handle_session_join(
    Extension(service): Extension<Arc<NodeService>>,
    Json(req): Json<JoinRequest>,
) -> (StatusCode, Json<JoinResponse>) {
    let owner_id = OwnerId::new(req.owner_id);
    let display_name = req
        .display_name
        .unwrap_or_else(|| owner_id.as_str().to_string());

    match service.join(&owner_id, &display_name).await {
        Ok(admission) => (
            StatusCode::OK,
            Json(JoinResponse {
                admitted: true,
                reason: None,
                lock_checks: admission.lock_checks,
            }),
        ),
        Err(e) => {
            tracing::warn!("Join of {} refused: {}", owner_id, e);
            let (status, lock_checks) = match &e {
                SyncError::LockTimeout { attempts, .. } => (StatusCode::CONFLICT, *attempts),
                SyncError::NodeStopped => (StatusCode::SERVICE_UNAVAILABLE, 0),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, 0),
            };
            (
                status,
                Json(JoinResponse {
                    admitted: false,
                    reason: Some(e.user_reason().to_string()),
                    lock_checks,
                }),
            )
        }
    }
}

pub async fn handle_session_leave(
    Extension(service): Extension<Arc<NodeService>>,
    Json(req): Json<LeaveRequest>,
) -> (StatusCode, Json<LeaveResponse>) {
    let owner_id = OwnerId::new(req.owner_id);

    match service.leave(&owner_id).await {
        Ok(Some(ack)) => (
            StatusCode::OK,
            Json(LeaveResponse {
                saved: true,
                saved_at_ms: Some(ack.saved_at_ms),
            }),
        ),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(LeaveResponse {
                saved: false,
                saved_at_ms: None,
            }),
        ),
        Err(e) => {
            tracing::error!("Leave of {} failed: {}", owner_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(LeaveResponse {
                    saved: false,
                    saved_at_ms: None,
                }),
            )
        }
    }
}

pub async fn handle_get_session(
    Extension(service): Extension<Arc<NodeService>>,
    Path(owner_id): Path<String>,
) -> (StatusCode, Json<SessionResponse>) {
    let owner_id = OwnerId::new(owner_id);

    match service.node.capture(&owner_id).await {
        Ok(Some(record)) => (
            StatusCode::OK,
            Json(SessionResponse {
                display_name: Some(record.display_name),
                document: Some(record.data),
            }),
        ),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(SessionResponse {
                display_name: None,
                document: None,
            }),
        ),
        Err(e) => {
            tracing::error!("Failed to capture {}: {}", owner_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(SessionResponse {
                    display_name: None,
                    document: None,
                }),
            )
        }
    }
}
