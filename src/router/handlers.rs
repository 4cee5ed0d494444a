use axum::{Json, extract::Extension, http::StatusCode};
use std::sync::Arc;

use super::coordinator::{SaveOutcome, SwitchCoordinator};
use super::protocol::{SwitchRequest, SwitchResponse};
use crate::error::SyncError;
use crate::profile::types::OwnerId;

pub async fn handle_switch(
    Extension(coordinator): Extension<Arc<SwitchCoordinator>>,
    Json(req): Json<SwitchRequest>,
) -> (StatusCode, Json<SwitchResponse>) {
    let owner_id = OwnerId::new(req.owner_id);

    match coordinator.switch(&owner_id, &req.target).await {
        Ok(report) => (
            StatusCode::OK,
            Json(SwitchResponse {
                switched: true,
                save_confirmed: report.outcome == SaveOutcome::Confirmed,
                waited_ms: report.waited.as_millis() as u64,
                reason: None,
            }),
        ),
        Err(e) => {
            tracing::warn!("Switch of {} to {} failed: {}", owner_id, req.target, e);
            let (status, waited_ms) = match &e {
                SyncError::SaveTimeout { timeout_ms, .. } => (StatusCode::CONFLICT, *timeout_ms),
                _ => (StatusCode::BAD_GATEWAY, 0),
            };
            (
                status,
                Json(SwitchResponse {
                    switched: false,
                    save_confirmed: false,
                    waited_ms,
                    reason: Some(e.user_reason().to_string()),
                }),
            )
        }
    }
}
