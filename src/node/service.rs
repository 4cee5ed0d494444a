use super::admission::{Admission, AdmissionGate};
use super::disconnect::DisconnectHandler;
use super::listener::SaveRequestListener;
use super::runtime::{NodeHandle, NodeRuntime};
use super::shutdown::{ShutdownReport, flush_all};
use crate::context::SyncContext;
use crate::error::SyncResult;
use crate::profile::types::{OwnerId, SaveAck};

use std::sync::Arc;
use tokio::task::JoinHandle;

/// A running node: mutation task, admission gate, disconnect handler and
/// save-request listener over one `SyncContext`.
pub struct NodeService {
    pub ctx: Arc<SyncContext>,
    pub node: NodeHandle,
    gate: AdmissionGate,
    disconnect: Arc<DisconnectHandler>,
    listener_task: JoinHandle<()>,
}

impl NodeService {
    pub async fn start(ctx: Arc<SyncContext>) -> SyncResult<Arc<Self>> {
        let (node, _runtime_handle) = NodeRuntime::spawn(ctx.codec.clone());

        let listener_task = SaveRequestListener::new(ctx.clone(), node.clone())
            .start()
            .await?;

        tracing::info!("Node {} started", ctx.node_id);

        Ok(Arc::new(Self {
            gate: AdmissionGate::new(ctx.clone(), node.clone()),
            disconnect: Arc::new(DisconnectHandler::new(ctx.clone(), node.clone())),
            ctx,
            node,
            listener_task,
        }))
    }

    /// Session join hook.
    pub async fn join(&self, owner_id: &OwnerId, display_name: &str) -> SyncResult<Admission> {
        self.gate.admit(owner_id, display_name).await
    }

    /// Session end hook.
    pub async fn leave(&self, owner_id: &OwnerId) -> SyncResult<Option<SaveAck>> {
        self.disconnect.on_disconnect(owner_id).await
    }

    /// Flushes every active profile, then stops the node's tasks.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.listener_task.abort();

        let report = flush_all(
            &self.node,
            self.disconnect.clone(),
            self.ctx.config.shutdown_deadline,
        )
        .await;

        self.node.stop().await;

        tracing::info!("Node {} shut down", self.ctx.node_id);
        report
    }
}
