//! Sync Context
//!
//! The process-wide wiring of the synchronization layer: configuration, module
//! registry, codec, store, coordination store and channel. Built once at
//! startup and passed explicitly to every component.

use crate::config::SyncConfig;
use crate::coordination::channel::{InMemorySyncChannel, SyncChannel};
use crate::coordination::lock::{CoordinationStore, MemoryCoordinationStore};
use crate::profile::codec::ProfileCodec;
use crate::profile::registry::ModuleRegistry;
use crate::storage::backend::ProfileBackend;
use crate::storage::memory::MemoryProfileBackend;
use crate::storage::store::ProfileStore;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Identity of this process in logs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub struct SyncContext {
    pub node_id: NodeId,
    pub config: SyncConfig,
    pub registry: Arc<ModuleRegistry>,
    pub codec: Arc<ProfileCodec>,
    pub store: Arc<ProfileStore>,
    pub coordination: Arc<dyn CoordinationStore>,
    pub channel: Arc<dyn SyncChannel>,
}

impl SyncContext {
    pub fn init(
        config: SyncConfig,
        registry: Arc<ModuleRegistry>,
        backend: Arc<dyn ProfileBackend>,
        coordination: Arc<dyn CoordinationStore>,
        channel: Arc<dyn SyncChannel>,
    ) -> Arc<Self> {
        let codec = Arc::new(ProfileCodec::new(registry.clone()));
        let store = Arc::new(ProfileStore::new(backend, codec.clone(), &config));
        let node_id = NodeId::new();

        tracing::info!(
            node = %node_id,
            modules = registry.decoder_count(),
            "Sync context initialised"
        );

        Arc::new(Self {
            node_id,
            config,
            registry,
            codec,
            store,
            coordination,
            channel,
        })
    }

    /// Everything in this process: memory store, memory locks, local bus.
    pub fn in_memory(config: SyncConfig, registry: Arc<ModuleRegistry>) -> Arc<Self> {
        Self::init(
            config,
            registry,
            Arc::new(MemoryProfileBackend::new()),
            Arc::new(MemoryCoordinationStore::new()),
            Arc::new(InMemorySyncChannel::new()),
        )
    }
}
