//! Profile Codec
//!
//! Serialises a `Profile` into one JSON document:
//!
//! ```text
//! {
//!   "owner_id": "abc",
//!   "display_name": "Nick",
//!   "modules": {
//!     "<module key>": { "type": "<tag>", "payload": <module json> },
//!     ...
//!   }
//! }
//! ```
//!
//! Decoding fails only when the root document is malformed. Every module entry
//! is decoded on its own: an unregistered tag, or a payload its decoder rejects,
//! goes to the unknown-data bucket with its tag intact; an entry that is not
//! even a `{type, payload}` pair is dropped with a warning.

use super::registry::ModuleRegistry;
use super::types::{OwnerId, Profile, ProfileRecord, UnknownEntry};
use crate::error::{SyncError, SyncResult};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Serialize, Deserialize)]
struct ProfileDocument {
    owner_id: String,
    display_name: String,
    #[serde(default)]
    modules: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TaggedEntry {
    #[serde(rename = "type")]
    tag: String,
    payload: serde_json::Value,
}

pub struct ProfileCodec {
    registry: Arc<ModuleRegistry>,
}

impl ProfileCodec {
    pub fn new(registry: Arc<ModuleRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn encode(&self, profile: &Profile) -> SyncResult<Vec<u8>> {
        let document = self.write_document(profile)?;
        serde_json::to_vec(&document).map_err(|e| SyncError::Encode {
            module_key: String::new(),
            message: e.to_string(),
        })
    }

    pub fn decode(&self, bytes: &[u8]) -> SyncResult<Profile> {
        let document: serde_json::Value =
            serde_json::from_slice(bytes).map_err(|e| SyncError::Decode(e.to_string()))?;
        self.read_document(document)
    }

    /// Captures `profile` as a persistable record.
    pub fn snapshot(&self, profile: &Profile) -> SyncResult<ProfileRecord> {
        Ok(ProfileRecord {
            owner_id: profile.owner_id().clone(),
            display_name: profile.display_name().to_string(),
            data: self.write_document(profile)?,
        })
    }

    /// Rebuilds a profile from a stored record.
    pub fn restore(&self, record: ProfileRecord) -> SyncResult<Profile> {
        let mut profile = self.read_document(record.data)?;
        if profile.owner_id() != &record.owner_id {
            tracing::warn!(
                "Stored document for {} carries owner id {}, keeping row key",
                record.owner_id,
                profile.owner_id()
            );
            profile.rekey(record.owner_id);
        }
        profile.set_display_name(record.display_name);
        Ok(profile)
    }

    fn write_document(&self, profile: &Profile) -> SyncResult<serde_json::Value> {
        let mut modules = BTreeMap::new();

        for (key, entry) in profile.unknown_entries() {
            modules.insert(key.clone(), tagged(entry.tag.clone(), entry.payload.clone()));
        }

        for (key, data) in profile.modules() {
            let payload = data.to_payload().map_err(|e| SyncError::Encode {
                module_key: key.to_string(),
                message: e.to_string(),
            })?;
            modules.insert(key.to_string(), tagged(data.type_tag().to_string(), payload));
        }

        let document = ProfileDocument {
            owner_id: profile.owner_id().0.clone(),
            display_name: profile.display_name().to_string(),
            modules,
        };

        serde_json::to_value(document).map_err(|e| SyncError::Encode {
            module_key: String::new(),
            message: e.to_string(),
        })
    }

    fn read_document(&self, document: serde_json::Value) -> SyncResult<Profile> {
        let document: ProfileDocument =
            serde_json::from_value(document).map_err(|e| SyncError::Decode(e.to_string()))?;

        let mut profile = Profile::new(OwnerId(document.owner_id), document.display_name);

        for (key, raw) in document.modules {
            let entry: TaggedEntry = match serde_json::from_value(raw) {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(
                        "Dropping corrupt module entry '{}' of profile {}: {}",
                        key,
                        profile.owner_id(),
                        e
                    );
                    continue;
                }
            };

            match self.registry.decode(&entry.tag, entry.payload.clone()) {
                Some(Ok(data)) => profile.insert_boxed(key, data),
                Some(Err(e)) => {
                    tracing::warn!(
                        "Module '{}' (tag '{}') of profile {} failed to decode, keeping raw: {}",
                        key,
                        entry.tag,
                        profile.owner_id(),
                        e
                    );
                    profile.insert_unknown(key, unknown(entry));
                }
                None => {
                    tracing::debug!(
                        "No decoder for tag '{}' (module '{}'), keeping raw",
                        entry.tag,
                        key
                    );
                    profile.insert_unknown(key, unknown(entry));
                }
            }
        }

        Ok(profile)
    }
}

fn tagged(tag: String, payload: serde_json::Value) -> serde_json::Value {
    serde_json::json!({ "type": tag, "payload": payload })
}

fn unknown(entry: TaggedEntry) -> UnknownEntry {
    UnknownEntry {
        tag: entry.tag,
        payload: entry.payload,
    }
}
