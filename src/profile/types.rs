use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Stable unique identifier of a profile.
///
/// Hashed into the lock key and used as the primary key of the persisted row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerId(pub String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A feature module's slice of a profile.
///
/// Implement this for any serde type and register it with the
/// `ModuleRegistry`; the core never looks inside the value.
pub trait ProfileModule:
    Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static
{
    /// Type tag written next to the payload. Must stay stable across releases.
    const TAG: &'static str;
}

/// Object-safe view over a `ProfileModule` stored inside a `Profile`.
pub trait ModuleData: fmt::Debug + Send + Sync {
    fn type_tag(&self) -> &'static str;
    fn to_payload(&self) -> serde_json::Result<serde_json::Value>;
    fn clone_boxed(&self) -> Box<dyn ModuleData>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: ProfileModule> ModuleData for T {
    fn type_tag(&self) -> &'static str {
        T::TAG
    }

    fn to_payload(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }

    fn clone_boxed(&self) -> Box<dyn ModuleData> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Clone for Box<dyn ModuleData> {
    fn clone(&self) -> Self {
        self.clone_boxed()
    }
}

/// Module entry this node cannot interpret, kept verbatim for the next writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnknownEntry {
    pub tag: String,
    pub payload: serde_json::Value,
}

/// A per-owner data record.
///
/// Only the node that currently holds the session mutates it, and only on
/// that node's mutation task.
#[derive(Debug, Clone)]
pub struct Profile {
    owner_id: OwnerId,
    display_name: String,
    modules: HashMap<String, Box<dyn ModuleData>>,
    unknown: BTreeMap<String, UnknownEntry>,
}

impl Profile {
    /// Fresh profile with no module data.
    pub fn new(owner_id: OwnerId, display_name: impl Into<String>) -> Self {
        Self {
            owner_id,
            display_name: display_name.into(),
            modules: HashMap::new(),
            unknown: BTreeMap::new(),
        }
    }

    pub fn owner_id(&self) -> &OwnerId {
        &self.owner_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn set_display_name(&mut self, name: impl Into<String>) {
        self.display_name = name.into();
    }

    pub fn module<T: ProfileModule>(&self, key: &str) -> Option<&T> {
        self.modules
            .get(key)
            .and_then(|data| data.as_any().downcast_ref::<T>())
    }

    pub fn module_mut<T: ProfileModule>(&mut self, key: &str) -> Option<&mut T> {
        self.modules
            .get_mut(key)
            .and_then(|data| data.as_any_mut().downcast_mut::<T>())
    }

    /// Stores `value` under `key`, replacing any typed or unknown entry.
    pub fn set_module<T: ProfileModule>(&mut self, key: impl Into<String>, value: T) {
        let key = key.into();
        self.unknown.remove(&key);
        self.modules.insert(key, Box::new(value));
    }

    pub fn remove_module(&mut self, key: &str) -> bool {
        let typed = self.modules.remove(key).is_some();
        let unknown = self.unknown.remove(key).is_some();
        typed || unknown
    }

    pub fn module_keys(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    pub fn modules(&self) -> impl Iterator<Item = (&str, &dyn ModuleData)> {
        self.modules
            .iter()
            .map(|(key, data)| (key.as_str(), data.as_ref()))
    }

    pub fn unknown_entries(&self) -> &BTreeMap<String, UnknownEntry> {
        &self.unknown
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty() && self.unknown.is_empty()
    }

    pub(crate) fn rekey(&mut self, owner_id: OwnerId) {
        self.owner_id = owner_id;
    }

    pub(crate) fn insert_boxed(&mut self, key: String, data: Box<dyn ModuleData>) {
        self.unknown.remove(&key);
        self.modules.insert(key, data);
    }

    pub(crate) fn insert_unknown(&mut self, key: String, entry: UnknownEntry) {
        self.modules.remove(&key);
        self.unknown.insert(key, entry);
    }
}

/// Immutable capture of a profile as it is persisted.
///
/// This is the only form in which profile data leaves the mutation task:
/// store workers, the hub and the network see records, never `Profile`s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub owner_id: OwnerId,
    pub display_name: String,
    /// Codec output.
    pub data: serde_json::Value,
}

/// Confirmation returned by a successful save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveAck {
    pub owner_id: OwnerId,
    pub saved_at_ms: u64,
}

pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
