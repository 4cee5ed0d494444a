use super::types::{OwnerId, Profile};
use std::collections::HashMap;

/// Profiles with an active session on this node.
///
/// Owned by the node's mutation task, so it needs no locking. There is no
/// eviction: entries come and go with sessions only.
#[derive(Debug, Default)]
pub struct ProfileCache {
    active: HashMap<OwnerId, Profile>,
}

impl ProfileCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, owner_id: &OwnerId) -> Option<&Profile> {
        self.active.get(owner_id)
    }

    pub fn get_mut(&mut self, owner_id: &OwnerId) -> Option<&mut Profile> {
        self.active.get_mut(owner_id)
    }

    /// Inserts `profile`, returning the copy it displaced, if any.
    pub fn put(&mut self, profile: Profile) -> Option<Profile> {
        self.active.insert(profile.owner_id().clone(), profile)
    }

    pub fn remove(&mut self, owner_id: &OwnerId) -> Option<Profile> {
        self.active.remove(owner_id)
    }

    pub fn contains(&self, owner_id: &OwnerId) -> bool {
        self.active.contains_key(owner_id)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn owners(&self) -> impl Iterator<Item = &OwnerId> {
        self.active.keys()
    }

    /// Empties the cache for the shutdown flush.
    pub fn drain(&mut self) -> Vec<Profile> {
        self.active.drain().map(|(_, profile)| profile).collect()
    }
}
