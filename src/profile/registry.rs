//! Module Decoder Registry
//!
//! Maps module type tags (e.g. "stats", "quests") to decoder functions. Feature
//! modules register themselves at node startup; the codec consults the table
//! while decoding and routes any tag it cannot find to the profile's
//! unknown-data bucket instead of failing.

use super::types::{ModuleData, ProfileModule};

use dashmap::DashMap;
use std::sync::Arc;

/// Type-erased decoder: JSON payload in, boxed module data out.
pub type ModuleDecoderFn =
    Arc<dyn Fn(serde_json::Value) -> serde_json::Result<Box<dyn ModuleData>> + Send + Sync>;

/// Registry holding the mapping between type tags and their decoders.
pub struct ModuleRegistry {
    decoders: DashMap<String, ModuleDecoderFn>,
}

impl ModuleRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers `T` under its `ProfileModule::TAG`.
    pub fn register<T: ProfileModule>(&self) {
        self.register_decoder(T::TAG, |payload| {
            let value: T = serde_json::from_value(payload)?;
            Ok(Box::new(value) as Box<dyn ModuleData>)
        });
    }

    /// Registers a custom decoder under `tag`.
    ///
    /// A later registration for the same tag replaces the earlier one.
    pub fn register_decoder<F>(&self, tag: &str, decoder: F)
    where
        F: Fn(serde_json::Value) -> serde_json::Result<Box<dyn ModuleData>>
            + Send
            + Sync
            + 'static,
    {
        let decoder_fn: ModuleDecoderFn = Arc::new(decoder);
        if self.decoders.insert(tag.to_string(), decoder_fn).is_some() {
            tracing::warn!("Replaced decoder for module tag '{}'", tag);
        } else {
            tracing::info!("Registered module decoder: {}", tag);
        }
    }

    /// Decodes `payload` with the decoder registered for `tag`.
    ///
    /// # Returns
    /// * `None` if no decoder exists for `tag`.
    /// * `Some(Err)` if the decoder rejected the payload.
    pub fn decode(
        &self,
        tag: &str,
        payload: serde_json::Value,
    ) -> Option<serde_json::Result<Box<dyn ModuleData>>> {
        // Clone the Arc out so the shard lock is not held while decoding.
        let decoder = self.decoders.get(tag).map(|entry| entry.value().clone())?;
        Some(decoder(payload))
    }

    pub fn has_decoder(&self, tag: &str) -> bool {
        self.decoders.contains_key(tag)
    }

    pub fn decoder_count(&self) -> usize {
        self.decoders.len()
    }

    pub fn list_tags(&self) -> Vec<String> {
        self.decoders
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self {
            decoders: DashMap::new(),
        }
    }
}
