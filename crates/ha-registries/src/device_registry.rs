//! Device Registry
//!
//! Tracks physical devices and the area each one is placed in. Entities
//! without an area of their own inherit their device's area.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// A registered device entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Area the device is placed in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area_id: Option<String>,
}

impl DeviceEntry {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            area_id: None,
        }
    }

    pub fn with_area(mut self, area_id: impl Into<String>) -> Self {
        self.area_id = Some(area_id.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Name for display, falling back to the id
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Device Registry
pub struct DeviceRegistry {
    /// Primary index: device_id -> DeviceEntry
    by_id: DashMap<String, Arc<DeviceEntry>>,

    /// Index: area_id -> set of device_ids
    by_area_id: DashMap<String, HashSet<String>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            by_id: DashMap::new(),
            by_area_id: DashMap::new(),
        }
    }

    fn unindex_area(&self, entry: &DeviceEntry) {
        if let Some(ref area_id) = entry.area_id {
            if let Some(mut ids) = self.by_area_id.get_mut(area_id) {
                ids.remove(&entry.id);
            }
        }
    }

    /// Insert or replace a device
    pub fn insert(&self, entry: DeviceEntry) -> Arc<DeviceEntry> {
        if let Some((_, old)) = self.by_id.remove(&entry.id) {
            self.unindex_area(&old);
        }

        if let Some(ref area_id) = entry.area_id {
            self.by_area_id
                .entry(area_id.clone())
                .or_default()
                .insert(entry.id.clone());
        }

        debug!(device_id = %entry.id, area_id = ?entry.area_id, "Registered device");
        let entry = Arc::new(entry);
        self.by_id.insert(entry.id.clone(), Arc::clone(&entry));
        entry
    }

    pub fn get(&self, device_id: &str) -> Option<Arc<DeviceEntry>> {
        self.by_id.get(device_id).map(|r| Arc::clone(r.value()))
    }

    /// Get all devices placed in an area
    pub fn get_by_area_id(&self, area_id: &str) -> Vec<Arc<DeviceEntry>> {
        self.by_area_id
            .get(area_id)
            .map(|ids| ids.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default()
    }

    /// Update a device
    pub fn update<F>(&self, device_id: &str, f: F) -> Option<Arc<DeviceEntry>>
    where
        F: FnOnce(&mut DeviceEntry),
    {
        let mut entry = (*self.get(device_id)?).clone();
        f(&mut entry);
        entry.id = device_id.to_string();
        Some(self.insert(entry))
    }

    pub fn remove(&self, device_id: &str) -> Option<Arc<DeviceEntry>> {
        let (_, entry) = self.by_id.remove(device_id)?;
        self.unindex_area(&entry);
        info!("Removed device: {}", device_id);
        Some(entry)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_area_index_follows_updates() {
        let registry = DeviceRegistry::new();
        registry.insert(DeviceEntry::new("hub1").with_area("kitchen"));
        registry.insert(DeviceEntry::new("hub2").with_area("kitchen"));

        assert_eq!(registry.get_by_area_id("kitchen").len(), 2);

        registry.update("hub1", |d| d.area_id = Some("garage".to_string()));
        assert_eq!(registry.get_by_area_id("kitchen").len(), 1);
        assert_eq!(registry.get_by_area_id("garage")[0].id, "hub1");

        registry.remove("hub2");
        assert!(registry.get_by_area_id("kitchen").is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_display_name() {
        let named = DeviceEntry::new("hub1").with_name("Zigbee Hub");
        assert_eq!(named.display_name(), "Zigbee Hub");
        assert_eq!(DeviceEntry::new("hub2").display_name(), "hub2");
    }
}
