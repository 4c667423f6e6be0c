//! Area Registry
//!
//! Tracks all registered areas (rooms, zones) in the home.

use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use ha_core::slugify;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::info;

/// A registered area entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaEntry {
    /// Stable area id (e.g., "living_room")
    pub id: String,

    /// Area name (e.g., "Living Room")
    pub name: String,

    /// Area icon (e.g., "mdi:sofa")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl AreaEntry {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            icon: None,
        }
    }
}

/// Normalize a name for searching
fn normalize_name(name: &str) -> String {
    name.to_lowercase()
        .trim()
        .replace(|c: char| !c.is_alphanumeric() && c != ' ', "")
}

/// Area Registry
///
/// Entries are stored as `Arc<AreaEntry>` in insertion order.
pub struct AreaRegistry {
    /// Primary index: area_id -> AreaEntry
    by_id: RwLock<IndexMap<String, Arc<AreaEntry>>>,

    /// Index: normalized_name -> area_id
    by_name: DashMap<String, String>,
}

impl AreaRegistry {
    pub fn new() -> Self {
        Self {
            by_id: RwLock::new(IndexMap::new()),
            by_name: DashMap::new(),
        }
    }

    fn index_entry(&self, entry: Arc<AreaEntry>) {
        self.by_name
            .insert(normalize_name(&entry.name), entry.id.clone());
        if let Ok(mut idx) = self.by_id.write() {
            idx.insert(entry.id.clone(), entry);
        }
    }

    /// Get area by ID
    pub fn get(&self, area_id: &str) -> Option<Arc<AreaEntry>> {
        self.by_id
            .read()
            .ok()
            .and_then(|idx| idx.get(area_id).cloned())
    }

    /// Get area by name
    pub fn get_by_name(&self, name: &str) -> Option<Arc<AreaEntry>> {
        self.by_name
            .get(&normalize_name(name))
            .and_then(|area_id| self.get(&area_id))
    }

    /// Create a new area with an id derived from its name
    pub fn create(&self, name: &str) -> Arc<AreaEntry> {
        let base = slugify(name);
        let mut area_id = base.clone();
        let mut suffix = 2;
        while self.get(&area_id).is_some() {
            area_id = format!("{base}_{suffix}");
            suffix += 1;
        }
        self.create_with_id(&area_id, name)
    }

    /// Create (or replace) an area under an explicit id
    pub fn create_with_id(&self, area_id: &str, name: &str) -> Arc<AreaEntry> {
        if let Some(existing) = self.get(area_id) {
            self.by_name.remove(&normalize_name(&existing.name));
        }
        let entry = Arc::new(AreaEntry::new(area_id, name));
        info!("Created area: {} ({})", name, area_id);
        self.index_entry(Arc::clone(&entry));
        entry
    }

    /// Update an area in place
    pub fn update<F>(&self, area_id: &str, f: F) -> Option<Arc<AreaEntry>>
    where
        F: FnOnce(&mut AreaEntry),
    {
        let existing = self.get(area_id)?;
        self.by_name.remove(&normalize_name(&existing.name));

        let mut entry = (*existing).clone();
        f(&mut entry);
        // the id is the key
        entry.id = area_id.to_string();

        let new_arc = Arc::new(entry);
        self.index_entry(Arc::clone(&new_arc));
        Some(new_arc)
    }

    /// Remove an area
    pub fn remove(&self, area_id: &str) -> Option<Arc<AreaEntry>> {
        let removed = self
            .by_id
            .write()
            .ok()
            .and_then(|mut idx| idx.shift_remove(area_id));
        if let Some(ref entry) = removed {
            self.by_name.remove(&normalize_name(&entry.name));
            info!("Removed area: {}", area_id);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.by_id.read().map(|idx| idx.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All areas in creation order
    pub fn iter(&self) -> Vec<Arc<AreaEntry>> {
        self.by_id
            .read()
            .map(|idx| idx.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for AreaRegistry {
    fn default() -> Self {
        Self::new()
    }
}
