//! Entity Registry
//!
//! Tracks all registered entities with device linking and area indexes.
//! Every change is announced on the event bus as `entity_registry_updated`.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use ha_core::events::{EntityRegistryUpdatedData, RegistryAction};
use ha_event_bus::EventBus;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Errors that can occur in the entity registry
#[derive(Debug, Error, Clone)]
pub enum EntityRegistryError {
    /// Entity was not found
    #[error("Entity not found: {0}")]
    NotFound(String),
}

/// Reason an entity was disabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisabledBy {
    ConfigEntry,
    Device,
    Integration,
    User,
}

/// A registered entity entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityEntry {
    /// Full entity ID (domain.object_id)
    pub entity_id: String,

    /// Component/platform that provides this entity
    pub platform: String,

    /// Parent device ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,

    /// Area override; when unset the device's area applies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area_id: Option<String>,

    /// User-set device class
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,

    /// Platform default device class
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_device_class: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_by: Option<DisabledBy>,
}

impl EntityEntry {
    pub fn new(entity_id: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            platform: platform.into(),
            device_id: None,
            area_id: None,
            device_class: None,
            original_device_class: None,
            disabled_by: None,
        }
    }

    pub fn with_area(mut self, area_id: impl Into<String>) -> Self {
        self.area_id = Some(area_id.into());
        self
    }

    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn with_device_class(mut self, device_class: impl Into<String>) -> Self {
        self.device_class = Some(device_class.into());
        self
    }

    pub fn with_original_device_class(mut self, device_class: impl Into<String>) -> Self {
        self.original_device_class = Some(device_class.into());
        self
    }

    pub fn disabled(mut self, by: DisabledBy) -> Self {
        self.disabled_by = Some(by);
        self
    }

    /// Get the domain part of the entity_id
    pub fn domain(&self) -> &str {
        self.entity_id.split('.').next().unwrap_or("")
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled_by.is_some()
    }

    /// Registry device class, falling back to the platform default
    pub fn effective_device_class(&self) -> Option<&str> {
        self.device_class
            .as_deref()
            .or(self.original_device_class.as_deref())
    }
}

/// Entity Registry
///
/// Entries are `Arc<EntityEntry>` kept in registration order.
pub struct EntityRegistry {
    /// Primary index: entity_id -> EntityEntry, insertion ordered
    by_entity_id: RwLock<IndexMap<String, Arc<EntityEntry>>>,

    /// Index: device_id -> set of entity_ids
    by_device_id: DashMap<String, HashSet<String>>,

    /// Index: area_id -> set of entity_ids
    by_area_id: DashMap<String, HashSet<String>>,

    event_bus: Option<Arc<EventBus>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self {
            by_entity_id: RwLock::new(IndexMap::new()),
            by_device_id: DashMap::new(),
            by_area_id: DashMap::new(),
            event_bus: None,
        }
    }

    /// Create a registry that fires `entity_registry_updated` on `bus`
    pub fn with_event_bus(bus: Arc<EventBus>) -> Self {
        Self {
            event_bus: Some(bus),
            ..Self::new()
        }
    }

    fn index_secondary(&self, entry: &EntityEntry) {
        if let Some(ref device_id) = entry.device_id {
            self.by_device_id
                .entry(device_id.clone())
                .or_default()
                .insert(entry.entity_id.clone());
        }
        if let Some(ref area_id) = entry.area_id {
            self.by_area_id
                .entry(area_id.clone())
                .or_default()
                .insert(entry.entity_id.clone());
        }
    }

    fn unindex_secondary(&self, entry: &EntityEntry) {
        if let Some(ref device_id) = entry.device_id {
            if let Some(mut ids) = self.by_device_id.get_mut(device_id) {
                ids.remove(&entry.entity_id);
            }
        }
        if let Some(ref area_id) = entry.area_id {
            if let Some(mut ids) = self.by_area_id.get_mut(area_id) {
                ids.remove(&entry.entity_id);
            }
        }
    }

    fn notify(&self, action: RegistryAction, entry: &EntityEntry, old_area_id: Option<String>) {
        if let Some(ref bus) = self.event_bus {
            bus.fire_typed(EntityRegistryUpdatedData {
                action,
                entity_id: entry.entity_id.clone(),
                old_area_id,
                area_id: entry.area_id.clone(),
            });
        }
    }

    /// Sort ids by registration order
    fn in_order(&self, ids: &HashSet<String>) -> Vec<Arc<EntityEntry>> {
        let Ok(idx) = self.by_entity_id.read() else {
            return Vec::new();
        };
        let mut found: Vec<(usize, Arc<EntityEntry>)> = ids
            .iter()
            .filter_map(|id| idx.get_full(id).map(|(pos, _, e)| (pos, Arc::clone(e))))
            .collect();
        found.sort_by_key(|(pos, _)| *pos);
        found.into_iter().map(|(_, e)| e).collect()
    }

    /// Get entity by entity_id
    pub fn get(&self, entity_id: &str) -> Option<Arc<EntityEntry>> {
        self.by_entity_id
            .read()
            .ok()
            .and_then(|idx| idx.get(entity_id).cloned())
    }

    /// Entities with their own area set to `area_id`, in registration order
    pub fn get_by_area_id(&self, area_id: &str) -> Vec<Arc<EntityEntry>> {
        self.by_area_id
            .get(area_id)
            .map(|ids| self.in_order(&ids))
            .unwrap_or_default()
    }

    /// Entities of a device, in registration order
    pub fn get_by_device_id(&self, device_id: &str) -> Vec<Arc<EntityEntry>> {
        self.by_device_id
            .get(device_id)
            .map(|ids| self.in_order(&ids))
            .unwrap_or_default()
    }

    /// Register an entity, replacing any entry with the same id in place
    pub fn register(&self, entry: EntityEntry) -> Arc<EntityEntry> {
        let entry = Arc::new(entry);
        let old = self
            .by_entity_id
            .write()
            .ok()
            .and_then(|mut idx| idx.insert(entry.entity_id.clone(), Arc::clone(&entry)));

        match old {
            Some(old) => {
                self.unindex_secondary(&old);
                self.index_secondary(&entry);
                debug!(entity_id = %entry.entity_id, "Re-registered entity");
                self.notify(RegistryAction::Update, &entry, old.area_id.clone());
            }
            None => {
                self.index_secondary(&entry);
                info!("Registered new entity: {}", entry.entity_id);
                self.notify(RegistryAction::Create, &entry, None);
            }
        }
        entry
    }

    /// Update an entity entry
    pub fn update<F>(&self, entity_id: &str, f: F) -> Result<Arc<EntityEntry>, EntityRegistryError>
    where
        F: FnOnce(&mut EntityEntry),
    {
        let existing = self
            .get(entity_id)
            .ok_or_else(|| EntityRegistryError::NotFound(entity_id.to_string()))?;

        let mut entry = (*existing).clone();
        f(&mut entry);
        entry.entity_id = entity_id.to_string();

        Ok(self.register(entry))
    }

    /// Remove an entity
    pub fn remove(&self, entity_id: &str) -> Option<Arc<EntityEntry>> {
        let removed = self
            .by_entity_id
            .write()
            .ok()
            .and_then(|mut idx| idx.shift_remove(entity_id));

        if let Some(ref entry) = removed {
            self.unindex_secondary(entry);
            info!("Removed entity: {}", entity_id);
            self.notify(RegistryAction::Remove, entry, None);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.by_entity_id.read().map(|idx| idx.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All entries in registration order
    pub fn iter(&self) -> Vec<Arc<EntityEntry>> {
        self.by_entity_id
            .read()
            .map(|idx| idx.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new()
    }
}
