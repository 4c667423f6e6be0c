//! Host registries
//!
//! In-memory registries the area engine resolves membership against:
//! - Areas (AreaRegistry)
//! - Devices (DeviceRegistry)
//! - Entities (EntityRegistry)
//!
//! The entity registry announces changes on the event bus as
//! `entity_registry_updated` so running areas can reload their members.

pub mod area_registry;
pub mod device_registry;
pub mod entity_registry;

pub use area_registry::{AreaEntry, AreaRegistry};
pub use device_registry::{DeviceEntry, DeviceRegistry};
pub use entity_registry::{DisabledBy, EntityEntry, EntityRegistry, EntityRegistryError};

use std::sync::Arc;

use ha_event_bus::EventBus;

/// All registries bundled together
pub struct Registries {
    pub entities: EntityRegistry,
    pub devices: DeviceRegistry,
    pub areas: AreaRegistry,
}

impl Registries {
    /// Create empty registries that stay silent on the bus
    pub fn new() -> Self {
        Self {
            entities: EntityRegistry::new(),
            devices: DeviceRegistry::new(),
            areas: AreaRegistry::new(),
        }
    }

    /// Create empty registries whose entity changes are fired on `bus`
    pub fn with_event_bus(bus: Arc<EventBus>) -> Self {
        Self {
            entities: EntityRegistry::with_event_bus(bus),
            devices: DeviceRegistry::new(),
            areas: AreaRegistry::new(),
        }
    }

    /// Effective area of an entity: its own, else its device's
    pub fn entity_area_id(&self, entity: &EntityEntry) -> Option<String> {
        entity.area_id.clone().or_else(|| {
            entity
                .device_id
                .as_deref()
                .and_then(|device_id| self.devices.get(device_id))
                .and_then(|device| device.area_id.clone())
        })
    }
}

impl Default for Registries {
    fn default() -> Self {
        Self::new()
    }
}
