//! Area-state entity adapter
//!
//! Mirrors a tracker into the host state store as
//! `binary_sensor.magic_areas_presence_tracking_{slug}_area_state`. Meta areas
//! read these entities as their presence sensors.

use std::collections::HashMap;
use std::sync::Arc;

use ha_core::states::{STATE_OFF, STATE_ON};
use ha_core::{EntityId, State};
use ha_state_store::StateStore;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{MagicAreasError, MagicAreasResult};
use crate::presence::area_state_entity_id;
use crate::tracker::AreaStateTracker;

pub struct AreaStateEntity {
    entity_id: EntityId,
    friendly_name: String,
    store: Arc<StateStore>,
}

impl AreaStateEntity {
    pub fn new(tracker: &AreaStateTracker, store: Arc<StateStore>) -> MagicAreasResult<Self> {
        let area = tracker.area();
        let raw = area_state_entity_id(&area.slug);
        let entity_id = raw
            .parse::<EntityId>()
            .map_err(|source| MagicAreasError::InvalidEntityId {
                entity_id: raw.clone(),
                source,
            })?;
        Ok(Self {
            entity_id,
            friendly_name: format!("Area ({})", area.name),
            store,
        })
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    /// Write the tracker's current state and metadata
    pub fn write(&self, tracker: &AreaStateTracker) -> State {
        let area = tracker.area();
        let mut attributes: HashMap<String, Value> =
            match serde_json::to_value(tracker.get_metadata()) {
                Ok(Value::Object(map)) => map.into_iter().collect(),
                Ok(_) => HashMap::new(),
                Err(err) => {
                    warn!(area_id = %area.id, %err, "Could not serialize area metadata");
                    HashMap::new()
                }
            };
        attributes.insert("friendly_name".into(), Value::from(self.friendly_name.clone()));
        attributes.insert("device_class".into(), Value::from("occupancy"));
        attributes.insert("area_id".into(), Value::from(area.id.clone()));
        attributes.insert("last_changed".into(), Value::from(area.last_changed.to_rfc3339()));
        if let Some(state) = area.priority_state() {
            attributes.insert("priority_state".into(), Value::from(state.as_str()));
        }

        let value = if area.is_occupied() { STATE_ON } else { STATE_OFF };
        debug!(entity_id = %self.entity_id, state = value, "Writing area state entity");
        self.store.set(self.entity_id.clone(), value, attributes)
    }

    pub fn remove(&self) {
        self.store.remove(&self.entity_id);
    }
}
