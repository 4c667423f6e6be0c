//! Entity state storage with domain indexing
//!
//! The StateStore holds the current state of every host entity, keeps a
//! domain index for listing, and fires STATE_CHANGED on the event bus when a
//! state or its attributes change. Timestamps come from the bus clock so a
//! manual clock drives the whole host in tests.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use ha_core::events::StateChangedData;
use ha_core::{EntityId, EntityIdError, State};
use ha_event_bus::EventBus;
use tracing::{debug, instrument, trace};

/// The state store tracks all entity states
pub struct StateStore {
    /// All entity states keyed by entity_id string
    states: DashMap<String, State>,
    /// Index of entity_ids by domain, in insertion order
    domain_index: DashMap<String, Vec<String>>,
    event_bus: Arc<EventBus>,
}

impl StateStore {
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self {
            states: DashMap::new(),
            domain_index: DashMap::new(),
            event_bus,
        }
    }

    /// The bus this store publishes on
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Set the state of an entity
    ///
    /// `last_changed` only moves when the raw value changes. A write that
    /// changes neither the value nor the attributes is stored silently.
    #[instrument(skip(self, state, attributes), fields(entity_id = %entity_id))]
    pub fn set(
        &self,
        entity_id: EntityId,
        state: impl Into<String>,
        attributes: HashMap<String, serde_json::Value>,
    ) -> State {
        let entity_id_str = entity_id.to_string();
        let now = self.event_bus.clock().now();

        let old_state = self.states.get(&entity_id_str).map(|s| s.clone());

        let new_state = match &old_state {
            Some(existing) => existing.with_update(state, attributes, now),
            None => State::new(entity_id.clone(), state, attributes, now),
        };

        let changed = old_state
            .as_ref()
            .map(|old| old.state != new_state.state || old.attributes != new_state.attributes)
            .unwrap_or(true);

        debug!(state = %new_state.state, changed, "Setting entity state");

        self.states.insert(entity_id_str.clone(), new_state.clone());

        if old_state.is_none() {
            self.domain_index
                .entry(entity_id.domain().to_string())
                .or_default()
                .push(entity_id_str);
        }

        if changed {
            self.event_bus.fire_typed(StateChangedData {
                entity_id,
                old_state,
                new_state: Some(new_state.clone()),
            });
        }

        new_state
    }

    /// Parse the id and set the state
    pub fn set_str(
        &self,
        entity_id: &str,
        state: impl Into<String>,
        attributes: HashMap<String, serde_json::Value>,
    ) -> Result<State, EntityIdError> {
        Ok(self.set(entity_id.parse()?, state, attributes))
    }

    /// Get the current state of an entity
    pub fn get(&self, entity_id: &str) -> Option<State> {
        self.states.get(entity_id).map(|s| s.clone())
    }

    /// Get the raw state value, or None if the entity doesn't exist
    pub fn get_state(&self, entity_id: &str) -> Option<String> {
        self.states.get(entity_id).map(|s| s.state.clone())
    }

    pub fn is_state(&self, entity_id: &str, state: &str) -> bool {
        self.get_state(entity_id).as_deref() == Some(state)
    }

    /// All entity ids of a domain, oldest first
    pub fn entity_ids(&self, domain: &str) -> Vec<String> {
        self.domain_index
            .get(domain)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    /// Remove an entity's state, firing STATE_CHANGED with no new state
    #[instrument(skip(self), fields(entity_id = %entity_id))]
    pub fn remove(&self, entity_id: &EntityId) -> Option<State> {
        let entity_id_str = entity_id.to_string();

        let old_state = self.states.remove(&entity_id_str).map(|(_, s)| s);

        if let Some(ref state) = old_state {
            trace!("Removing entity state");

            if let Some(mut ids) = self.domain_index.get_mut(entity_id.domain()) {
                ids.retain(|id| id != &entity_id_str);
            }

            self.event_bus.fire_typed(StateChangedData {
                entity_id: entity_id.clone(),
                old_state: Some(state.clone()),
                new_state: None,
            });
        }

        old_state
    }

    pub fn entity_count(&self) -> usize {
        self.states.len()
    }
}

/// Thread-safe wrapper for StateStore
pub type SharedStateStore = Arc<StateStore>;
