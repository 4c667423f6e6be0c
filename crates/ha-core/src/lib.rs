//! Core host types
//!
//! This crate provides the value types shared by the host runtime and the
//! area presence engine: entity ids, state snapshots, bus events, the
//! well-known state vocabulary and a swappable clock.

mod clock;
mod entity_id;
mod event;
mod slug;
mod state;

pub mod domains;
pub mod states;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use entity_id::{EntityId, EntityIdError};
pub use event::{Event, EventData, EventType};
pub use slug::slugify;
pub use state::State;

/// Standard event types fired on the host bus
pub mod events {
    use super::*;

    /// Event type for state changes
    pub const STATE_CHANGED: &str = "state_changed";

    /// Event type for entity registry changes
    pub const ENTITY_REGISTRY_UPDATED: &str = "entity_registry_updated";

    /// Data for STATE_CHANGED events
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    pub struct StateChangedData {
        pub entity_id: EntityId,
        pub old_state: Option<State>,
        pub new_state: Option<State>,
    }

    impl StateChangedData {
        /// Raw state string of the new state, if any
        pub fn new_value(&self) -> Option<&str> {
            self.new_state.as_ref().map(|s| s.state.as_str())
        }

        /// Raw state string of the old state, if any
        pub fn old_value(&self) -> Option<&str> {
            self.old_state.as_ref().map(|s| s.state.as_str())
        }
    }

    impl EventData for StateChangedData {
        fn event_type() -> &'static str {
            STATE_CHANGED
        }
    }

    /// What happened to a registry entry
    #[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum RegistryAction {
        Create,
        Update,
        Remove,
    }

    /// Data for ENTITY_REGISTRY_UPDATED events
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    pub struct EntityRegistryUpdatedData {
        pub action: RegistryAction,
        pub entity_id: String,
        /// Area the entity belonged to before an update, when it moved
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub old_area_id: Option<String>,
        /// Area the entity belongs to now
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub area_id: Option<String>,
    }

    impl EntityRegistryUpdatedData {
        /// Whether this change touches the given area
        pub fn concerns_area(&self, area_id: &str) -> bool {
            self.area_id.as_deref() == Some(area_id) || self.old_area_id.as_deref() == Some(area_id)
        }
    }

    impl EventData for EntityRegistryUpdatedData {
        fn event_type() -> &'static str {
            ENTITY_REGISTRY_UPDATED
        }
    }
}
