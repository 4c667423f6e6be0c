//! Read access to current entity states

use ha_core::State;
use ha_state_store::StateStore;

/// Current state lookup the engine reads from; never written through
pub trait EntitySnapshotProvider: Send + Sync {
    fn get_entity_state(&self, entity_id: &str) -> Option<State>;
}

impl EntitySnapshotProvider for StateStore {
    fn get_entity_state(&self, entity_id: &str) -> Option<State> {
        self.get(entity_id)
    }
}
