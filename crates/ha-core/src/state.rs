//! State snapshot of a single entity

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::states::{STATE_UNAVAILABLE, STATE_UNKNOWN};
use crate::EntityId;

/// The state of an entity at a point in time
///
/// The raw value is kept as a string (`"on"`, `"playing"`, `"below_horizon"`,
/// `"unavailable"`); interpretation is left to the reader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    pub entity_id: EntityId,

    /// Raw state value
    pub state: String,

    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,

    /// When the raw value last changed
    pub last_changed: DateTime<Utc>,

    /// When the value or attributes were last written
    pub last_updated: DateTime<Utc>,
}

impl State {
    /// Create a fresh state stamped with `now`
    pub fn new(
        entity_id: EntityId,
        state: impl Into<String>,
        attributes: HashMap<String, serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            entity_id,
            state: state.into(),
            attributes,
            last_changed: now,
            last_updated: now,
        }
    }

    /// Derive the successor state, keeping `last_changed` when the value is unchanged
    pub fn with_update(
        &self,
        new_state: impl Into<String>,
        new_attributes: HashMap<String, serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Self {
        let new_state = new_state.into();
        let last_changed = if self.state == new_state {
            self.last_changed
        } else {
            now
        };

        Self {
            entity_id: self.entity_id.clone(),
            state: new_state,
            attributes: new_attributes,
            last_changed,
            last_updated: now,
        }
    }

    /// `unknown` or `unavailable`
    pub fn is_invalid(&self) -> bool {
        self.state == STATE_UNKNOWN || self.state == STATE_UNAVAILABLE
    }

    /// Case-insensitive membership test against a state vocabulary
    pub fn is_one_of<S: AsRef<str>>(&self, vocabulary: &[S]) -> bool {
        vocabulary
            .iter()
            .any(|v| v.as_ref().eq_ignore_ascii_case(&self.state))
    }

    /// Get an attribute value by key
    pub fn attribute<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.attributes
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// `device_class` attribute, if the integration published one
    pub fn device_class(&self) -> Option<String> {
        self.attribute("device_class")
    }
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        // timestamps are bookkeeping, not identity
        self.entity_id == other.entity_id
            && self.state == other.state
            && self.attributes == other.attributes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn motion(state: &str, now: DateTime<Utc>) -> State {
        State::new(
            "binary_sensor.motion".parse().unwrap(),
            state,
            HashMap::from([("device_class".to_string(), json!("motion"))]),
            now,
        )
    }

    #[test]
    fn test_update_keeps_last_changed_for_same_value() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(5);
        let original = motion("on", t0);

        let same = original.with_update("on", HashMap::new(), t1);
        assert_eq!(same.last_changed, t0);
        assert_eq!(same.last_updated, t1);

        let changed = original.with_update("off", HashMap::new(), t1);
        assert_eq!(changed.last_changed, t1);
    }

    #[test]
    fn test_vocabulary_match_is_case_insensitive() {
        let state = motion("ON", Utc::now());
        assert!(state.is_one_of(&["on", "home"]));
        assert!(!state.is_one_of(&["off"]));
    }

    #[test]
    fn test_invalid_states() {
        assert!(motion("unknown", Utc::now()).is_invalid());
        assert!(motion("unavailable", Utc::now()).is_invalid());
        assert!(!motion("off", Utc::now()).is_invalid());
    }

    #[test]
    fn test_device_class_attribute() {
        assert_eq!(
            motion("on", Utc::now()).device_class().as_deref(),
            Some("motion")
        );
    }
}
