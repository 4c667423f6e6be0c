//! Per-area configuration
//!
//! Every field has a default, so an area with no entry under `magic_areas`
//! behaves like one configured with `{}`.

use std::time::Duration;

use ha_core::states::{STATE_ABOVE_HORIZON, STATE_HOME, STATE_ON, STATE_OPEN, STATE_PLAYING};
use ha_core::{domains, EntityId};
use serde::{Deserialize, Serialize};

use crate::area::{AreaState, AreaType};
use crate::error::{MagicAreasError, MagicAreasResult};

/// Raw states that count as "active" for presence sensors
pub const PRESENCE_ON_STATES: &[&str] = &[STATE_ON, STATE_OPEN, STATE_HOME, STATE_PLAYING];

/// Raw states that count as "on" for secondary-state sources
pub const SECONDARY_ON_STATES: &[&str] = &[
    STATE_ON,
    STATE_OPEN,
    STATE_HOME,
    STATE_PLAYING,
    STATE_ABOVE_HORIZON,
];

fn default_presence_device_platforms() -> Vec<String> {
    vec![
        domains::BINARY_SENSOR.to_string(),
        domains::MEDIA_PLAYER.to_string(),
    ]
}

fn default_presence_sensor_device_class() -> Vec<String> {
    ["motion", "occupancy", "presence"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_clear_timeout() -> u32 {
    1
}

fn default_extended_time() -> u32 {
    5
}

fn default_extended_timeout() -> u32 {
    10
}

fn default_sleep_timeout() -> u32 {
    1
}

fn default_update_interval() -> u64 {
    60
}

/// Source entities for the configurable secondary states
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecondaryStatesConfig {
    /// Entity whose "on" state means bright (DARK is the inverse)
    pub dark_entity: Option<String>,
    pub sleep_entity: Option<String>,
    pub accent_entity: Option<String>,
}

/// Presence hold feature options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresenceHoldConfig {}

/// Optional per-area features
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeaturesConfig {
    pub presence_hold: Option<PresenceHoldConfig>,
}

/// Configuration of one area
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AreaConfig {
    #[serde(rename = "type")]
    pub area_type: AreaType,

    /// Entities added to the area regardless of registry placement
    pub include_entities: Vec<String>,

    /// Entities removed from the area
    pub exclude_entities: Vec<String>,

    /// Domains whose entities may act as presence sensors
    pub presence_device_platforms: Vec<String>,

    /// Allowed device classes for binary_sensor presence sensors
    pub presence_sensor_device_class: Vec<String>,

    /// Minutes
    pub clear_timeout: u32,

    /// Minutes of continuous occupancy before EXTENDED is added
    pub extended_time: u32,

    /// Minutes
    pub extended_timeout: u32,

    /// Minutes
    pub sleep_timeout: u32,

    /// Seconds between safety-net re-evaluations
    pub update_interval: u64,

    pub secondary_states: SecondaryStatesConfig,

    pub features: FeaturesConfig,
}

impl Default for AreaConfig {
    fn default() -> Self {
        Self {
            area_type: AreaType::Interior,
            include_entities: Vec::new(),
            exclude_entities: Vec::new(),
            presence_device_platforms: default_presence_device_platforms(),
            presence_sensor_device_class: default_presence_sensor_device_class(),
            clear_timeout: default_clear_timeout(),
            extended_time: default_extended_time(),
            extended_timeout: default_extended_timeout(),
            sleep_timeout: default_sleep_timeout(),
            update_interval: default_update_interval(),
            secondary_states: SecondaryStatesConfig::default(),
            features: FeaturesConfig::default(),
        }
    }
}

impl AreaConfig {
    /// Default config for a meta area
    pub fn meta() -> Self {
        Self {
            area_type: AreaType::Meta,
            ..Self::default()
        }
    }

    pub fn has_presence_hold(&self) -> bool {
        self.features.presence_hold.is_some()
    }

    /// Secondary states bound to a source entity, in evaluation order
    pub fn secondary_sources(&self) -> Vec<(AreaState, &str)> {
        let states = &self.secondary_states;
        [
            (AreaState::Sleep, &states.sleep_entity),
            (AreaState::Dark, &states.dark_entity),
            (AreaState::Accented, &states.accent_entity),
        ]
        .into_iter()
        .filter_map(|(state, entity)| entity.as_deref().map(|e| (state, e)))
        .collect()
    }

    pub fn is_dark_configured(&self) -> bool {
        self.secondary_states.dark_entity.is_some()
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval)
    }

    /// Check entity ids and intervals before an area is built
    pub fn validate(&self, area_id: &str) -> MagicAreasResult<()> {
        if self.update_interval == 0 {
            return Err(MagicAreasError::InvalidConfig {
                area_id: area_id.to_string(),
                reason: "update_interval must be greater than zero".to_string(),
            });
        }

        let referenced = self
            .include_entities
            .iter()
            .chain(&self.exclude_entities)
            .map(String::as_str)
            .chain(self.secondary_sources().into_iter().map(|(_, e)| e));

        for entity_id in referenced {
            entity_id
                .parse::<EntityId>()
                .map_err(|source| MagicAreasError::InvalidEntityId {
                    entity_id: entity_id.to_string(),
                    source,
                })?;
        }
        Ok(())
    }
}

/// Minutes to a duration
pub(crate) fn minutes(value: u32) -> Duration {
    Duration::from_secs(u64::from(value) * 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_mapping() {
        let config: AreaConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, AreaConfig::default());
        assert_eq!(config.presence_device_platforms, vec!["binary_sensor", "media_player"]);
        assert_eq!(
            config.presence_sensor_device_class,
            vec!["motion", "occupancy", "presence"]
        );
        assert_eq!(config.clear_timeout, 1);
        assert_eq!(config.update_interval(), Duration::from_secs(60));
        assert!(!config.has_presence_hold());
        assert!(config.secondary_sources().is_empty());
    }

    #[test]
    fn test_parse_full_area() {
        let config: AreaConfig = serde_yaml::from_str(
            r#"
type: exterior
clear_timeout: 3
secondary_states:
  dark_entity: sun.sun
  sleep_entity: switch.bedroom_sleep
features:
  presence_hold: {}
"#,
        )
        .unwrap();

        assert_eq!(config.area_type, AreaType::Exterior);
        assert_eq!(config.clear_timeout, 3);
        assert!(config.has_presence_hold());
        assert!(config.is_dark_configured());
        assert_eq!(
            config.secondary_sources(),
            vec![
                (AreaState::Sleep, "switch.bedroom_sleep"),
                (AreaState::Dark, "sun.sun")
            ]
        );
    }

    #[test]
    fn test_validate_rejects_bad_entity_ids() {
        let mut config = AreaConfig::default();
        config.include_entities.push("not an id".to_string());
        assert!(matches!(
            config.validate("kitchen"),
            Err(MagicAreasError::InvalidEntityId { .. })
        ));

        let config = AreaConfig {
            update_interval: 0,
            ..AreaConfig::default()
        };
        assert!(matches!(
            config.validate("kitchen"),
            Err(MagicAreasError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_minutes() {
        assert_eq!(minutes(2), Duration::from_secs(120));
    }
}
