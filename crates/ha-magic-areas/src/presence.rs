//! Presence sensor selection

use ha_core::domains;

use crate::area::Area;

/// Id of the binary sensor that mirrors an area's tracked state
pub fn area_state_entity_id(slug: &str) -> String {
    format!("{}.magic_areas_presence_tracking_{slug}_area_state", domains::BINARY_SENSOR)
}

/// Id of the switch that holds an area occupied while on
pub fn presence_hold_entity_id(slug: &str) -> String {
    format!("{}.magic_areas_presence_hold_{slug}", domains::SWITCH)
}

/// Entities whose state feeds the area's occupancy, without duplicates
///
/// Meta areas watch their children's area-state sensors. Other areas take
/// every entity of the configured presence domains, restricting
/// binary sensors to the allowed device classes.
pub fn select_presence_sensors(area: &Area) -> Vec<String> {
    let mut sensors: Vec<String> = Vec::new();
    let mut push = |entity_id: String| {
        if !sensors.contains(&entity_id) {
            sensors.push(entity_id);
        }
    };

    if area.is_meta() {
        for child in &area.children {
            push(area_state_entity_id(&child.slug));
        }
    } else {
        let config = &area.config;
        for domain in &config.presence_device_platforms {
            let Some(entities) = area.entities.get(domain) else {
                continue;
            };
            for entity in entities {
                if domain == domains::BINARY_SENSOR {
                    let allowed = entity.device_class.as_ref().is_some_and(|class| {
                        config.presence_sensor_device_class.contains(class)
                    });
                    if !allowed {
                        continue;
                    }
                }
                push(entity.entity_id.clone());
            }
        }
    }

    if area.config.has_presence_hold() {
        push(presence_hold_entity_id(&area.slug));
    }

    sensors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::area::{ChildArea, EntitySnapshot};
    use crate::config::{AreaConfig, PresenceHoldConfig};
    use chrono::Utc;

    fn snapshot(entity_id: &str, device_class: Option<&str>) -> EntitySnapshot {
        EntitySnapshot {
            entity_id: entity_id.to_string(),
            domain: entity_id.split('.').next().unwrap().to_string(),
            platform: Some("test".to_string()),
            device_class: device_class.map(str::to_string),
        }
    }

    fn area_with(entities: Vec<EntitySnapshot>, config: AreaConfig) -> Area {
        let mut area = Area::new("living_room", "Living Room", config, Utc::now());
        for entity in entities {
            area.entities
                .entry(entity.domain.clone())
                .or_default()
                .push(entity);
        }
        area
    }

    #[test]
    fn test_filters_binary_sensors_by_device_class() {
        let area = area_with(
            vec![
                snapshot("binary_sensor.motion", Some("motion")),
                snapshot("binary_sensor.door", Some("door")),
                snapshot("binary_sensor.unclassified", None),
                snapshot("media_player.tv", None),
                snapshot("light.ceiling", None),
            ],
            AreaConfig::default(),
        );

        assert_eq!(
            select_presence_sensors(&area),
            vec!["binary_sensor.motion", "media_player.tv"]
        );
    }

    #[test]
    fn test_configured_domain_order() {
        let config = AreaConfig {
            presence_device_platforms: vec!["media_player".to_string(), "binary_sensor".to_string()],
            ..AreaConfig::default()
        };
        let area = area_with(
            vec![
                snapshot("binary_sensor.occupancy", Some("occupancy")),
                snapshot("media_player.tv", None),
            ],
            config,
        );

        assert_eq!(
            select_presence_sensors(&area),
            vec!["media_player.tv", "binary_sensor.occupancy"]
        );
    }

    #[test]
    fn test_presence_hold_appended() {
        let mut config = AreaConfig::default();
        config.features.presence_hold = Some(PresenceHoldConfig::default());
        let area = area_with(vec![snapshot("binary_sensor.motion", Some("motion"))], config);

        assert_eq!(
            select_presence_sensors(&area),
            vec![
                "binary_sensor.motion",
                "switch.magic_areas_presence_hold_living_room"
            ]
        );
    }

    #[test]
    fn test_meta_area_uses_child_state_entities() {
        let children = ["kitchen", "hall"]
            .iter()
            .map(|slug| ChildArea {
                id: slug.to_string(),
                slug: slug.to_string(),
            })
            .collect();
        let mut area = Area::new_meta("interior", "Interior", AreaConfig::meta(), children, Utc::now());
        area.entities
            .insert("binary_sensor".to_string(), vec![snapshot("binary_sensor.motion", Some("motion"))]);

        assert_eq!(
            select_presence_sensors(&area),
            vec![
                "binary_sensor.magic_areas_presence_tracking_kitchen_area_state",
                "binary_sensor.magic_areas_presence_tracking_hall_area_state"
            ]
        );
    }
}
