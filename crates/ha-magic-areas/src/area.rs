//! Area model

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use ha_core::slugify;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::config::AreaConfig;

/// Named condition tag carried by an area
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AreaState {
    Occupied,
    Clear,
    Extended,
    Sleep,
    Dark,
    Bright,
    Accented,
}

impl AreaState {
    pub fn as_str(self) -> &'static str {
        match self {
            AreaState::Occupied => "occupied",
            AreaState::Clear => "clear",
            AreaState::Extended => "extended",
            AreaState::Sleep => "sleep",
            AreaState::Dark => "dark",
            AreaState::Bright => "bright",
            AreaState::Accented => "accented",
        }
    }

    /// Whether this is OCCUPIED or CLEAR
    pub fn is_primary(self) -> bool {
        matches!(self, AreaState::Occupied | AreaState::Clear)
    }

    /// Rank in the SLEEP > EXTENDED > OCCUPIED > CLEAR overlay group
    pub fn priority(self) -> Option<u8> {
        match self {
            AreaState::Sleep => Some(3),
            AreaState::Extended => Some(2),
            AreaState::Occupied => Some(1),
            AreaState::Clear => Some(0),
            _ => None,
        }
    }
}

impl fmt::Display for AreaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of area
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AreaType {
    #[default]
    Interior,
    Exterior,
    /// Derived from other areas
    Meta,
}

/// A member entity as seen by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub entity_id: String,
    pub domain: String,
    /// Integration providing the entity, when registered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
}

/// Member entities by domain, domains in first-seen order
pub type AreaEntities = IndexMap<String, Vec<EntitySnapshot>>;

/// Weak reference from a meta area to one of its children
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildArea {
    pub id: String,
    pub slug: String,
}

/// A logical grouping of entities and its derived state
#[derive(Debug, Clone)]
pub struct Area {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub area_type: AreaType,
    pub config: AreaConfig,
    pub entities: AreaEntities,
    /// Children in enumeration order; empty unless meta
    pub children: Vec<ChildArea>,
    pub states: BTreeSet<AreaState>,
    /// Time of the last OCCUPIED/CLEAR flip
    pub last_changed: DateTime<Utc>,
}

impl Area {
    /// A fresh area starts CLEAR
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        config: AreaConfig,
        now: DateTime<Utc>,
    ) -> Self {
        let id = id.into();
        Self {
            slug: slugify(&id),
            id,
            name: name.into(),
            area_type: config.area_type,
            config,
            entities: AreaEntities::new(),
            children: Vec::new(),
            states: BTreeSet::from([AreaState::Clear]),
            last_changed: now,
        }
    }

    /// Build a meta area over `children`
    pub fn new_meta(
        id: impl Into<String>,
        name: impl Into<String>,
        config: AreaConfig,
        children: Vec<ChildArea>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut area = Self::new(id, name, config, now);
        area.area_type = AreaType::Meta;
        area.config.area_type = AreaType::Meta;
        area.children = children;
        area
    }

    pub fn is_meta(&self) -> bool {
        self.area_type == AreaType::Meta
    }

    pub fn is_occupied(&self) -> bool {
        self.states.contains(&AreaState::Occupied)
    }

    pub fn has_state(&self, state: AreaState) -> bool {
        self.states.contains(&state)
    }

    /// Highest state of the SLEEP > EXTENDED > OCCUPIED > CLEAR group
    pub fn priority_state(&self) -> Option<AreaState> {
        self.states
            .iter()
            .copied()
            .filter_map(|s| s.priority().map(|p| (p, s)))
            .max_by_key(|(p, _)| *p)
            .map(|(_, s)| s)
    }

    /// Whether `entity_id` is a resolved member
    pub fn has_entity(&self, entity_id: &str) -> bool {
        self.entities
            .values()
            .flatten()
            .any(|e| e.entity_id == entity_id)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kitchen() -> Area {
        Area::new("kitchen", "Kitchen Nook", AreaConfig::default(), Utc::now())
    }

    #[test]
    fn test_new_area_starts_clear() {
        let area = kitchen();
        assert_eq!(area.slug, "kitchen");
        assert_eq!(area.name, "Kitchen Nook");
        assert!(!area.is_occupied());
        assert!(area.has_state(AreaState::Clear));
        assert_eq!(area.states.len(), 1);
        assert!(!area.is_meta());
    }

    #[test]
    fn test_priority_state() {
        let mut area = kitchen();
        area.states = BTreeSet::from([
            AreaState::Occupied,
            AreaState::Extended,
            AreaState::Sleep,
            AreaState::Dark,
        ]);
        assert_eq!(area.priority_state(), Some(AreaState::Sleep));

        area.states = BTreeSet::from([AreaState::Occupied, AreaState::Bright]);
        assert_eq!(area.priority_state(), Some(AreaState::Occupied));
    }

    #[test]
    fn test_state_names() {
        assert_eq!(AreaState::Accented.to_string(), "accented");
        assert_eq!(
            serde_json::to_value(AreaState::Extended).unwrap(),
            serde_json::json!("extended")
        );
        assert!(AreaState::Clear.is_primary());
        assert!(!AreaState::Dark.is_primary());
    }

    #[test]
    fn test_meta_area_type_is_forced() {
        let area = Area::new_meta(
            "global",
            "Global",
            AreaConfig::default(),
            vec![ChildArea {
                id: "kitchen".to_string(),
                slug: "kitchen".to_string(),
            }],
            Utc::now(),
        );
        assert!(area.is_meta());
        assert_eq!(area.config.area_type, AreaType::Meta);
        assert_eq!(area.children.len(), 1);
    }
}
