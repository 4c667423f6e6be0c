//! Area entity resolution
//!
//! Computes which entities belong to an area from the host registries and the
//! area's include/exclude lists.

use ha_core::{EntityId, State};
use ha_registries::{EntityEntry, Registries};
use tracing::{debug, trace};

use crate::area::{AreaEntities, EntitySnapshot};
use crate::config::AreaConfig;
use crate::provider::EntitySnapshotProvider;

/// Platform of the engine's own entities, never members of an area
pub const OWN_PLATFORM: &str = "magic_areas";

/// List the member entities of `area_id` by domain
///
/// Registry order is kept. Entities in `include_entities` that the registry
/// does not place here are appended afterwards in config order.
pub fn list_member_entities(
    registries: &Registries,
    states: &dyn EntitySnapshotProvider,
    area_id: &str,
    config: &AreaConfig,
) -> AreaEntities {
    let excluded = |entity_id: &str| config.exclude_entities.iter().any(|e| e == entity_id);
    let included = |entity_id: &str| config.include_entities.iter().any(|e| e == entity_id);

    let mut entities = AreaEntities::new();

    for entry in registries.entities.iter() {
        if entry.is_disabled() || entry.platform == OWN_PLATFORM {
            trace!(entity_id = %entry.entity_id, "Skipping entity");
            continue;
        }
        let in_area = registries.entity_area_id(&entry).as_deref() == Some(area_id);
        if !(in_area || included(&entry.entity_id)) || excluded(&entry.entity_id) {
            continue;
        }
        if let Some(snapshot) = snapshot_for(&entry.entity_id, Some(&*entry), states) {
            push_unique(&mut entities, snapshot);
        }
    }

    for entity_id in &config.include_entities {
        if excluded(entity_id) || registries.entities.get(entity_id).is_some() {
            continue;
        }
        if let Some(snapshot) = snapshot_for(entity_id, None, states) {
            push_unique(&mut entities, snapshot);
        }
    }

    debug!(
        area_id,
        count = entities.values().map(Vec::len).sum::<usize>(),
        "Resolved area entities"
    );
    entities
}

/// Merge child entity maps in child order, dropping duplicates
pub fn aggregate_children<'a>(children: impl IntoIterator<Item = &'a AreaEntities>) -> AreaEntities {
    let mut entities = AreaEntities::new();
    for child in children {
        for snapshot in child.values().flatten() {
            push_unique(&mut entities, snapshot.clone());
        }
    }
    entities
}

fn snapshot_for(
    entity_id: &str,
    entry: Option<&EntityEntry>,
    states: &dyn EntitySnapshotProvider,
) -> Option<EntitySnapshot> {
    let Ok(parsed) = entity_id.parse::<EntityId>() else {
        debug!(entity_id, "Ignoring malformed entity id");
        return None;
    };

    let device_class = entry
        .and_then(|e| e.effective_device_class().map(str::to_string))
        .or_else(|| {
            states
                .get_entity_state(entity_id)
                .as_ref()
                .and_then(State::device_class)
        });

    Some(EntitySnapshot {
        entity_id: entity_id.to_string(),
        domain: parsed.domain().to_string(),
        platform: entry.map(|e| e.platform.clone()),
        device_class,
    })
}

fn push_unique(entities: &mut AreaEntities, snapshot: EntitySnapshot) {
    let list = entities.entry(snapshot.domain.clone()).or_default();
    if !list.iter().any(|e| e.entity_id == snapshot.entity_id) {
        list.push(snapshot);
    }
}
