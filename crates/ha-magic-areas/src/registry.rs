//! Integration entry point
//!
//! [`MagicAreasRegistry`] turns the host area registry plus the
//! `magic_areas` configuration into running areas. Regular areas are set up
//! first; the reserved meta areas (`interior`, `exterior`, `global`) are then
//! built over the regular areas that started successfully.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use ha_core::slugify;
use ha_registries::Registries;
use ha_state_store::StateStore;
use indexmap::IndexMap;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use crate::area::{Area, AreaState, AreaType, ChildArea};
use crate::config::AreaConfig;
use crate::error::{MagicAreasError, MagicAreasResult, SubscriberError};
use crate::fanout::{AreaStateChange, SubscriptionId};
use crate::resolver::{aggregate_children, list_member_entities};
use crate::runtime::{AreaRuntime, AreaView};

pub const META_AREA_INTERIOR: &str = "interior";
pub const META_AREA_EXTERIOR: &str = "exterior";
pub const META_AREA_GLOBAL: &str = "global";

/// Meta areas in setup order
pub const META_AREAS: [&str; 3] = [META_AREA_INTERIOR, META_AREA_EXTERIOR, META_AREA_GLOBAL];

/// Per-area configuration keyed by area id
pub type MagicAreasConfig = IndexMap<String, AreaConfig>;

pub fn is_meta_area_id(area_id: &str) -> bool {
    META_AREAS.contains(&area_id)
}

fn meta_area_name(area_id: &str) -> &'static str {
    match area_id {
        META_AREA_INTERIOR => "Interior",
        META_AREA_EXTERIOR => "Exterior",
        _ => "Global",
    }
}

/// Whether a regular area of `area_type` belongs under the meta area
fn meta_includes(meta_id: &str, area_type: AreaType) -> bool {
    match meta_id {
        META_AREA_INTERIOR => area_type == AreaType::Interior,
        META_AREA_EXTERIOR => area_type == AreaType::Exterior,
        _ => area_type != AreaType::Meta,
    }
}

/// Outcome of [`MagicAreasRegistry::setup`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SetupSummary {
    pub started: Vec<String>,
    pub failed: Vec<String>,
    /// Meta areas with no children
    pub skipped: Vec<String>,
}

pub struct MagicAreasRegistry {
    registries: Arc<Registries>,
    store: Arc<StateStore>,
    config: MagicAreasConfig,
    runtimes: RwLock<IndexMap<String, AreaRuntime>>,
    initialized: AtomicBool,
}

impl MagicAreasRegistry {
    pub fn new(registries: Arc<Registries>, store: Arc<StateStore>, config: MagicAreasConfig) -> Self {
        Self {
            registries,
            store,
            config,
            runtimes: RwLock::new(IndexMap::new()),
            initialized: AtomicBool::new(false),
        }
    }

    /// Start every area
    ///
    /// A failing area is logged and recorded in the summary; the others keep
    /// going. Must be called from within a tokio runtime.
    #[instrument(skip(self))]
    pub async fn setup(&self) -> MagicAreasResult<SetupSummary> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            warn!("Magic areas already set up");
            return Err(MagicAreasError::AlreadyInitialized("magic_areas".to_string()));
        }

        let mut summary = SetupSummary::default();
        let mut regular: Vec<Area> = Vec::new();
        let mut slugs: HashSet<String> = HashSet::new();

        for entry in self.registries.areas.iter() {
            if is_meta_area_id(&entry.id) {
                warn!(area_id = %entry.id, "Area id is reserved for a meta area, skipping");
                summary.skipped.push(entry.id.clone());
                continue;
            }
            if !slugs.insert(slugify(&entry.id)) {
                error!(area_id = %entry.id, "Area id maps to the entity id of another area");
                summary.failed.push(entry.id.clone());
                continue;
            }
            let config = self.config.get(&entry.id).cloned().unwrap_or_default();
            match self.setup_area(&entry.id, &entry.name, config) {
                Ok(area) => {
                    summary.started.push(area.id.clone());
                    regular.push(area);
                }
                Err(err) => {
                    error!(area_id = %entry.id, %err, "Area setup failed");
                    summary.failed.push(entry.id.clone());
                }
            }
        }

        for area_id in self.config.keys() {
            if is_meta_area_id(area_id) || self.registries.areas.get(area_id).is_some() {
                continue;
            }
            let err = MagicAreasError::AreaNotFound(area_id.clone());
            error!(area_id = %area_id, %err, "Configured area is not registered");
            summary.failed.push(area_id.clone());
        }

        for meta_id in META_AREAS {
            let Some(config) = self.config.get(meta_id) else {
                continue;
            };
            let children: Vec<&Area> = regular
                .iter()
                .filter(|area| meta_includes(meta_id, area.area_type))
                .collect();
            if children.is_empty() {
                warn!(area_id = meta_id, "Meta area has no child areas, skipping");
                summary.skipped.push(meta_id.to_string());
                continue;
            }
            match self.setup_meta_area(meta_id, config.clone(), &children) {
                Ok(()) => summary.started.push(meta_id.to_string()),
                Err(err) => {
                    error!(area_id = meta_id, %err, "Meta area setup failed");
                    summary.failed.push(meta_id.to_string());
                }
            }
        }

        info!(
            started = summary.started.len(),
            failed = summary.failed.len(),
            skipped = summary.skipped.len(),
            "Magic areas set up"
        );
        Ok(summary)
    }

    fn setup_area(&self, area_id: &str, name: &str, config: AreaConfig) -> MagicAreasResult<Area> {
        config.validate(area_id)?;
        if config.area_type == AreaType::Meta {
            return Err(MagicAreasError::InvalidConfig {
                area_id: area_id.to_string(),
                reason: "type 'meta' is reserved for interior, exterior and global".to_string(),
            });
        }

        let mut area = Area::new(area_id, name, config, self.store.event_bus().clock().now());
        area.entities = list_member_entities(&self.registries, self.store.as_ref(), area_id, &area.config);
        self.start(area.clone())?;
        Ok(area)
    }

    fn setup_meta_area(&self, meta_id: &str, config: AreaConfig, children: &[&Area]) -> MagicAreasResult<()> {
        config.validate(meta_id)?;
        let child_refs = children
            .iter()
            .map(|child| ChildArea {
                id: child.id.clone(),
                slug: child.slug.clone(),
            })
            .collect();

        let mut area = Area::new_meta(
            meta_id,
            meta_area_name(meta_id),
            config,
            child_refs,
            self.store.event_bus().clock().now(),
        );
        area.entities = aggregate_children(children.iter().map(|child| &child.entities));
        self.start(area)
    }

    fn start(&self, area: Area) -> MagicAreasResult<()> {
        if self.contains(&area.id) {
            return Err(MagicAreasError::AlreadyInitialized(area.id));
        }
        let area_id = area.id.clone();
        let runtime = AreaRuntime::spawn(area, Arc::clone(&self.registries), Arc::clone(&self.store))?;
        if let Ok(mut runtimes) = self.runtimes.write() {
            runtimes.insert(area_id, runtime);
        }
        Ok(())
    }

    pub fn contains(&self, area_id: &str) -> bool {
        self.runtimes
            .read()
            .map(|runtimes| runtimes.contains_key(area_id))
            .unwrap_or(false)
    }

    /// Ids of running areas in setup order
    pub fn area_ids(&self) -> Vec<String> {
        self.runtimes
            .read()
            .map(|runtimes| runtimes.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn view(&self, area_id: &str) -> Option<AreaView> {
        self.runtimes.read().ok()?.get(area_id).map(AreaRuntime::view)
    }

    pub fn states(&self, area_id: &str) -> Option<BTreeSet<AreaState>> {
        self.view(area_id).map(|view| view.states)
    }

    pub fn is_occupied(&self, area_id: &str) -> Option<bool> {
        self.view(area_id).map(|view| view.is_occupied())
    }

    /// Receiver notified after every change of the area
    pub fn watch(&self, area_id: &str) -> Option<watch::Receiver<AreaView>> {
        self.runtimes.read().ok()?.get(area_id).map(AreaRuntime::watch)
    }

    /// Attach a handler to the area's change fan-out
    pub fn subscribe<F>(&self, area_id: &str, handler: F) -> MagicAreasResult<SubscriptionId>
    where
        F: Fn(&AreaStateChange) -> Result<(), SubscriberError> + Send + Sync + 'static,
    {
        let runtimes = self
            .runtimes
            .read()
            .map_err(|_| MagicAreasError::AreaNotFound(area_id.to_string()))?;
        let runtime = runtimes
            .get(area_id)
            .ok_or_else(|| MagicAreasError::AreaNotFound(area_id.to_string()))?;
        Ok(runtime.channel().subscribe(handler))
    }

    pub fn unsubscribe(&self, area_id: &str, id: SubscriptionId) -> bool {
        self.runtimes
            .read()
            .ok()
            .and_then(|runtimes| runtimes.get(area_id).map(|runtime| runtime.channel().unsubscribe(id)))
            .unwrap_or(false)
    }

    /// Stop every area, meta areas first
    pub async fn unload(&self) {
        let runtimes: Vec<AreaRuntime> = match self.runtimes.write() {
            Ok(mut runtimes) => runtimes.drain(..).map(|(_, runtime)| runtime).rev().collect(),
            Err(_) => Vec::new(),
        };
        let count = runtimes.len();
        for runtime in runtimes {
            runtime.shutdown().await;
        }
        self.initialized.store(false, Ordering::SeqCst);
        info!(count, "Magic areas unloaded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ha_core::ManualClock;
    use ha_event_bus::EventBus;
    use ha_registries::EntityEntry;
    use std::collections::HashMap;

    fn host() -> (Arc<Registries>, Arc<StateStore>) {
        let bus = Arc::new(EventBus::with_clock(Arc::new(ManualClock::new())));
        let registries = Arc::new(Registries::with_event_bus(bus.clone()));
        (registries, Arc::new(StateStore::new(bus)))
    }

    fn exterior() -> AreaConfig {
        AreaConfig {
            area_type: AreaType::Exterior,
            ..AreaConfig::default()
        }
    }

    #[test]
    fn test_meta_membership() {
        assert!(meta_includes(META_AREA_INTERIOR, AreaType::Interior));
        assert!(!meta_includes(META_AREA_INTERIOR, AreaType::Exterior));
        assert!(meta_includes(META_AREA_EXTERIOR, AreaType::Exterior));
        assert!(meta_includes(META_AREA_GLOBAL, AreaType::Exterior));
        assert!(!meta_includes(META_AREA_GLOBAL, AreaType::Meta));
        assert!(is_meta_area_id("global"));
        assert!(!is_meta_area_id("kitchen"));
    }

    #[tokio::test]
    async fn test_setup_regular_and_meta_areas() {
        let (registries, store) = host();
        registries.areas.create_with_id("kitchen", "Kitchen");
        registries.areas.create_with_id("garden", "Garden");
        registries.entities.register(
            EntityEntry::new("binary_sensor.kitchen_motion", "zha")
                .with_area("kitchen")
                .with_device_class("motion"),
        );
        store
            .set_str("binary_sensor.kitchen_motion", "on", HashMap::new())
            .unwrap();

        let config: MagicAreasConfig = IndexMap::from([
            ("garden".to_string(), exterior()),
            (META_AREA_INTERIOR.to_string(), AreaConfig::meta()),
            (META_AREA_GLOBAL.to_string(), AreaConfig::meta()),
        ]);
        let magic = MagicAreasRegistry::new(registries, store.clone(), config);
        let summary = magic.setup().await.unwrap();

        assert_eq!(summary.started, vec!["kitchen", "garden", "interior", "global"]);
        assert!(summary.failed.is_empty());
        assert_eq!(magic.is_occupied("kitchen"), Some(true));
        assert_eq!(magic.is_occupied("garden"), Some(false));
        assert!(magic.view("exterior").is_none());
        assert_eq!(
            store
                .get_state("binary_sensor.magic_areas_presence_tracking_kitchen_area_state")
                .as_deref(),
            Some("on")
        );

        let interior = magic.view("interior").unwrap();
        assert_eq!(
            interior.metadata.presence_sensors,
            vec!["binary_sensor.magic_areas_presence_tracking_kitchen_area_state"]
        );
        // the meta area was evaluated after its child wrote its entity
        assert!(interior.is_occupied());

        magic.unload().await;
        assert!(magic.area_ids().is_empty());
        assert!(store
            .get("binary_sensor.magic_areas_presence_tracking_kitchen_area_state")
            .is_none());
    }

    #[tokio::test]
    async fn test_setup_twice_fails() {
        let (registries, store) = host();
        registries.areas.create_with_id("kitchen", "Kitchen");
        let magic = MagicAreasRegistry::new(registries, store, MagicAreasConfig::new());

        magic.setup().await.unwrap();
        assert!(matches!(
            magic.setup().await,
            Err(MagicAreasError::AlreadyInitialized(_))
        ));
        magic.unload().await;
    }

    #[tokio::test]
    async fn test_setup_reports_failures() {
        let (registries, store) = host();
        registries.areas.create_with_id("kitchen", "Kitchen");
        registries.areas.create_with_id("hall", "Hall");

        let broken = AreaConfig {
            update_interval: 0,
            ..AreaConfig::default()
        };
        let config: MagicAreasConfig = IndexMap::from([
            ("hall".to_string(), broken),
            ("attic".to_string(), AreaConfig::default()),
            (META_AREA_EXTERIOR.to_string(), AreaConfig::meta()),
        ]);
        let magic = MagicAreasRegistry::new(registries, store, config);
        let summary = magic.setup().await.unwrap();

        assert_eq!(summary.started, vec!["kitchen"]);
        assert_eq!(summary.failed, vec!["hall", "attic"]);
        assert_eq!(summary.skipped, vec!["exterior"]);
        magic.unload().await;
    }

    #[tokio::test]
    async fn test_same_named_areas_keep_separate_entities() {
        let (registries, store) = host();
        let first = registries.areas.create("Den");
        let second = registries.areas.create("Den");
        assert_eq!((first.id.as_str(), second.id.as_str()), ("den", "den_2"));
        registries.entities.register(
            EntityEntry::new("binary_sensor.den_motion", "zha")
                .with_area("den")
                .with_device_class("motion"),
        );
        store.set_str("binary_sensor.den_motion", "on", HashMap::new()).unwrap();

        let config: MagicAreasConfig = IndexMap::from([(META_AREA_INTERIOR.to_string(), AreaConfig::meta())]);
        let magic = MagicAreasRegistry::new(registries, store.clone(), config);
        let summary = magic.setup().await.unwrap();

        assert_eq!(summary.started, vec!["den", "den_2", "interior"]);
        assert_eq!(magic.is_occupied("den"), Some(true));
        assert_eq!(magic.is_occupied("den_2"), Some(false));
        assert_eq!(
            store
                .get_state("binary_sensor.magic_areas_presence_tracking_den_area_state")
                .as_deref(),
            Some("on")
        );
        assert_eq!(
            store
                .get_state("binary_sensor.magic_areas_presence_tracking_den_2_area_state")
                .as_deref(),
            Some("off")
        );

        let interior = magic.view("interior").unwrap();
        assert_eq!(
            interior.metadata.presence_sensors,
            vec![
                "binary_sensor.magic_areas_presence_tracking_den_area_state",
                "binary_sensor.magic_areas_presence_tracking_den_2_area_state",
            ]
        );
        assert!(interior.is_occupied());

        magic.unload().await;
    }

    #[tokio::test]
    async fn test_colliding_area_ids_fail_setup() {
        let (registries, store) = host();
        registries.areas.create_with_id("den", "Den");
        registries.areas.create_with_id("Den", "Other Den");
        let magic = MagicAreasRegistry::new(registries, store, MagicAreasConfig::new());
        let summary = magic.setup().await.unwrap();

        assert_eq!(summary.started, vec!["den"]);
        assert_eq!(summary.failed, vec!["Den"]);
        magic.unload().await;
    }

    #[tokio::test]
    async fn test_subscribe_unknown_area() {
        let (registries, store) = host();
        let magic = MagicAreasRegistry::new(registries, store, MagicAreasConfig::new());
        assert!(matches!(
            magic.subscribe("nowhere", |_| Ok(())),
            Err(MagicAreasError::AreaNotFound(_))
        ));
    }
}
