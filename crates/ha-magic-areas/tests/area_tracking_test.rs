//! End-to-end area tracking tests
//!
//! Trackers are driven with a manual clock and a manual scheduler so every
//! timeout fires deterministically.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ha_core::events::StateChangedData;
use ha_core::{Clock, EntityId, ManualClock};
use ha_event_bus::EventBus;
use ha_magic_areas::{
    area_state_entity_id, Area, AreaConfig, AreaState, AreaStateChange, AreaStateTracker,
    ChildArea, EntitySnapshot, ManualScheduler, SecondaryStatesConfig, TimeoutManager,
};
use ha_state_store::StateStore;

const MOTION: &str = "binary_sensor.office_motion";

struct Harness {
    clock: ManualClock,
    store: Arc<StateStore>,
    scheduler: Arc<ManualScheduler<AreaStateTracker>>,
}

impl Harness {
    fn new() -> Self {
        let clock = ManualClock::new();
        let bus = Arc::new(EventBus::with_clock(Arc::new(clock.clone())));
        Self {
            scheduler: Arc::new(ManualScheduler::new(Arc::new(clock.clone()))),
            store: Arc::new(StateStore::new(bus)),
            clock,
        }
    }

    fn office(&self, config: AreaConfig) -> AreaStateTracker {
        let mut area = Area::new("office", "Office", config, self.clock.now());
        area.entities.insert(
            "binary_sensor".to_string(),
            vec![EntitySnapshot {
                entity_id: MOTION.to_string(),
                domain: "binary_sensor".to_string(),
                platform: Some("zha".to_string()),
                device_class: Some("motion".to_string()),
            }],
        );
        self.tracker(area)
    }

    fn tracker(&self, area: Area) -> AreaStateTracker {
        AreaStateTracker::new(
            area,
            self.store.clone(),
            Arc::new(self.clock.clone()),
            self.scheduler.clone(),
        )
    }

    fn set(&self, entity_id: &str, value: &str) -> StateChangedData {
        let old_state = self.store.get(entity_id);
        let new_state = self.store.set_str(entity_id, value, HashMap::new()).unwrap();
        StateChangedData {
            entity_id: entity_id.parse::<EntityId>().unwrap(),
            old_state,
            new_state: Some(new_state),
        }
    }

    fn report(&self, tracker: &mut AreaStateTracker, entity_id: &str, value: &str) {
        let change = self.set(entity_id, value);
        tracker.handle_state_change(&change);
    }
}

fn record(tracker: &AreaStateTracker) -> Arc<Mutex<Vec<AreaStateChange>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    tracker.channel().subscribe(move |change| {
        sink.lock().unwrap().push(change.clone());
        Ok(())
    });
    seen
}

fn states(list: &[AreaState]) -> BTreeSet<AreaState> {
    list.iter().copied().collect()
}

#[test]
fn test_motion_sensor_occupies_then_clears() {
    let hx = Harness::new();
    hx.set(MOTION, "off");
    let mut tracker = hx.office(AreaConfig::default());
    tracker.initialize();
    let seen = record(&tracker);
    assert_eq!(tracker.area().states, states(&[AreaState::Clear, AreaState::Dark]));

    hx.report(&mut tracker, MOTION, "on");
    assert_eq!(tracker.area().states, states(&[AreaState::Occupied, AreaState::Dark]));
    {
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].new_states.contains(&AreaState::Occupied));
    }

    hx.report(&mut tracker, MOTION, "off");
    assert!(tracker.area().is_occupied());
    assert_eq!(seen.lock().unwrap().len(), 1);

    hx.clock.advance_seconds(61);
    hx.scheduler.run_due(&mut tracker);
    tracker.update_state();

    assert_eq!(tracker.area().states, states(&[AreaState::Clear, AreaState::Dark]));
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert!(seen[1].new_states.contains(&AreaState::Clear));
    assert!(seen[1].lost_states.contains(&AreaState::Occupied));
}

#[test]
fn test_meta_area_follows_children() {
    let hx = Harness::new();
    let kitchen = area_state_entity_id("kitchen");
    let office = area_state_entity_id("office");
    hx.set(&kitchen, "off");
    hx.set(&office, "off");

    let children = vec![
        ChildArea {
            id: "kitchen".to_string(),
            slug: "kitchen".to_string(),
        },
        ChildArea {
            id: "office".to_string(),
            slug: "office".to_string(),
        },
    ];
    let meta = Area::new_meta("interior", "Interior", AreaConfig::meta(), children, hx.clock.now());
    let mut tracker = hx.tracker(meta);
    tracker.initialize();
    assert_eq!(tracker.presence_sensors().to_vec(), vec![kitchen.clone(), office.clone()]);
    assert!(!tracker.area().is_occupied());

    hx.report(&mut tracker, &office, "on");
    assert!(tracker.area().is_occupied());

    hx.report(&mut tracker, &kitchen, "on");
    hx.report(&mut tracker, &office, "off");
    assert!(tracker.area().is_occupied());

    hx.clock.advance_seconds(30);
    hx.report(&mut tracker, &kitchen, "off");
    assert!(tracker.area().is_occupied());

    hx.clock.advance_seconds(61);
    hx.scheduler.run_due(&mut tracker);
    assert!(!tracker.area().is_occupied());
    assert!(tracker.area().has_state(AreaState::Clear));
}

#[test]
fn test_update_without_changes_is_silent() {
    let hx = Harness::new();
    hx.set(MOTION, "on");
    let mut tracker = hx.office(AreaConfig::default());
    tracker.initialize();
    let seen = record(&tracker);

    assert!(!tracker.update_state());
    assert!(!tracker.update_state());
    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn test_primary_and_light_states_stay_exclusive() {
    let hx = Harness::new();
    let config = AreaConfig {
        secondary_states: SecondaryStatesConfig {
            dark_entity: Some("sun.sun".to_string()),
            ..SecondaryStatesConfig::default()
        },
        ..AreaConfig::default()
    };
    hx.set(MOTION, "off");
    hx.set("sun.sun", "above_horizon");
    let mut tracker = hx.office(config);
    tracker.initialize();

    let steps = [
        (MOTION, "on"),
        ("sun.sun", "below_horizon"),
        (MOTION, "off"),
        (MOTION, "unavailable"),
        ("sun.sun", "above_horizon"),
        (MOTION, "on"),
        ("sun.sun", "unknown"),
        (MOTION, "off"),
    ];
    for (entity_id, value) in steps {
        hx.report(&mut tracker, entity_id, value);
        hx.clock.advance_seconds(40);
        hx.scheduler.run_due(&mut tracker);

        let current = &tracker.area().states;
        assert_ne!(
            current.contains(&AreaState::Occupied),
            current.contains(&AreaState::Clear),
            "{entity_id}={value}: {current:?}"
        );
        assert!(
            !(current.contains(&AreaState::Dark) && current.contains(&AreaState::Bright)),
            "{entity_id}={value}: {current:?}"
        );
    }
}

#[test]
fn test_debounce_boundary() {
    let hx = Harness::new();
    hx.set(MOTION, "on");
    let mut tracker = hx.office(AreaConfig::default());
    tracker.initialize();

    hx.report(&mut tracker, MOTION, "off");
    hx.clock.advance_seconds(59);
    tracker.update_state();
    assert!(tracker.area().is_occupied());

    hx.clock.advance_seconds(1);
    tracker.update_state();
    assert!(!tracker.area().is_occupied());
}

#[test]
fn test_restarted_timer_fires_once() {
    #[derive(Default)]
    struct Fired(u32);

    let clock = ManualClock::new();
    let scheduler = Arc::new(ManualScheduler::<Fired>::ignoring_cancel(Arc::new(clock.clone())));
    let mut timeout: TimeoutManager<Fired> = TimeoutManager::new("clear", scheduler.clone());
    let mut fired = Fired::default();

    timeout.start(Duration::from_secs(60), |f: &mut Fired| f.0 += 1);
    clock.advance_seconds(10);
    timeout.start(Duration::from_secs(60), |f: &mut Fired| f.0 += 1);

    clock.advance_seconds(120);
    assert_eq!(scheduler.run_due(&mut fired), 2);
    assert_eq!(fired.0, 1);
}

#[test]
fn test_primary_flip_reports_full_state() {
    let hx = Harness::new();
    hx.set(MOTION, "on");
    let mut tracker = hx.office(AreaConfig::default());
    let seen = record(&tracker);
    assert_eq!(tracker.area().states, states(&[AreaState::Clear]));

    assert!(tracker.update_state());
    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].new_states, states(&[AreaState::Occupied, AreaState::Dark]));
    assert_eq!(seen[0].lost_states, states(&[AreaState::Clear]));
    assert!(seen[0].is_primary_flip());
}

#[test]
fn test_extended_after_extended_time() {
    let hx = Harness::new();
    hx.set(MOTION, "off");
    let mut tracker = hx.office(AreaConfig::default());
    tracker.initialize();

    hx.report(&mut tracker, MOTION, "on");
    assert!(tracker.is_extended_timeout_pending());

    hx.clock.advance_minutes(5);
    hx.scheduler.run_due(&mut tracker);
    assert!(tracker.area().has_state(AreaState::Extended));
    assert_eq!(tracker.get_clear_timeout(), Duration::from_secs(600));

    hx.report(&mut tracker, MOTION, "off");
    hx.clock.advance_minutes(2);
    hx.scheduler.run_due(&mut tracker);
    assert!(tracker.area().is_occupied());

    hx.clock.advance_minutes(9);
    hx.scheduler.run_due(&mut tracker);
    assert_eq!(tracker.area().states, states(&[AreaState::Clear, AreaState::Dark]));
    assert!(!tracker.is_extended_timeout_pending());
}
