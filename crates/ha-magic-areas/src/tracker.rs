//! Area state tracker
//!
//! The tracker owns one [`Area`] and re-derives its state set whenever an
//! input arrives: a sensor report, a timer expiry or the periodic poll. Each
//! derivation that differs from the stored set is published on the area's
//! [`AreaStateChannel`] as a `(new_states, lost_states)` delta.
//!
//! Occupancy is debounced: once every presence sensor is inactive the area
//! stays OCCUPIED until the clear timeout has elapsed since the last "off"
//! report. The timeout in effect depends on the current state
//! (SLEEP, then EXTENDED, then the base clear timeout).

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ha_core::events::StateChangedData;
use ha_core::SharedClock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, trace, warn};

use crate::area::{Area, AreaEntities, AreaState};
use crate::config::{minutes, PRESENCE_ON_STATES, SECONDARY_ON_STATES};
use crate::fanout::{AreaStateChange, AreaStateChannel};
use crate::presence::select_presence_sensors;
use crate::provider::EntitySnapshotProvider;
use crate::timeout::{Scheduler, TimeoutManager};

/// Snapshot of the tracker for display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaMetadata {
    pub presence_sensors: Vec<String>,
    pub active_sensors: Vec<String>,
    pub last_active_sensors: Vec<String>,
    pub states: BTreeSet<AreaState>,
    /// Minutes currently in effect
    pub clear_timeout: u32,
}

pub struct AreaStateTracker {
    area: Area,
    presence_sensors: Vec<String>,
    provider: Arc<dyn EntitySnapshotProvider>,
    clock: SharedClock,
    channel: Arc<AreaStateChannel>,
    clear_timeout: TimeoutManager<AreaStateTracker>,
    extended_timeout: TimeoutManager<AreaStateTracker>,
    /// When presence sensors last reported inactive
    last_off_time: Option<DateTime<Utc>>,
    last_active_sensors: Vec<String>,
    /// Bumped on every published change
    revision: u64,
    last_change: Option<AreaStateChange>,
    initialized: bool,
}

impl AreaStateTracker {
    pub fn new(
        area: Area,
        provider: Arc<dyn EntitySnapshotProvider>,
        clock: SharedClock,
        scheduler: Arc<dyn Scheduler<AreaStateTracker>>,
    ) -> Self {
        let presence_sensors = select_presence_sensors(&area);
        let channel = Arc::new(AreaStateChannel::new(area.id.clone()));
        Self {
            clear_timeout: TimeoutManager::new("clear", Arc::clone(&scheduler)),
            extended_timeout: TimeoutManager::new("extended", scheduler),
            area,
            presence_sensors,
            provider,
            clock,
            channel,
            last_off_time: None,
            last_active_sensors: Vec::new(),
            revision: 0,
            last_change: None,
            initialized: false,
        }
    }

    /// Run the first evaluation; false if already initialized
    pub fn initialize(&mut self) -> bool {
        if self.initialized {
            warn!(area_id = %self.area.id, "Area tracker already initialized, ignoring");
            return false;
        }
        self.initialized = true;
        info!(
            area_id = %self.area.id,
            presence_sensors = ?self.presence_sensors,
            "Tracking area presence"
        );
        self.update_state();
        true
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Cancel timers and drop every subscriber
    pub fn teardown(&mut self) {
        self.clear_timeout.cancel();
        self.extended_timeout.cancel();
        self.channel.close();
        self.initialized = false;
        debug!(area_id = %self.area.id, "Area tracker torn down");
    }

    pub fn area(&self) -> &Area {
        &self.area
    }

    pub fn presence_sensors(&self) -> &[String] {
        &self.presence_sensors
    }

    /// Channel subscribers attach to
    pub fn channel(&self) -> Arc<AreaStateChannel> {
        Arc::clone(&self.channel)
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn last_change(&self) -> Option<&AreaStateChange> {
        self.last_change.as_ref()
    }

    pub fn last_off_time(&self) -> Option<DateTime<Utc>> {
        self.last_off_time
    }

    pub fn is_clear_timeout_pending(&self) -> bool {
        self.clear_timeout.is_active()
    }

    pub fn is_extended_timeout_pending(&self) -> bool {
        self.extended_timeout.is_active()
    }

    /// Presence sensors plus secondary-state sources
    pub fn tracked_entity_ids(&self) -> Vec<String> {
        let mut ids = self.presence_sensors.clone();
        for (_, entity_id) in self.area.config.secondary_sources() {
            if !ids.iter().any(|id| id == entity_id) {
                ids.push(entity_id.to_string());
            }
        }
        ids
    }

    /// Replace the member entities and re-select presence sensors
    pub fn reload(&mut self, entities: AreaEntities) {
        self.area.entities = entities;
        self.presence_sensors = select_presence_sensors(&self.area);
        debug!(
            area_id = %self.area.id,
            presence_sensors = ?self.presence_sensors,
            "Reloaded area entities"
        );
        self.update_state();
    }

    /// React to a state change of a tracked entity
    ///
    /// Returns whether a re-evaluation ran.
    #[instrument(skip(self, change), fields(area_id = %self.area.id, entity_id = %change.entity_id))]
    pub fn handle_state_change(&mut self, change: &StateChangedData) -> bool {
        let Some(new_state) = change.new_state.as_ref() else {
            trace!("No new state");
            return false;
        };

        // meta areas see richer attribute payloads behind the same raw value
        if !self.area.is_meta() && change.old_value() == Some(new_state.state.as_str()) {
            trace!("Repeated state");
            return false;
        }

        if new_state.is_invalid() {
            debug!(state = %new_state.state, "Ignoring invalid state");
            return false;
        }

        if !new_state.is_one_of(PRESENCE_ON_STATES) {
            self.last_off_time = Some(self.clock.now());
            self.clear_timeout.cancel();
        }

        self.update_state();
        true
    }

    /// Re-derive the state set and publish the delta if it changed
    pub fn update_state(&mut self) -> bool {
        let current = self.get_area_states();
        if current == self.area.states {
            return false;
        }

        let mut new_states: BTreeSet<AreaState> =
            current.difference(&self.area.states).copied().collect();
        let lost_states: BTreeSet<AreaState> =
            self.area.states.difference(&current).copied().collect();

        let primary_flip = new_states.iter().any(|s| s.is_primary());
        if primary_flip {
            new_states = current.clone();
        }
        self.area.states = current;

        if primary_flip {
            if self.area.is_occupied() {
                let extended_time = self.area.config.extended_time;
                self.extended_timeout
                    .start(minutes(extended_time), |tracker: &mut AreaStateTracker| {
                        tracker.update_state();
                    });
            } else {
                self.extended_timeout.cancel();
            }
        }

        let change = AreaStateChange {
            area_id: self.area.id.clone(),
            new_states,
            lost_states,
        };
        info!(
            area_id = %self.area.id,
            states = ?self.area.states,
            new = ?change.new_states,
            lost = ?change.lost_states,
            "Area state changed"
        );

        self.revision += 1;
        self.channel.publish(&change);
        self.last_change = Some(change);
        true
    }

    /// Full candidate state set for this instant
    ///
    /// Records the flip time when occupancy changes and may start the clear
    /// timeout.
    pub fn get_area_states(&mut self) -> BTreeSet<AreaState> {
        let mut states = BTreeSet::new();

        let occupied = self.get_occupancy_state();
        states.insert(if occupied {
            AreaState::Occupied
        } else {
            AreaState::Clear
        });

        let now = self.clock.now();
        if occupied != self.area.is_occupied() {
            self.area.last_changed = now;
        }

        let since_change = now - self.area.last_changed;
        let extended_after = chrono::Duration::minutes(i64::from(self.area.config.extended_time));
        if occupied && since_change >= extended_after {
            states.insert(AreaState::Extended);
        }

        states.extend(self.get_secondary_states());
        states
    }

    /// Secondary states from the configured source entities
    pub fn get_secondary_states(&self) -> Vec<AreaState> {
        let config = &self.area.config;
        let mut states = Vec::new();

        if !config.is_dark_configured() {
            states.push(AreaState::Dark);
        }

        for (state, entity_id) in config.secondary_sources() {
            let Some(source) = self.provider.get_entity_state(entity_id) else {
                info!(area_id = %self.area.id, entity_id, "Secondary state source has no state");
                continue;
            };
            if source.is_invalid() {
                debug!(area_id = %self.area.id, entity_id, state = %source.state, "Secondary state source invalid");
                continue;
            }

            let on = source.is_one_of(SECONDARY_ON_STATES);
            let present = match state {
                AreaState::Dark => !on,
                _ => on,
            };
            if present {
                states.push(state);
            }
        }

        if config.is_dark_configured() && !states.contains(&AreaState::Dark) {
            states.push(AreaState::Bright);
        }

        states
    }

    /// Debounced occupancy
    pub fn get_occupancy_state(&mut self) -> bool {
        let active = self.active_sensors();
        if !active.is_empty() {
            self.last_active_sensors = active;
            self.clear_timeout.cancel();
            return true;
        }

        if !self.area.is_occupied() {
            return false;
        }

        let now = self.clock.now();
        let timeout = self.get_clear_timeout();

        if self.clear_timeout.is_active() {
            let last_off = self.last_off_time.unwrap_or(now);
            let window = chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::zero());
            if now - last_off >= window {
                debug!(area_id = %self.area.id, "Clear timeout elapsed");
                self.clear_timeout.cancel();
                return false;
            }
            return true;
        }

        if self.last_off_time.is_none() {
            self.last_off_time = Some(now);
        }
        debug!(area_id = %self.area.id, timeout_secs = timeout.as_secs(), "Starting clear timeout");
        self.clear_timeout
            .start(timeout, |tracker: &mut AreaStateTracker| {
                tracker.update_state();
            });
        true
    }

    /// Clear timeout in effect for the current state
    pub fn get_clear_timeout(&self) -> Duration {
        minutes(self.clear_timeout_minutes())
    }

    fn clear_timeout_minutes(&self) -> u32 {
        let config = &self.area.config;
        if self.area.has_state(AreaState::Sleep) {
            config.sleep_timeout
        } else if self.area.has_state(AreaState::Extended) {
            config.extended_timeout
        } else {
            config.clear_timeout
        }
    }

    /// Presence sensors currently reporting an "on" state
    pub fn active_sensors(&self) -> Vec<String> {
        self.presence_sensors
            .iter()
            .filter(|entity_id| match self.provider.get_entity_state(entity_id) {
                Some(state) => !state.is_invalid() && state.is_one_of(PRESENCE_ON_STATES),
                None => {
                    info!(area_id = %self.area.id, entity_id = %entity_id, "Presence sensor has no state, skipping");
                    false
                }
            })
            .cloned()
            .collect()
    }

    pub fn get_metadata(&self) -> AreaMetadata {
        AreaMetadata {
            presence_sensors: self.presence_sensors.clone(),
            active_sensors: self.active_sensors(),
            last_active_sensors: self.last_active_sensors.clone(),
            states: self.area.states.clone(),
            clear_timeout: self.clear_timeout_minutes(),
        }
    }
}
