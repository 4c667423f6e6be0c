//! Per-area task
//!
//! Each area runs as one tokio task that owns its [`AreaStateTracker`]. The
//! task serializes every input through a single `select!` loop, so the
//! tracker never needs a lock: state changes of tracked entities, timer
//! expiries delivered by the [`ChannelScheduler`], the periodic poll and
//! entity registry updates.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ha_core::events::EntityRegistryUpdatedData;
use ha_core::Clock;
use ha_event_bus::{RecvError, StateChangeListener, TypedEventReceiver};
use ha_registries::Registries;
use ha_state_store::StateStore;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::area::{Area, AreaState};
use crate::entity::AreaStateEntity;
use crate::error::{MagicAreasError, MagicAreasResult};
use crate::fanout::AreaStateChannel;
use crate::resolver::list_member_entities;
use crate::timeout::{ChannelScheduler, TimerCallback};
use crate::tracker::{AreaMetadata, AreaStateTracker};

/// Wall clock that advances with tokio time, so timer expiries and
/// timestamps agree even when tokio time is paused
#[derive(Debug, Clone)]
pub struct RuntimeClock {
    origin: Instant,
    origin_time: DateTime<Utc>,
}

impl RuntimeClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            origin_time: Utc::now(),
        }
    }
}

impl Default for RuntimeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for RuntimeClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.origin.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.origin_time + elapsed
    }
}

/// Read-only view of an area, refreshed after every change
#[derive(Debug, Clone, PartialEq)]
pub struct AreaView {
    pub area_id: String,
    pub states: BTreeSet<AreaState>,
    pub last_changed: DateTime<Utc>,
    pub metadata: AreaMetadata,
}

impl AreaView {
    fn of(tracker: &AreaStateTracker) -> Self {
        let area = tracker.area();
        Self {
            area_id: area.id.clone(),
            states: area.states.clone(),
            last_changed: area.last_changed,
            metadata: tracker.get_metadata(),
        }
    }

    pub fn is_occupied(&self) -> bool {
        self.states.contains(&AreaState::Occupied)
    }

    pub fn has_state(&self, state: AreaState) -> bool {
        self.states.contains(&state)
    }
}

/// Handle to a running area task
pub struct AreaRuntime {
    area_id: String,
    channel: Arc<AreaStateChannel>,
    view: watch::Receiver<AreaView>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl AreaRuntime {
    /// Initialize the area's tracker and start its task
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        area: Area,
        registries: Arc<Registries>,
        store: Arc<StateStore>,
    ) -> MagicAreasResult<Self> {
        let bus = Arc::clone(store.event_bus());
        let (scheduler, timer_rx) = ChannelScheduler::new();
        let mut tracker = AreaStateTracker::new(
            area,
            store.clone(),
            Arc::clone(bus.clock()),
            Arc::new(scheduler),
        );
        let area_id = tracker.area().id.clone();
        let entity = AreaStateEntity::new(&tracker, store.clone())?;

        let channel = tracker.channel();
        let forward = Arc::clone(&bus);
        channel.subscribe(move |change| {
            forward.fire_typed(change.clone());
            Ok(())
        });

        // listen before the first evaluation so no report is missed
        let listener = bus.listen_state_changes(tracker.tracked_entity_ids());
        let registry_rx = bus.subscribe_typed::<EntityRegistryUpdatedData>();

        if !tracker.initialize() {
            return Err(MagicAreasError::AlreadyInitialized(area_id));
        }
        entity.write(&tracker);

        let (view_tx, view) = watch::channel(AreaView::of(&tracker));
        let (shutdown, shutdown_rx) = oneshot::channel();

        let task = AreaTask {
            tracker,
            entity,
            registries,
            store,
            listener,
            registry_rx,
            timer_rx,
            view_tx,
            shutdown_rx,
        };
        let task = tokio::spawn(task.run());

        Ok(Self {
            area_id,
            channel,
            view,
            shutdown: Some(shutdown),
            task: Some(task),
        })
    }

    pub fn area_id(&self) -> &str {
        &self.area_id
    }

    pub fn channel(&self) -> Arc<AreaStateChannel> {
        Arc::clone(&self.channel)
    }

    /// Latest view of the area
    pub fn view(&self) -> AreaView {
        self.view.borrow().clone()
    }

    /// Receiver notified after every change
    pub fn watch(&self) -> watch::Receiver<AreaView> {
        self.view.clone()
    }

    /// Stop the task and wait for its teardown
    pub async fn shutdown(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(area_id = %self.area_id, %err, "Area task ended abnormally");
            }
        }
    }
}

impl Drop for AreaRuntime {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct AreaTask {
    tracker: AreaStateTracker,
    entity: AreaStateEntity,
    registries: Arc<Registries>,
    store: Arc<StateStore>,
    listener: StateChangeListener,
    registry_rx: TypedEventReceiver<EntityRegistryUpdatedData>,
    timer_rx: mpsc::UnboundedReceiver<TimerCallback<AreaStateTracker>>,
    view_tx: watch::Sender<AreaView>,
    shutdown_rx: oneshot::Receiver<()>,
}

impl AreaTask {
    async fn run(mut self) {
        let area_id = self.tracker.area().id.clone();
        let mut poll = tokio::time::interval(self.tracker.area().config.update_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        poll.tick().await;

        let mut revision = self.tracker.revision();
        let mut listening = true;
        let mut registry_open = true;

        loop {
            // reports that leave the state set alone still move active_sensors
            let mut refresh = false;
            tokio::select! {
                _ = &mut self.shutdown_rx => break,
                result = self.listener.recv(), if listening => match result {
                    Ok(change) => {
                        refresh = self.tracker.handle_state_change(&change);
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(area_id = %area_id, missed, "State listener lagged, re-evaluating");
                        self.tracker.update_state();
                    }
                    Err(RecvError::Closed) => listening = false,
                },
                Some(callback) = self.timer_rx.recv() => callback(&mut self.tracker),
                _ = poll.tick() => {
                    self.tracker.update_state();
                }
                result = self.registry_rx.recv(), if registry_open => match result {
                    Ok(event) => {
                        if self.concerns_area(&event.data) {
                            self.reload();
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(area_id = %area_id, missed, "Registry listener lagged, reloading");
                        self.reload();
                    }
                    Err(RecvError::Closed) => registry_open = false,
                },
            }

            if refresh || self.tracker.revision() != revision {
                revision = self.tracker.revision();
                self.entity.write(&self.tracker);
                self.view_tx.send_replace(AreaView::of(&self.tracker));
            }
        }

        self.tracker.teardown();
        self.entity.remove();
        debug!(area_id = %area_id, "Area task stopped");
    }

    /// Whether a registry change may alter this area's members
    fn concerns_area(&self, data: &EntityRegistryUpdatedData) -> bool {
        let area = self.tracker.area();
        if area.is_meta() {
            return false;
        }
        data.concerns_area(&area.id)
            || area.has_entity(&data.entity_id)
            || area.config.include_entities.contains(&data.entity_id)
            || self
                .registries
                .entities
                .get(&data.entity_id)
                .and_then(|entry| self.registries.entity_area_id(&entry))
                .as_deref()
                == Some(area.id.as_str())
    }

    fn reload(&mut self) {
        let entities = {
            let area = self.tracker.area();
            list_member_entities(&self.registries, self.store.as_ref(), &area.id, &area.config)
        };
        info!(area_id = %self.tracker.area().id, "Reloading area entities");
        self.tracker.reload(entities);
        self.listener.set_entity_ids(self.tracker.tracked_entity_ids());
    }
}
