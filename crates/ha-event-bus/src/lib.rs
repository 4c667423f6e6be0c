//! Host event bus
//!
//! Broadcast pub/sub keyed by event type. Besides raw and typed
//! subscriptions it offers [`StateChangeListener`], the "tell me when any of
//! these entities change" primitive the area engine registers for its sensors.
//! Dropping a receiver is the deregistration.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use ha_core::events::StateChangedData;
use ha_core::{Event, EventData, EventType, SharedClock, SystemClock};
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

pub use tokio::sync::broadcast::error::RecvError;

/// Default channel capacity for event subscriptions
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// The host event bus
pub struct EventBus {
    /// Per event type broadcast senders
    listeners: DashMap<EventType, broadcast::Sender<Event>>,
    /// Sender for wildcard subscribers
    match_all_sender: broadcast::Sender<Event>,
    capacity: usize,
    clock: SharedClock,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a bus that stamps events with the given clock
    pub fn with_clock(clock: SharedClock) -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY, clock)
    }

    pub fn with_capacity(capacity: usize, clock: SharedClock) -> Self {
        let (match_all_sender, _) = broadcast::channel(capacity);
        Self {
            listeners: DashMap::new(),
            match_all_sender,
            capacity,
            clock,
        }
    }

    /// The clock used to stamp fired events
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Subscribe to one event type (or every event for the wildcard type)
    pub fn subscribe(&self, event_type: impl Into<EventType>) -> broadcast::Receiver<Event> {
        let event_type = event_type.into();
        trace!(event_type = %event_type, "Subscribing to event type");

        if event_type.is_match_all() {
            return self.match_all_sender.subscribe();
        }

        self.listeners
            .entry(event_type)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Subscribe to every event
    pub fn subscribe_all(&self) -> broadcast::Receiver<Event> {
        self.match_all_sender.subscribe()
    }

    /// Subscribe to a typed event, decoding payloads on receipt
    pub fn subscribe_typed<T: EventData + serde::de::DeserializeOwned>(
        &self,
    ) -> TypedEventReceiver<T> {
        TypedEventReceiver::new(self.subscribe(T::event_type()))
    }

    /// Listen for state changes of the given entities only
    pub fn listen_state_changes<I, S>(&self, entity_ids: I) -> StateChangeListener
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        StateChangeListener {
            rx: self.subscribe_typed(),
            entity_ids: entity_ids.into_iter().map(Into::into).collect(),
        }
    }

    /// Deliver an event to its type's subscribers and to wildcard subscribers
    pub fn fire(&self, event: Event) {
        debug!(event_type = %event.event_type, "Firing event");

        if let Some(sender) = self.listeners.get(&event.event_type) {
            // no receivers is not an error
            let _ = sender.send(event.clone());
        }
        let _ = self.match_all_sender.send(event);
    }

    /// Fire a typed payload stamped with the bus clock
    pub fn fire_typed<T: EventData + serde::Serialize>(&self, data: T) {
        match serde_json::to_value(&data) {
            Ok(value) => self.fire(Event::new(T::event_type(), value, self.clock.now())),
            Err(err) => warn!(event_type = T::event_type(), %err, "Dropping unserializable event"),
        }
    }

    /// Number of event types with a live channel
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A receiver that decodes event payloads into `T`
pub struct TypedEventReceiver<T> {
    rx: broadcast::Receiver<Event>,
    _phantom: std::marker::PhantomData<T>,
}

impl<T: EventData + serde::de::DeserializeOwned> TypedEventReceiver<T> {
    fn new(rx: broadcast::Receiver<Event>) -> Self {
        Self {
            rx,
            _phantom: std::marker::PhantomData,
        }
    }

    /// Wait for the next event whose payload decodes as `T`
    pub async fn recv(&mut self) -> Result<Event<T>, RecvError> {
        loop {
            let event = self.rx.recv().await?;
            match serde_json::from_value::<T>(event.data.clone()) {
                Ok(data) => return Ok(event.map(|_| data)),
                Err(err) => trace!(%err, "Skipping undecodable event payload"),
            }
        }
    }
}

/// State-change subscription restricted to a set of entity ids
pub struct StateChangeListener {
    rx: TypedEventReceiver<StateChangedData>,
    entity_ids: HashSet<String>,
}

impl StateChangeListener {
    /// Wait for the next change of a tracked entity
    pub async fn recv(&mut self) -> Result<StateChangedData, RecvError> {
        loop {
            let event = self.rx.recv().await?;
            if self.entity_ids.contains(&event.data.entity_id.to_string()) {
                return Ok(event.data);
            }
        }
    }

    /// Replace the tracked entity set
    pub fn set_entity_ids<I, S>(&mut self, entity_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entity_ids = entity_ids.into_iter().map(Into::into).collect();
    }

    pub fn is_tracking(&self, entity_id: &str) -> bool {
        self.entity_ids.contains(entity_id)
    }
}

/// Thread-safe wrapper for EventBus
pub type SharedEventBus = Arc<EventBus>;
