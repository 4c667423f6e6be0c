//! Per-area change notification
//!
//! Each area owns one [`AreaStateChannel`]. Publishing is synchronous:
//! subscribers run in subscription order on the publishing task, and a
//! failing subscriber is logged and skipped.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use ha_core::EventData;
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::area::AreaState;
use crate::error::{MagicAreasError, SubscriberError};

/// Host event type carrying every published change
pub const EVENT_AREA_STATE_CHANGED: &str = "magic_areas_area_state_changed";

/// One published transition of an area
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AreaStateChange {
    pub area_id: String,
    pub new_states: BTreeSet<AreaState>,
    pub lost_states: BTreeSet<AreaState>,
}

impl AreaStateChange {
    /// Whether the OCCUPIED/CLEAR flag flipped
    pub fn is_primary_flip(&self) -> bool {
        self.new_states.iter().any(|s| s.is_primary())
    }
}

impl EventData for AreaStateChange {
    fn event_type() -> &'static str {
        EVENT_AREA_STATE_CHANGED
    }
}

type Handler = Arc<dyn Fn(&AreaStateChange) -> Result<(), SubscriberError> + Send + Sync>;

/// Token returned by [`AreaStateChannel::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Typed publish/subscribe channel scoped to one area
pub struct AreaStateChannel {
    area_id: String,
    subscribers: Mutex<Vec<(SubscriptionId, Handler)>>,
    next_id: AtomicU64,
}

impl AreaStateChannel {
    pub fn new(area_id: impl Into<String>) -> Self {
        Self {
            area_id: area_id.into(),
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn area_id(&self) -> &str {
        &self.area_id
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&AreaStateChange) -> Result<(), SubscriberError> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push((id, Arc::new(handler)));
        }
        trace!(area_id = %self.area_id, subscription = id.0, "Subscribed");
        id
    }

    /// Returns false if the subscription was already gone
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers
            .lock()
            .map(|mut subscribers| {
                let before = subscribers.len();
                subscribers.retain(|(sid, _)| *sid != id);
                subscribers.len() != before
            })
            .unwrap_or(false)
    }

    /// Drop every subscriber
    pub fn close(&self) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.clear();
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Deliver to every subscriber; returns how many handled it cleanly
    pub fn publish(&self, change: &AreaStateChange) -> usize {
        // handlers may (un)subscribe while being called
        let handlers: Vec<(SubscriptionId, Handler)> = self
            .subscribers
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default();

        let mut delivered = 0;
        for (id, handler) in handlers {
            match handler(change) {
                Ok(()) => delivered += 1,
                Err(source) => {
                    let err = MagicAreasError::Subscriber {
                        area_id: self.area_id.clone(),
                        subscription: id.0,
                        source,
                    };
                    warn!(error = %err, "Area state subscriber failed");
                }
            }
        }
        delivered
    }
}
