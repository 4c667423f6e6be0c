//! Magic Areas
//!
//! Area presence and state tracking. Each configured area owns a set of
//! member entities resolved from the host registries, selects its presence
//! sensors among them and derives a state set:
//! - OCCUPIED or CLEAR, debounced by a clear timeout
//! - EXTENDED once occupied for `extended_time` minutes
//! - SLEEP, DARK/BRIGHT and ACCENTED from configured source entities
//!
//! Every change is published to the area's subscribers as a
//! `(new_states, lost_states)` delta and mirrored into an
//! `area_state` binary sensor. The meta areas `interior`, `exterior` and
//! `global` aggregate the area_state sensors of their children.

pub mod area;
pub mod config;
pub mod entity;
pub mod error;
pub mod fanout;
pub mod presence;
pub mod provider;
pub mod registry;
pub mod resolver;
pub mod runtime;
pub mod timeout;
pub mod tracker;

pub use area::{Area, AreaEntities, AreaState, AreaType, ChildArea, EntitySnapshot};
pub use config::{AreaConfig, FeaturesConfig, PresenceHoldConfig, SecondaryStatesConfig};
pub use entity::AreaStateEntity;
pub use error::{MagicAreasError, MagicAreasResult, SubscriberError};
pub use fanout::{AreaStateChange, AreaStateChannel, SubscriptionId, EVENT_AREA_STATE_CHANGED};
pub use presence::{area_state_entity_id, presence_hold_entity_id, select_presence_sensors};
pub use provider::EntitySnapshotProvider;
pub use registry::{MagicAreasConfig, MagicAreasRegistry, SetupSummary};
pub use resolver::{aggregate_children, list_member_entities};
pub use runtime::{AreaRuntime, AreaView, RuntimeClock};
pub use timeout::{ChannelScheduler, ManualScheduler, Scheduler, TimeoutManager, TimeoutStatus};
pub use tracker::{AreaMetadata, AreaStateTracker};
