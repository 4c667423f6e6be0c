//! Error types for the area engine

use thiserror::Error;

/// Boxed error returned by fan-out subscribers
pub type SubscriberError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised while setting up or driving areas
#[derive(Debug, Error)]
pub enum MagicAreasError {
    /// The area is not known to the host area registry
    #[error("area not found: {0}")]
    AreaNotFound(String),

    /// Setup ran twice for the same area or integration
    #[error("already initialized: {0}")]
    AlreadyInitialized(String),

    #[error("invalid configuration for area '{area_id}': {reason}")]
    InvalidConfig { area_id: String, reason: String },

    #[error("invalid entity id '{entity_id}': {source}")]
    InvalidEntityId {
        entity_id: String,
        #[source]
        source: ha_core::EntityIdError,
    },

    /// A fan-out subscriber failed while handling a change
    #[error("subscriber {subscription} of area '{area_id}' failed: {source}")]
    Subscriber {
        area_id: String,
        subscription: u64,
        #[source]
        source: SubscriberError,
    },
}

/// Result type for area engine operations
pub type MagicAreasResult<T> = Result<T, MagicAreasError>;
