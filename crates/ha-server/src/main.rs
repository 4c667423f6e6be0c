//! Magic Areas server
//!
//! Loads the settings file, seeds the host registries and state store, then
//! runs every configured area until Ctrl-C.

mod settings;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use ha_event_bus::EventBus;
use ha_magic_areas::{MagicAreasConfig, MagicAreasRegistry, RuntimeClock};
use ha_registries::Registries;
use ha_state_store::StateStore;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::settings::{HostSeed, Settings};

const DEFAULT_CONFIG_FILE: &str = "magic_areas.yaml";
const CONFIG_ENV_VAR: &str = "MAGIC_AREAS_CONFIG";

/// The host the area engine runs against
pub struct MagicAreasHost {
    /// Event bus for pub/sub communication
    pub bus: Arc<EventBus>,
    /// Current entity states
    pub states: Arc<StateStore>,
    /// Area, device and entity registries
    pub registries: Arc<Registries>,
}

impl MagicAreasHost {
    pub fn new() -> Self {
        let bus = Arc::new(EventBus::with_clock(Arc::new(RuntimeClock::new())));
        let states = Arc::new(StateStore::new(bus.clone()));
        let registries = Arc::new(Registries::with_event_bus(bus.clone()));

        Self {
            bus,
            states,
            registries,
        }
    }

    /// Load registry entries and initial states
    pub fn seed(&self, seed: HostSeed) -> Result<()> {
        for area in seed.areas {
            match area.id {
                Some(id) => self.registries.areas.create_with_id(&id, &area.name),
                None => self.registries.areas.create(&area.name),
            };
        }
        for device in seed.devices {
            self.registries.devices.insert(device);
        }
        for entity in seed.entities {
            self.registries.entities.register(entity);
        }
        for (entity_id, state) in seed.states {
            let (value, attributes) = state.into_parts();
            self.states
                .set_str(&entity_id, value, attributes)
                .with_context(|| format!("invalid entity id in host states: {entity_id}"))?;
        }
        Ok(())
    }

    pub fn magic_areas(&self, config: MagicAreasConfig) -> MagicAreasRegistry {
        MagicAreasRegistry::new(self.registries.clone(), self.states.clone(), config)
    }
}

impl Default for MagicAreasHost {
    fn default() -> Self {
        Self::new()
    }
}

fn config_path() -> PathBuf {
    std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

fn init_logging(default_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .context("invalid log filter")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err))
}

#[tokio::main]
async fn main() -> Result<()> {
    let path = config_path();
    let settings = Settings::load(&path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    init_logging(&settings.logger.level)?;

    info!(config = %path.display(), "Starting Magic Areas");

    let host = MagicAreasHost::new();
    host.seed(settings.host)?;

    let magic_areas = host.magic_areas(settings.magic_areas);
    let summary = magic_areas.setup().await?;
    if !summary.failed.is_empty() {
        warn!(failed = ?summary.failed, "Some areas failed to start");
    }
    info!(areas = ?summary.started, "Magic Areas is running");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    magic_areas.unload().await;

    Ok(())
}
