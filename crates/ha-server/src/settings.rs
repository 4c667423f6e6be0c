//! Server settings file

use std::collections::HashMap;
use std::path::Path;

use ha_magic_areas::MagicAreasConfig;
use ha_registries::{DeviceEntry, EntityEntry};
use indexmap::IndexMap;
use serde::Deserialize;

const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub logger: LoggerSettings,
    pub host: HostSeed,
    pub magic_areas: MagicAreasConfig,
}

impl Settings {
    pub fn load(path: impl AsRef<Path>) -> ha_config::ConfigResult<Self> {
        ha_config::load_typed(path)
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggerSettings {
    pub level: String,
}

impl Default for LoggerSettings {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

/// Registry and state contents the host starts with
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct HostSeed {
    pub areas: Vec<AreaSeed>,
    pub devices: Vec<DeviceEntry>,
    pub entities: Vec<EntityEntry>,
    pub states: IndexMap<String, StateSeed>,
}

#[derive(Debug, Deserialize)]
pub struct AreaSeed {
    /// Derived from the name when omitted
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StateSeed {
    Value(String),
    Full {
        state: String,
        #[serde(default)]
        attributes: HashMap<String, serde_json::Value>,
    },
}

impl StateSeed {
    pub fn into_parts(self) -> (String, HashMap<String, serde_json::Value>) {
        match self {
            StateSeed::Value(state) => (state, HashMap::new()),
            StateSeed::Full { state, attributes } => (state, attributes),
        }
    }
}
