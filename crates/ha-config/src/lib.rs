//! YAML configuration loading
//!
//! Loads the area engine's configuration file with three custom tags:
//!
//! - `!include path` - Inline another YAML file, relative to the including file
//! - `!secret key` - Substitute a value from `secrets.yaml` next to the config
//! - `!env_var VAR` - Substitute an environment variable
//!
//! ```ignore
//! let settings: Settings = ha_config::load_typed("magic_areas.yaml")?;
//! ```

mod error;
mod loader;
mod secrets;

pub use error::{ConfigError, ConfigResult};
pub use loader::{load_typed, load_yaml, YamlLoader};
pub use secrets::Secrets;

pub use serde_yaml::Value;
