//! Entity domain names the area engine reasons about

pub const BINARY_SENSOR: &str = "binary_sensor";
pub const SENSOR: &str = "sensor";
pub const SWITCH: &str = "switch";
pub const LIGHT: &str = "light";
pub const MEDIA_PLAYER: &str = "media_player";
pub const SUN: &str = "sun";
