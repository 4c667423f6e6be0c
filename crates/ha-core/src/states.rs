//! Well-known raw state strings

pub const STATE_ON: &str = "on";
pub const STATE_OFF: &str = "off";
pub const STATE_HOME: &str = "home";
pub const STATE_NOT_HOME: &str = "not_home";
pub const STATE_OPEN: &str = "open";
pub const STATE_CLOSED: &str = "closed";
pub const STATE_PLAYING: &str = "playing";
pub const STATE_IDLE: &str = "idle";
pub const STATE_UNKNOWN: &str = "unknown";
pub const STATE_UNAVAILABLE: &str = "unavailable";

/// `sun.sun` states
pub const STATE_ABOVE_HORIZON: &str = "above_horizon";
pub const STATE_BELOW_HORIZON: &str = "below_horizon";

/// States that carry no information and are excluded from all computation
pub const INVALID_STATES: &[&str] = &[STATE_UNKNOWN, STATE_UNAVAILABLE];

/// Check whether a raw state is `unknown` or `unavailable`
pub fn is_invalid_state(state: &str) -> bool {
    INVALID_STATES.iter().any(|s| s.eq_ignore_ascii_case(state))
}
