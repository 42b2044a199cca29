use std::time::Duration;

#[derive(Debug, Clone)]
pub struct TriggerConfig {
    /// Fixes closer than this to the last accepted one are GPS jitter and
    /// are ignored entirely (m).
    pub min_distance_change_m: f64,

    /// Minimum spacing between two calls, regardless of the entry flag.
    /// Covers restarts that lose in-memory state while the persisted flag
    /// is still settling.
    pub min_call_interval: Duration,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            min_distance_change_m: 5.0,
            min_call_interval: Duration::from_secs(60),
        }
    }
}
