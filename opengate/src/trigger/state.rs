use std::time::Duration;

use tokio::time::Instant;

use crate::geo::Coordinate;

/// In-memory trigger bookkeeping for one monitoring session.
///
/// Created fresh when a session starts and dropped when it ends. Only
/// `has_called_for_current_entry` has a durable counterpart (the store's
/// triggered flag); this field mirrors the last value read or written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriggerState {
    /// Most recent accepted fix.
    pub last_position: Option<Coordinate>,

    /// Containment as of `last_position`.
    pub was_in_radius: bool,

    pub has_called_for_current_entry: bool,

    /// Set once a real baseline position is known. No call is ever decided
    /// before this.
    pub initialized: bool,

    pub last_call_at: Option<Instant>,
}

impl TriggerState {
    /// True if no call was made yet, or the last one is strictly more than
    /// `min_interval` in the past.
    pub fn call_interval_elapsed(&self, now: Instant, min_interval: Duration) -> bool {
        self.last_call_at
            .is_none_or(|last| now.saturating_duration_since(last) > min_interval)
    }

    /// Record an accepted fix and its containment.
    pub(super) fn accept(&mut self, position: Coordinate, in_radius: bool) {
        self.last_position = Some(position);
        self.was_in_radius = in_radius;
    }
}
