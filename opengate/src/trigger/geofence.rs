//! Gate entry detection.
//!
//! Turns a stream of position fixes into call decisions. A call is made on
//! the transition from outside to inside the configured radius, at most once
//! per dwell, and never more often than the configured call interval.
//!
//! # State Machine
//!
//! ```text
//!                   first fix (baseline only)
//!  Uninitialized ──────────────────────────────► Outside | Inside
//!
//!             entry, flag clear, interval elapsed
//!  Outside ──────────────────────────────────────► Inside  => Call, flag set
//!  Outside ──────────── any other entry ─────────► Inside  => no call
//!  Inside  ──────────────── exit ────────────────► Outside => flag cleared
//! ```
//!
//! Fixes within `min_distance_change_m` of the last accepted fix are
//! dropped before any of this runs.
//!
//! The triggered flag lives in the [`SettingsStore`] so it survives
//! restarts. Every store access happens before in-memory state is touched:
//! if the store fails, the fix is dropped as if it never arrived and the
//! next one is evaluated against the same baseline.

use std::sync::Arc;

use tokio::time::Instant;

use super::config::TriggerConfig;
use super::state::TriggerState;
use crate::error::Result;
use crate::geo::Coordinate;
use crate::settings::{GateConfig, SettingsStore};
use crate::tracing::prelude::*;

/// What the caller should do after a fix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    None,

    /// Call this number. Already recorded as done for this entry.
    Call(String),
}

pub struct GeofenceTrigger {
    config: TriggerConfig,
    store: Arc<dyn SettingsStore>,
    state: TriggerState,

    /// Gate settings `state.was_in_radius` was computed against.
    seen_gate: Option<GateConfig>,
}

impl GeofenceTrigger {
    pub fn new(store: Arc<dyn SettingsStore>, config: TriggerConfig) -> Self {
        Self {
            config,
            store,
            state: TriggerState::default(),
            seen_gate: None,
        }
    }

    pub fn state(&self) -> &TriggerState {
        &self.state
    }

    /// Establish the baseline from a best-effort current position.
    ///
    /// Never decides a call, but a position outside the radius clears the
    /// persisted triggered flag. With no position, the first fix passed to
    /// [`on_sample`](Self::on_sample) becomes the baseline instead.
    pub async fn initialize(&mut self, initial: Option<Coordinate>) {
        let Some(position) = initial else {
            info!("No initial position, first fix will set the baseline");
            return;
        };

        match self.store.gate_config().await {
            Ok(gate) => self.seed(position, &gate).await,
            Err(e) => warn!(
                error = %e,
                "Could not read gate settings, first fix will set the baseline"
            ),
        }
    }

    /// Evaluate one fix. Store faults are logged and yield [`Action::None`].
    pub async fn on_sample(&mut self, sample: Coordinate, now: Instant) -> Action {
        match self.evaluate(sample, now).await {
            Ok(action) => action,
            Err(e) => {
                warn!(error = %e, %sample, "Settings store fault, fix dropped");
                Action::None
            }
        }
    }

    /// Recompute containment of the last accepted fix after the home point
    /// or radius changed. Never decides a call.
    ///
    /// Changes that arrive only through the store (edits by another
    /// process) are caught up the same way on the next fix.
    pub fn on_config_changed(&mut self, gate: &GateConfig) {
        if self.state.last_position.is_none() {
            return;
        }
        self.state.was_in_radius = self.baseline_for(gate);
        self.seen_gate = Some(gate.clone());
    }

    /// Containment of the last accepted fix under `gate`. Differs from
    /// `state.was_in_radius` only when the home point or radius moved.
    fn baseline_for(&self, gate: &GateConfig) -> bool {
        let area_moved = self
            .seen_gate
            .as_ref()
            .is_none_or(|seen| seen.home != gate.home || seen.radius_m != gate.radius_m);

        match self.state.last_position {
            Some(last) if area_moved => {
                let in_radius = gate.contains(&last);
                if in_radius != self.state.was_in_radius {
                    info!(in_radius, "Gate area changed, containment re-baselined");
                }
                in_radius
            }
            _ => self.state.was_in_radius,
        }
    }

    /// Record an accepted fix together with the settings it was judged by.
    fn commit(&mut self, position: Coordinate, in_radius: bool, gate: &GateConfig) {
        self.state.accept(position, in_radius);
        self.seen_gate = Some(gate.clone());
    }

    async fn seed(&mut self, position: Coordinate, gate: &GateConfig) {
        let in_radius = gate.contains(&position);

        // Starting outside proves any earlier entry is over.
        if in_radius {
            match self.store.has_triggered().await {
                Ok(flag) => self.state.has_called_for_current_entry = flag,
                Err(e) => warn!(error = %e, "Could not read triggered flag"),
            }
        } else {
            match self.store.set_has_triggered(false).await {
                Ok(()) => self.state.has_called_for_current_entry = false,
                Err(e) => warn!(error = %e, "Could not clear triggered flag"),
            }
        }

        self.commit(position, in_radius, gate);
        self.state.initialized = true;

        info!(
            %position,
            in_radius,
            distance_m = ?gate.distance_to_home(&position),
            "Baseline established"
        );
    }

    async fn evaluate(&mut self, sample: Coordinate, now: Instant) -> Result<Action> {
        let gate = self.store.gate_config().await?;

        if !self.state.initialized {
            self.seed(sample, &gate).await;
            return Ok(Action::None);
        }

        if !gate.is_armed() {
            debug!("Gate number or home not set, tracking position only");
            let in_radius = gate.contains(&sample);
            if !in_radius {
                self.store.set_has_triggered(false).await?;
                self.state.has_called_for_current_entry = false;
            }
            self.commit(sample, in_radius, &gate);
            return Ok(Action::None);
        }

        if let Some(last) = self.state.last_position {
            let moved_m = last.distance_to(&sample);
            if moved_m <= self.config.min_distance_change_m {
                trace!(moved_m, "Not moved enough, fix ignored");
                return Ok(Action::None);
            }
        }

        let was_in_radius = self.baseline_for(&gate);
        let is_in_radius = gate.contains(&sample);

        debug!(
            %sample,
            distance_m = ?gate.distance_to_home(&sample),
            was_in_radius,
            is_in_radius,
            "Fix accepted"
        );

        if is_in_radius && !was_in_radius {
            let has_called = self.store.has_triggered().await?;
            self.state.has_called_for_current_entry = has_called;

            if has_called {
                debug!("Entered radius, gate already called for this entry");
            } else if !self
                .state
                .call_interval_elapsed(now, self.config.min_call_interval)
            {
                info!(
                    since_last_call_s = ?self
                        .state
                        .last_call_at
                        .map(|t| now.saturating_duration_since(t).as_secs()),
                    "Entered radius, last call too recent"
                );
            } else {
                self.store.set_has_triggered(true).await?;
                self.commit(sample, true, &gate);
                self.state.has_called_for_current_entry = true;
                self.state.last_call_at = Some(now);

                info!(%sample, "Entered gate radius, calling gate");
                return Ok(Action::Call(gate.phone_number));
            }
        } else if !is_in_radius {
            self.store.set_has_triggered(false).await?;
            self.state.has_called_for_current_entry = false;
            if was_in_radius {
                info!("Left gate radius, re-armed");
            }
        }

        self.commit(sample, is_in_radius, &gate);
        Ok(Action::None)
    }
}
