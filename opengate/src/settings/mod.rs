//! Persisted gate settings.
//!
//! The settings document holds the gate phone number, the home point, the
//! trigger radius, and the "has triggered" flag. The flag is the only piece
//! of trigger state that outlives a monitoring session: it is what keeps a
//! restarted monitor from calling the gate twice for the same entry.
//!
//! Stores publish every change to the [`GateConfig`] part of the document on
//! a `watch` channel so a running monitor can react to edits.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::Result;
use crate::geo::Coordinate;

pub const MIN_RADIUS_M: f32 = 10.0;
pub const MAX_RADIUS_M: f32 = 1000.0;
pub const DEFAULT_RADIUS_M: f32 = MIN_RADIUS_M;

/// What to call and where.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub phone_number: String,

    /// Center of the trigger area. Unset means nothing is ever inside.
    pub home: Option<Coordinate>,

    /// Always within [`MIN_RADIUS_M`, `MAX_RADIUS_M`].
    pub radius_m: f32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            phone_number: String::new(),
            home: None,
            radius_m: DEFAULT_RADIUS_M,
        }
    }
}

impl GateConfig {
    pub fn clamp_radius(radius_m: f32) -> f32 {
        if radius_m.is_nan() {
            DEFAULT_RADIUS_M
        } else {
            radius_m.clamp(MIN_RADIUS_M, MAX_RADIUS_M)
        }
    }

    /// A gate can only be called with both a number and a home point.
    pub fn is_armed(&self) -> bool {
        !self.phone_number.trim().is_empty() && self.home.is_some()
    }

    pub fn distance_to_home(&self, position: &Coordinate) -> Option<f64> {
        self.home.map(|home| home.distance_to(position))
    }

    /// Containment test; the boundary counts as inside.
    pub fn contains(&self, position: &Coordinate) -> bool {
        self.distance_to_home(position)
            .is_some_and(|distance| distance <= f64::from(self.radius_m))
    }
}

/// Everything a store persists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsDocument {
    pub gate: GateConfig,
    pub has_triggered: bool,
}

impl SettingsDocument {
    /// Re-establish invariants on a document read from outside.
    pub(crate) fn normalized(mut self) -> Self {
        self.gate.radius_m = GateConfig::clamp_radius(self.gate.radius_m);
        self
    }
}

/// An edit applied atomically to the settings document.
pub type Edit = Box<dyn FnOnce(&mut SettingsDocument) + Send>;

/// Async key-value access to gate settings.
///
/// Implementors provide atomic snapshot/modify primitives and the change
/// stream; the typed accessors are built on top.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Current document.
    async fn snapshot(&self) -> Result<SettingsDocument>;

    /// Apply `edit` atomically and return the resulting document.
    ///
    /// Nothing is committed if persisting the result fails.
    async fn modify(&self, edit: Edit) -> Result<SettingsDocument>;

    /// Change stream of the gate configuration.
    fn subscribe(&self) -> watch::Receiver<GateConfig>;

    async fn gate_config(&self) -> Result<GateConfig> {
        Ok(self.snapshot().await?.gate)
    }

    async fn has_triggered(&self) -> Result<bool> {
        Ok(self.snapshot().await?.has_triggered)
    }

    async fn set_has_triggered(&self, value: bool) -> Result<()> {
        self.modify(Box::new(move |doc: &mut SettingsDocument| doc.has_triggered = value))
            .await
            .map(drop)
    }

    async fn set_phone_number(&self, number: &str) -> Result<()> {
        let number = number.trim().to_owned();
        self.modify(Box::new(move |doc: &mut SettingsDocument| doc.gate.phone_number = number))
            .await
            .map(drop)
    }

    async fn set_home(&self, home: Option<Coordinate>) -> Result<()> {
        self.modify(Box::new(move |doc: &mut SettingsDocument| doc.gate.home = home))
            .await
            .map(drop)
    }

    /// Store a new radius, clamped into range. Returns the stored value.
    async fn set_radius(&self, radius_m: f32) -> Result<f32> {
        let radius_m = GateConfig::clamp_radius(radius_m);
        self.modify(Box::new(move |doc: &mut SettingsDocument| doc.gate.radius_m = radius_m))
            .await
            .map(|doc| doc.gate.radius_m)
    }

    /// Reset everything, including the triggered flag, to defaults.
    async fn clear(&self) -> Result<()> {
        self.modify(Box::new(|doc: &mut SettingsDocument| *doc = SettingsDocument::default()))
            .await
            .map(drop)
    }

    async fn is_near_gate(&self, position: &Coordinate) -> Result<bool> {
        Ok(self.gate_config().await?.contains(position))
    }
}

/// Push `gate` to subscribers if it differs from what they last saw.
fn publish(config_tx: &watch::Sender<GateConfig>, gate: &GateConfig) {
    config_tx.send_if_modified(|current| {
        if current != gate {
            *current = gate.clone();
            true
        } else {
            false
        }
    });
}
