mod config;
mod geofence;
mod state;

pub use config::TriggerConfig;
pub use geofence::{Action, GeofenceTrigger};
pub use state::TriggerState;
