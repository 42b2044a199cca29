//! Geofence-triggered gate calling.
//!
//! Watches a stream of position fixes and places a call to the configured
//! gate number once per entry into the radius around the home point.

pub mod caller;
pub mod config;
pub mod error;
pub mod geo;
pub mod monitor;
pub mod position;
pub mod settings;
pub mod tracing;
pub mod trigger;

#[cfg(test)]
pub(crate) mod testing;
