//! Background monitoring session.
//!
//! A single actor task owns the [`GeofenceTrigger`](crate::trigger::GeofenceTrigger)
//! of the active session. Position fixes from the subscribed
//! [`PositionSource`] and fixes injected through
//! [`MonitorHandle::submit_external_sample`] share one queue, so they are
//! evaluated strictly one at a time in arrival order.
//!
//! ```text
//!  Stopped ──start──► Starting ──ok──► Running ──stop / permission lost──► Stopped
//!                        │
//!                        └──permission denied / subscribe failed──► Stopped
//! ```

mod commands;
mod service;

pub use commands::MonitorCommand;
pub use service::{MonitorHandle, spawn};

use std::sync::Arc;

use async_trait::async_trait;

use crate::caller::ActionExecutor;
use crate::position::{PositionSource, SamplingRequest};
use crate::settings::SettingsStore;
use crate::trigger::TriggerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum MonitorState {
    Stopped,
    Starting,
    Running,
}

/// Answers whether location access is currently granted.
#[async_trait]
pub trait PermissionGuard: Send + Sync {
    async fn location_permitted(&self) -> bool;
}

/// Keeps the host awake while a session runs.
pub trait WakeLock: Send + Sync {
    fn acquire(&self);
    fn release(&self);
}

/// External services a session depends on.
pub struct Collaborators {
    pub store: Arc<dyn SettingsStore>,
    pub source: Arc<dyn PositionSource>,
    pub executor: Arc<dyn ActionExecutor>,
    pub permissions: Arc<dyn PermissionGuard>,
    pub wake_lock: Arc<dyn WakeLock>,
}

#[derive(Debug, Clone, Default)]
pub struct MonitorConfig {
    pub sampling: SamplingRequest,
    pub trigger: TriggerConfig,
}
