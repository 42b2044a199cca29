//! Position fix providers.
//!
//! A [`PositionSource`] answers "where was the device last seen" on demand
//! and pushes fixes into a channel at a requested cadence until the
//! subscription is cancelled.

mod line;

pub use line::LineSource;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::geo::Coordinate;

/// Desired cadence of pushed fixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingRequest {
    /// Nominal time between fixes.
    pub interval: Duration,

    /// Providers may deliver faster than `interval`, but never faster than
    /// this.
    pub fastest_interval: Duration,
}

impl Default for SamplingRequest {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            fastest_interval: Duration::from_secs(5),
        }
    }
}

/// Opaque handle identifying one active subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub(crate) u64);

#[async_trait]
pub trait PositionSource: Send + Sync {
    /// Best-effort most recent fix. `Ok(None)` when the provider has none.
    ///
    /// Fails with [`Error::PermissionDenied`](crate::error::Error) when
    /// location access is refused.
    async fn last_known_position(&self) -> Result<Option<Coordinate>>;

    /// Start pushing fixes into `sink` at roughly `request.interval`.
    async fn subscribe(
        &self,
        request: SamplingRequest,
        sink: mpsc::Sender<Coordinate>,
    ) -> Result<SubscriptionHandle>;

    /// Stop a subscription. Unknown handles are ignored.
    async fn unsubscribe(&self, handle: SubscriptionHandle);
}
