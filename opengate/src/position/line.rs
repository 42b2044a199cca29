use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{self, mpsc};
use tokio::time::{self, MissedTickBehavior};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::LinesStream;
use tokio_util::sync::CancellationToken;

use super::{PositionSource, SamplingRequest, SubscriptionHandle};
use crate::error::Result;
use crate::geo::Coordinate;
use crate::tracing::prelude::*;

type Lines<R> = LinesStream<BufReader<R>>;

/// Replays `lat,lon` fixes from a text stream, one line per tick.
///
/// Blank lines and lines starting with `#` are skipped; malformed lines are
/// logged and skipped. The feed is shared across subscriptions, so a new
/// subscription resumes where the previous one stopped. The most recently
/// delivered fix serves as the last known position.
pub struct LineSource<R> {
    lines: Arc<sync::Mutex<Lines<R>>>,
    last_known: Arc<Mutex<Option<Coordinate>>>,
    active: Arc<Mutex<HashMap<SubscriptionHandle, CancellationToken>>>,
    next_id: AtomicU64,
}

impl<R> LineSource<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pub fn new(reader: R) -> Self {
        Self {
            lines: Arc::new(sync::Mutex::new(LinesStream::new(
                BufReader::new(reader).lines(),
            ))),
            last_known: Arc::new(Mutex::new(None)),
            active: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl<R> PositionSource for LineSource<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    async fn last_known_position(&self) -> Result<Option<Coordinate>> {
        Ok(*self.last_known.lock())
    }

    async fn subscribe(
        &self,
        request: SamplingRequest,
        sink: mpsc::Sender<Coordinate>,
    ) -> Result<SubscriptionHandle> {
        let handle = SubscriptionHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        let cancel = CancellationToken::new();
        self.active.lock().insert(handle, cancel.clone());

        let lines = Arc::clone(&self.lines);
        let last_known = Arc::clone(&self.last_known);
        let active = Arc::clone(&self.active);
        let interval = request.interval.max(request.fastest_interval);

        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(fix) = next_fix(&lines).await else {
                            info!("Position feed exhausted");
                            break;
                        };
                        *last_known.lock() = Some(fix);
                        if sink.send(fix).await.is_err() {
                            debug!("Position sink closed");
                            break;
                        }
                    }
                }
            }

            active.lock().remove(&handle);
            trace!(?handle, "Position feed task stopped");
        });

        debug!(?handle, interval_ms = interval.as_millis() as u64, "Position subscription started");
        Ok(handle)
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) {
        if let Some(cancel) = self.active.lock().remove(&handle) {
            cancel.cancel();
            debug!(?handle, "Position subscription cancelled");
        }
    }
}

/// Read lines until one parses as a fix. `None` at end of input or on a
/// read error.
async fn next_fix<R>(lines: &sync::Mutex<Lines<R>>) -> Option<Coordinate>
where
    R: AsyncRead + Unpin,
{
    let mut lines = lines.lock().await;
    loop {
        let line = match lines.next().await? {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to read position feed");
                return None;
            }
        };

        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match line.parse::<Coordinate>() {
            Ok(fix) => return Some(fix),
            Err(e) => warn!(line, error = %e, "Skipping malformed fix"),
        }
    }
}
