//! Test doubles shared by the unit tests.

use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc, watch};

use crate::caller::{ActionExecutor, Notifier};
use crate::error::{Error, Result};
use crate::geo::{Coordinate, EARTH_RADIUS_M};
use crate::monitor::{PermissionGuard, WakeLock};
use crate::position::{PositionSource, SamplingRequest, SubscriptionHandle};
use crate::settings::{Edit, GateConfig, MemoryStore, SettingsDocument, SettingsStore};

/// Meters spanned by one degree of latitude.
const METERS_PER_DEGREE: f64 = EARTH_RADIUS_M * PI / 180.0;

/// `origin` moved `meters` due north.
pub(crate) fn north_of(origin: Coordinate, meters: f64) -> Coordinate {
    Coordinate::new(origin.latitude + meters / METERS_PER_DEGREE, origin.longitude)
}

#[derive(Default)]
pub(crate) struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub(crate) fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, message: &str) {
        self.messages.lock().push(message.to_owned());
    }
}

/// Records numbers, optionally only after a delay.
#[derive(Default)]
pub(crate) struct RecordingExecutor {
    delay: Duration,
    calls: Mutex<Vec<String>>,
}

impl RecordingExecutor {
    pub(crate) fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ActionExecutor for RecordingExecutor {
    async fn place_call(&self, phone_number: &str) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.calls.lock().push(phone_number.to_owned());
    }
}

pub(crate) struct TogglePermissions {
    granted: AtomicBool,
}

impl TogglePermissions {
    pub(crate) fn new(granted: bool) -> Self {
        Self {
            granted: AtomicBool::new(granted),
        }
    }

    pub(crate) fn set(&self, granted: bool) {
        self.granted.store(granted, Ordering::SeqCst);
    }
}

#[async_trait]
impl PermissionGuard for TogglePermissions {
    async fn location_permitted(&self) -> bool {
        self.granted.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub(crate) struct CountingWakeLock {
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl CountingWakeLock {
    pub(crate) fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub(crate) fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl WakeLock for CountingWakeLock {
    fn acquire(&self) {
        self.acquired.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// How [`ManualSource::last_known_position`] answers.
#[derive(Debug, Clone, Copy)]
pub(crate) enum LastKnown {
    Fix(Option<Coordinate>),
    Denied,
    Unavailable,
}

/// Position source driven by the test through [`push`](ManualSource::push).
pub(crate) struct ManualSource {
    last_known: Mutex<LastKnown>,
    sinks: Mutex<HashMap<SubscriptionHandle, mpsc::Sender<Coordinate>>>,
    next_id: AtomicU64,
    subscriptions: AtomicUsize,
}

impl ManualSource {
    pub(crate) fn new(last_known: LastKnown) -> Self {
        Self {
            last_known: Mutex::new(last_known),
            sinks: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            subscriptions: AtomicUsize::new(0),
        }
    }

    /// Deliver a fix to every active subscriber.
    pub(crate) fn push(&self, position: Coordinate) {
        for sink in self.sinks.lock().values() {
            sink.try_send(position).expect("sample queue full");
        }
    }

    /// Subscriptions currently open.
    pub(crate) fn active(&self) -> usize {
        self.sinks.lock().len()
    }

    /// Subscriptions ever opened.
    pub(crate) fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PositionSource for ManualSource {
    async fn last_known_position(&self) -> Result<Option<Coordinate>> {
        match *self.last_known.lock() {
            LastKnown::Fix(fix) => Ok(fix),
            LastKnown::Denied => Err(Error::PermissionDenied),
            LastKnown::Unavailable => Err(Error::PositionUnavailable("no provider".into())),
        }
    }

    async fn subscribe(
        &self,
        _request: SamplingRequest,
        sink: mpsc::Sender<Coordinate>,
    ) -> Result<SubscriptionHandle> {
        let handle = SubscriptionHandle(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.sinks.lock().insert(handle, sink);
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        Ok(handle)
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.sinks.lock().remove(&handle);
    }
}

/// Memory store whose reads and writes can be made to fail on demand.
pub(crate) struct FlakyStore {
    inner: MemoryStore,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl FlakyStore {
    pub(crate) fn new(gate: GateConfig) -> Self {
        Self {
            inner: MemoryStore::with_document(SettingsDocument {
                gate,
                has_triggered: false,
            }),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub(crate) fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SettingsStore for FlakyStore {
    async fn snapshot(&self) -> Result<SettingsDocument> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::Store("injected read fault".into()));
        }
        self.inner.snapshot().await
    }

    async fn modify(&self, edit: Edit) -> Result<SettingsDocument> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Store("injected write fault".into()));
        }
        self.inner.modify(edit).await
    }

    fn subscribe(&self) -> watch::Receiver<GateConfig> {
        self.inner.subscribe()
    }
}

/// Memory store whose reads can be held until released.
pub(crate) struct PausableStore {
    inner: MemoryStore,
    paused: AtomicBool,
    reached: Notify,
    resumed: Notify,
}

impl PausableStore {
    pub(crate) fn new(document: SettingsDocument) -> Self {
        Self {
            inner: MemoryStore::with_document(document),
            paused: AtomicBool::new(false),
            reached: Notify::new(),
            resumed: Notify::new(),
        }
    }

    /// Hold every following read until [`resume`](Self::resume).
    pub(crate) fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub(crate) fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.resumed.notify_waiters();
    }

    /// Wait until a read is being held.
    pub(crate) async fn held(&self) {
        self.reached.notified().await;
    }
}

#[async_trait]
impl SettingsStore for PausableStore {
    async fn snapshot(&self) -> Result<SettingsDocument> {
        if self.paused.load(Ordering::SeqCst) {
            let resumed = self.resumed.notified();
            self.reached.notify_one();
            resumed.await;
        }
        self.inner.snapshot().await
    }

    async fn modify(&self, edit: Edit) -> Result<SettingsDocument> {
        self.inner.modify(edit).await
    }

    fn subscribe(&self) -> watch::Receiver<GateConfig> {
        self.inner.subscribe()
    }
}
