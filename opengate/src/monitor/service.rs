use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{Collaborators, MonitorCommand, MonitorConfig, MonitorState};
use crate::error::{Error, Result};
use crate::geo::Coordinate;
use crate::position::SubscriptionHandle;
use crate::settings::GateConfig;
use crate::tracing::prelude::*;
use crate::trigger::{Action, GeofenceTrigger};

const COMMAND_QUEUE_DEPTH: usize = 8;
const SAMPLE_QUEUE_DEPTH: usize = 32;

/// Spawn the monitor task. It starts out [`MonitorState::Stopped`].
///
/// The task exits when `shutdown` is cancelled or every handle is dropped,
/// closing any open session first.
pub fn spawn(
    collaborators: Collaborators,
    config: MonitorConfig,
    shutdown: CancellationToken,
) -> (MonitorHandle, JoinHandle<()>) {
    let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    let (state_tx, state_rx) = watch::channel(MonitorState::Stopped);
    let link = Arc::new(Mutex::new(None));

    let monitor = Monitor {
        collab: collaborators,
        config,
        state_tx,
        link: Arc::clone(&link),
        shutdown,
        session: None,
    };
    let task = tokio::spawn(monitor.run(command_rx));

    let handle = MonitorHandle {
        command_tx,
        link,
        state_rx,
    };
    (handle, task)
}

/// Control surface of a running monitor task.
#[derive(Clone)]
pub struct MonitorHandle {
    command_tx: mpsc::Sender<MonitorCommand>,
    link: Arc<Mutex<Option<SessionLink>>>,
    state_rx: watch::Receiver<MonitorState>,
}

/// What handles need to reach the active session directly.
struct SessionLink {
    sample_tx: mpsc::Sender<Coordinate>,
    cancel: CancellationToken,
}

impl MonitorHandle {
    /// Open a session. Succeeds without effect if one is already running.
    pub async fn start(&self) -> Result<()> {
        let (reply, reply_rx) = oneshot::channel();
        self.command_tx
            .send(MonitorCommand::Start { reply })
            .await
            .map_err(|_| task_gone())?;
        reply_rx.await.map_err(|_| task_gone())?
    }

    /// Close the session, abandoning any fix still being evaluated.
    pub async fn stop(&self) {
        if let Some(link) = self.link.lock().as_ref() {
            link.cancel.cancel();
        }

        let (reply, reply_rx) = oneshot::channel();
        if self
            .command_tx
            .send(MonitorCommand::Stop { reply })
            .await
            .is_ok()
        {
            let _ = reply_rx.await;
        }
    }

    /// Queue a fix obtained outside the subscription, e.g. by a foreground
    /// observer. Returns false when no session is running.
    pub async fn submit_external_sample(&self, position: Coordinate) -> bool {
        let sample_tx = self.link.lock().as_ref().map(|link| link.sample_tx.clone());
        match sample_tx {
            Some(sample_tx) => sample_tx.send(position).await.is_ok(),
            None => {
                debug!(%position, "No session running, external fix dropped");
                false
            }
        }
    }

    pub fn state(&self) -> MonitorState {
        *self.state_rx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<MonitorState> {
        self.state_rx.clone()
    }
}

fn task_gone() -> Error {
    Error::Other("monitor task has exited".into())
}

struct Session {
    trigger: GeofenceTrigger,
    subscription: SubscriptionHandle,
    sample_rx: mpsc::Receiver<Coordinate>,
    config_rx: watch::Receiver<GateConfig>,
    cancel: CancellationToken,
}

enum Event {
    Shutdown,
    Detached,
    Command(MonitorCommand),
    Cancelled,
    Sample(Coordinate),
    ConfigChanged,
}

struct Monitor {
    collab: Collaborators,
    config: MonitorConfig,
    state_tx: watch::Sender<MonitorState>,
    link: Arc<Mutex<Option<SessionLink>>>,
    shutdown: CancellationToken,
    session: Option<Session>,
}

impl Monitor {
    async fn run(mut self, mut command_rx: mpsc::Receiver<MonitorCommand>) {
        trace!("Monitor task started");

        loop {
            let event = match self.session.as_mut() {
                Some(session) => tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => Event::Shutdown,
                    _ = session.cancel.cancelled() => Event::Cancelled,
                    Some(position) = session.sample_rx.recv() => Event::Sample(position),
                    Ok(()) = session.config_rx.changed() => Event::ConfigChanged,
                    command = command_rx.recv() => command.map_or(Event::Detached, Event::Command),
                },
                None => tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => Event::Shutdown,
                    command = command_rx.recv() => command.map_or(Event::Detached, Event::Command),
                },
            };

            match event {
                Event::Shutdown => {
                    debug!("Monitor shutdown requested");
                    self.teardown().await;
                    break;
                }
                Event::Detached => {
                    debug!("All monitor handles dropped");
                    self.teardown().await;
                    break;
                }
                Event::Command(MonitorCommand::Start { reply }) => {
                    let result = self.start().await;
                    let _ = reply.send(result);
                }
                Event::Command(MonitorCommand::Stop { reply }) => {
                    self.teardown().await;
                    let _ = reply.send(());
                }
                Event::Cancelled => self.teardown().await,
                Event::Sample(position) => self.process_sample(position).await,
                Event::ConfigChanged => self.rebaseline(),
            }
        }

        trace!("Monitor task stopped");
    }

    async fn start(&mut self) -> Result<()> {
        if self.session.is_some() {
            debug!("Monitor already running, start ignored");
            return Ok(());
        }

        self.set_state(MonitorState::Starting);

        if !self.collab.permissions.location_permitted().await {
            error!("Location permission denied, monitor not started");
            self.set_state(MonitorState::Stopped);
            return Err(Error::PermissionDenied);
        }

        self.collab.wake_lock.acquire();
        match self.open_session().await {
            Ok(session) => {
                self.session = Some(session);
                self.set_state(MonitorState::Running);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Monitor failed to start");
                self.collab.wake_lock.release();
                self.set_state(MonitorState::Stopped);
                Err(e)
            }
        }
    }

    async fn open_session(&self) -> Result<Session> {
        let initial = match self.collab.source.last_known_position().await {
            Ok(position) => position.filter(Coordinate::is_valid),
            Err(Error::PermissionDenied) => return Err(Error::PermissionDenied),
            Err(e) => {
                warn!(error = %e, "Initial position unavailable");
                None
            }
        };

        let config_rx = self.collab.store.subscribe();
        let mut trigger =
            GeofenceTrigger::new(Arc::clone(&self.collab.store), self.config.trigger.clone());
        trigger.initialize(initial).await;

        let (sample_tx, sample_rx) = mpsc::channel(SAMPLE_QUEUE_DEPTH);
        let subscription = self
            .collab
            .source
            .subscribe(self.config.sampling, sample_tx.clone())
            .await?;

        let cancel = self.shutdown.child_token();
        *self.link.lock() = Some(SessionLink {
            sample_tx,
            cancel: cancel.clone(),
        });

        info!(
            interval_ms = self.config.sampling.interval.as_millis() as u64,
            "Monitoring started"
        );

        Ok(Session {
            trigger,
            subscription,
            sample_rx,
            config_rx,
            cancel,
        })
    }

    async fn process_sample(&mut self, position: Coordinate) {
        if !position.is_valid() {
            warn!(%position, "Ignoring invalid fix");
            return;
        }

        if !self.collab.permissions.location_permitted().await {
            warn!("Location permission revoked, stopping monitor");
            self.teardown().await;
            return;
        }

        let Some(session) = self.session.as_mut() else {
            return;
        };

        let outcome = tokio::select! {
            biased;
            _ = session.cancel.cancelled() => None,
            action = session.trigger.on_sample(position, Instant::now()) => Some(action),
        };

        match outcome {
            Some(Action::Call(phone_number)) => self.dispatch(phone_number),
            Some(Action::None) => {}
            None => {
                debug!(%position, "Fix evaluation abandoned");
                self.teardown().await;
            }
        }
    }

    /// Hand the call off without waiting for it.
    fn dispatch(&self, phone_number: String) {
        let executor = Arc::clone(&self.collab.executor);
        tokio::spawn(async move {
            executor.place_call(&phone_number).await;
        });
    }

    fn rebaseline(&mut self) {
        if let Some(session) = self.session.as_mut() {
            let gate = session.config_rx.borrow_and_update().clone();
            session.trigger.on_config_changed(&gate);
        }
    }

    async fn teardown(&mut self) {
        self.link.lock().take();

        if let Some(session) = self.session.take() {
            session.cancel.cancel();
            self.collab.source.unsubscribe(session.subscription).await;
            self.collab.wake_lock.release();
            info!("Monitoring stopped");
        }

        self.set_state(MonitorState::Stopped);
    }

    fn set_state(&self, state: MonitorState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            debug!(from = %current, to = %state, "Monitor state changed");
            *current = state;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time;

    use super::*;
    use crate::settings::{SettingsDocument, SettingsStore};
    use crate::testing::{
        CountingWakeLock, LastKnown, ManualSource, PausableStore, RecordingExecutor,
        TogglePermissions, north_of,
    };

    const HOME: Coordinate = Coordinate::new(37.7749, -122.4194);

    struct Harness {
        handle: MonitorHandle,
        task: JoinHandle<()>,
        shutdown: CancellationToken,
        store: Arc<PausableStore>,
        source: Arc<ManualSource>,
        executor: Arc<RecordingExecutor>,
        permissions: Arc<TogglePermissions>,
        wake_lock: Arc<CountingWakeLock>,
    }

    impl Harness {
        fn new(last_known: LastKnown) -> Self {
            Self::with_executor(last_known, RecordingExecutor::default())
        }

        fn with_executor(last_known: LastKnown, executor: RecordingExecutor) -> Self {
            let store = Arc::new(PausableStore::new(SettingsDocument {
                gate: GateConfig {
                    phone_number: "555".into(),
                    home: Some(HOME),
                    radius_m: 100.0,
                },
                has_triggered: false,
            }));
            let source = Arc::new(ManualSource::new(last_known));
            let executor = Arc::new(executor);
            let permissions = Arc::new(TogglePermissions::new(true));
            let wake_lock = Arc::new(CountingWakeLock::default());
            let shutdown = CancellationToken::new();

            let (handle, task) = spawn(
                Collaborators {
                    store: store.clone(),
                    source: source.clone(),
                    executor: executor.clone(),
                    permissions: permissions.clone(),
                    wake_lock: wake_lock.clone(),
                },
                MonitorConfig::default(),
                shutdown.clone(),
            );

            Self {
                handle,
                task,
                shutdown,
                store,
                source,
                executor,
                permissions,
                wake_lock,
            }
        }

        fn starting_away() -> Self {
            Self::new(LastKnown::Fix(Some(away())))
        }
    }

    fn away() -> Coordinate {
        north_of(HOME, 500.0)
    }

    /// Let the monitor task, and anything it spawned, run until idle.
    async fn settle() {
        time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn start_opens_one_session() {
        let h = Harness::starting_away();
        assert_eq!(h.handle.state(), MonitorState::Stopped);

        h.handle.start().await.unwrap();

        assert_eq!(h.handle.state(), MonitorState::Running);
        assert_eq!(h.wake_lock.acquired(), 1);
        assert_eq!(h.source.active(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn entry_places_exactly_one_call() {
        let h = Harness::starting_away();
        h.handle.start().await.unwrap();

        h.source.push(HOME);
        settle().await;
        assert_eq!(h.executor.calls(), vec!["555"]);

        h.source.push(north_of(HOME, 20.0));
        h.source.push(north_of(HOME, 40.0));
        settle().await;
        assert_eq!(h.executor.calls(), vec!["555"]);
    }

    #[tokio::test(start_paused = true)]
    async fn reentry_after_interval_calls_again() {
        let h = Harness::starting_away();
        h.handle.start().await.unwrap();

        h.source.push(HOME);
        h.source.push(away());
        settle().await;
        assert!(!h.store.has_triggered().await.unwrap());

        time::advance(Duration::from_secs(61)).await;
        h.source.push(HOME);
        settle().await;

        assert_eq!(h.executor.calls(), vec!["555", "555"]);
    }

    #[tokio::test(start_paused = true)]
    async fn external_and_subscribed_fixes_share_one_trigger() {
        let h = Harness::starting_away();
        h.handle.start().await.unwrap();

        assert!(h.handle.submit_external_sample(HOME).await);
        h.source.push(north_of(HOME, 30.0));
        settle().await;

        assert_eq!(h.executor.calls(), vec!["555"]);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_start_is_a_no_op() {
        let h = Harness::starting_away();
        h.handle.start().await.unwrap();
        h.source.push(HOME);
        settle().await;

        h.handle.start().await.unwrap();

        assert_eq!(h.handle.state(), MonitorState::Running);
        assert_eq!(h.source.subscriptions(), 1);
        assert_eq!(h.wake_lock.acquired(), 1);

        // Still inside the same dwell.
        h.source.push(north_of(HOME, 20.0));
        settle().await;
        assert_eq!(h.executor.calls(), vec!["555"]);
    }

    #[tokio::test(start_paused = true)]
    async fn permission_denied_never_runs() {
        let h = Harness::starting_away();
        h.permissions.set(false);
        let mut states = h.handle.subscribe_state();

        let result = h.handle.start().await;

        assert!(matches!(result, Err(Error::PermissionDenied)));
        assert_eq!(h.handle.state(), MonitorState::Stopped);
        assert_eq!(h.wake_lock.acquired(), 0);
        assert_eq!(h.source.subscriptions(), 0);
        assert!(states.has_changed().unwrap(), "passed through Starting");
        assert_eq!(*states.borrow_and_update(), MonitorState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn denied_initial_fix_aborts_start() {
        let h = Harness::new(LastKnown::Denied);

        let result = h.handle.start().await;

        assert!(matches!(result, Err(Error::PermissionDenied)));
        assert_eq!(h.handle.state(), MonitorState::Stopped);
        assert_eq!(h.wake_lock.acquired(), 1);
        assert_eq!(h.wake_lock.released(), 1);
        assert_eq!(h.source.subscriptions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_initial_fix_is_tolerated() {
        let h = Harness::new(LastKnown::Unavailable);

        h.handle.start().await.unwrap();

        assert_eq!(h.handle.state(), MonitorState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn first_fix_seeds_when_no_initial_position() {
        let h = Harness::new(LastKnown::Fix(None));
        h.handle.start().await.unwrap();

        h.source.push(HOME);
        settle().await;
        assert!(h.executor.calls().is_empty());

        h.source.push(away());
        h.source.push(HOME);
        settle().await;
        assert_eq!(h.executor.calls(), vec!["555"]);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_tears_down_session() {
        let h = Harness::starting_away();
        h.handle.start().await.unwrap();

        h.handle.stop().await;

        assert_eq!(h.handle.state(), MonitorState::Stopped);
        assert_eq!(h.source.active(), 0);
        assert_eq!(h.wake_lock.released(), 1);
        assert!(!h.handle.submit_external_sample(HOME).await);

        // Stopping twice is harmless.
        h.handle.stop().await;
        assert_eq!(h.wake_lock.released(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_after_stop_opens_fresh_session() {
        let h = Harness::starting_away();
        h.handle.start().await.unwrap();
        h.handle.stop().await;

        h.handle.start().await.unwrap();

        assert_eq!(h.handle.state(), MonitorState::Running);
        assert_eq!(h.source.subscriptions(), 2);
        assert_eq!(h.source.active(), 1);
        assert_eq!(h.wake_lock.acquired(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn revoked_permission_stops_session() {
        let h = Harness::starting_away();
        h.handle.start().await.unwrap();

        h.permissions.set(false);
        h.source.push(HOME);
        settle().await;

        assert_eq!(h.handle.state(), MonitorState::Stopped);
        assert!(h.executor.calls().is_empty());
        assert_eq!(h.source.active(), 0);
        assert_eq!(h.wake_lock.released(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn moving_home_onto_position_does_not_call() {
        let h = Harness::starting_away();
        h.handle.start().await.unwrap();

        h.store.set_home(Some(away())).await.unwrap();
        settle().await;
        h.source.push(north_of(away(), 10.0));
        settle().await;

        assert!(h.executor.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_fixes_are_dropped() {
        let h = Harness::starting_away();
        h.handle.start().await.unwrap();

        h.source.push(Coordinate::new(f64::NAN, 0.0));
        h.source.push(Coordinate::new(91.0, 0.0));
        settle().await;

        assert_eq!(h.handle.state(), MonitorState::Running);
        assert!(h.executor.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_abandons_fix_under_evaluation() {
        let h = Harness::starting_away();
        h.handle.start().await.unwrap();

        h.store.pause();
        h.source.push(HOME);
        h.store.held().await;

        h.handle.stop().await;
        h.store.resume();
        settle().await;

        assert_eq!(h.handle.state(), MonitorState::Stopped);
        assert!(h.executor.calls().is_empty());
        assert!(!h.store.has_triggered().await.unwrap());
        assert_eq!(h.source.active(), 0);
        assert_eq!(h.wake_lock.released(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dispatched_call_outlives_stop() {
        let h = Harness::with_executor(
            LastKnown::Fix(Some(away())),
            RecordingExecutor::with_delay(Duration::from_secs(5)),
        );
        h.handle.start().await.unwrap();

        h.source.push(HOME);
        settle().await;
        h.handle.stop().await;
        assert_eq!(h.handle.state(), MonitorState::Stopped);
        assert!(h.executor.calls().is_empty(), "call still in flight");

        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.executor.calls(), vec!["555"]);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_closes_session_and_ends_task() {
        let h = Harness::starting_away();
        h.handle.start().await.unwrap();

        h.shutdown.cancel();
        h.task.await.unwrap();

        assert_eq!(h.handle.state(), MonitorState::Stopped);
        assert_eq!(h.source.active(), 0);
        assert_eq!(h.wake_lock.released(), 1);
        assert!(h.handle.start().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_every_handle_ends_task() {
        let Harness { handle, task, .. } = Harness::starting_away();
        handle.start().await.unwrap();

        drop(handle);

        task.await.unwrap();
    }
}
