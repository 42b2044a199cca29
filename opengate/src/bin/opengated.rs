//! Background daemon: watches position fixes and calls the gate on arrival.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs::File;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

use opengate::caller::{CommandDialer, DialStrategy, DialingExecutor, LogNotifier, PromptDialer};
use opengate::config::DaemonConfig;
use opengate::monitor::{self, Collaborators, MonitorConfig, MonitorState, PermissionGuard, WakeLock};
use opengate::position::{LineSource, PositionSource};
use opengate::settings::FileStore;
use opengate::tracing::{self, prelude::*};

/// Location access is granted by whoever feeds the fix stream.
struct FeedPermissions;

#[async_trait]
impl PermissionGuard for FeedPermissions {
    async fn location_permitted(&self) -> bool {
        true
    }
}

/// A long-running process needs no wake lock.
struct NoWakeLock;

impl WakeLock for NoWakeLock {
    fn acquire(&self) {}
    fn release(&self) {}
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing::init_journald_or_stdout();

    let config = DaemonConfig::from_env()?;
    info!(settings = %config.settings_path.display(), "Starting opengated");

    let store = Arc::new(
        FileStore::open(config.settings_path.clone())
            .await
            .with_context(|| format!("loading {}", config.settings_path.display()))?,
    );

    let source: Arc<dyn PositionSource> = match &config.fixes_path {
        Some(path) => {
            let file = File::open(path)
                .await
                .with_context(|| format!("opening {}", path.display()))?;
            info!(fixes = %path.display(), "Replaying fixes from file");
            Arc::new(LineSource::new(file))
        }
        None => {
            info!("Reading fixes from stdin");
            Arc::new(LineSource::new(tokio::io::stdin()))
        }
    };

    let notifier = Arc::new(LogNotifier);
    let mut strategies: Vec<Box<dyn DialStrategy>> = Vec::new();
    if let Some(command_line) = &config.dial_command {
        strategies.push(Box::new(CommandDialer::from_command_line(command_line)?));
    }
    strategies.push(Box::new(PromptDialer::new(notifier.clone())));
    let executor = Arc::new(DialingExecutor::new(strategies, notifier));

    let shutdown = CancellationToken::new();
    let (handle, task) = monitor::spawn(
        Collaborators {
            store,
            source,
            executor,
            permissions: Arc::new(FeedPermissions),
            wake_lock: Arc::new(NoWakeLock),
        },
        MonitorConfig {
            sampling: config.sampling,
            ..MonitorConfig::default()
        },
        shutdown.clone(),
    );

    handle.start().await.context("starting monitor")?;

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut state_rx = handle.subscribe_state();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = state_rx.wait_for(|state| *state == MonitorState::Stopped) => {
            warn!("Monitor stopped on its own");
        }
    }

    handle.stop().await;
    shutdown.cancel();
    task.await?;

    info!("Exiting.");
    Ok(())
}
