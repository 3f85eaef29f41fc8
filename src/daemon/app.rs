use crate::backend::{Backend, WslBackend};
use crate::core::settings::{FocusSourceMode, SettingsWatcher};
use crate::core::store::DistroStore;
use crate::daemon::dbus::{start_dbus_server, DbusCommand, DistroSyncService, HostSignals};
use crate::daemon::exclusion::ExclusionGate;
use crate::daemon::focus::{FocusCoordinator, FocusSignal};
use crate::daemon::polling::PollingEngine;
use crate::daemon::readiness::{FetchHealthOnReady, ReadinessLatch};
use crate::daemon::settings_sync::SettingsSynchronizer;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

const READY_PROBE_INTERVAL: Duration = Duration::from_secs(2);

pub async fn run() -> Result<()> {
    let mut settings_watcher = SettingsWatcher::new()?;
    let settings = settings_watcher.get().await;
    if let Err(e) = settings_watcher.start_watching() {
        tracing::warn!(error = %e, "Failed to watch config, settings changes need a restart");
    }

    let backend: Arc<dyn Backend> = Arc::new(WslBackend::new(settings.backend.command.clone()));
    tracing::info!(backend = backend.name(), command = %settings.backend.command, "Using backend");

    let store = DistroStore::new();
    let engine = PollingEngine::new(Arc::clone(&backend), store.clone(), settings.polling.intervals);
    let gate = Arc::new(ExclusionGate::new(engine.clone()));
    let shutdown = CancellationToken::new();

    let (window_focus_tx, window_focus_rx) = watch::channel(true);
    let (visibility_tx, visibility_rx) = watch::channel(true);
    let (ready_tx, ready_rx) = watch::channel(false);
    let signals = HostSignals {
        window_focus: Arc::new(window_focus_tx),
        visibility: Arc::new(visibility_tx),
        backend_ready: Arc::new(ready_tx),
    };

    let latch = Arc::new(ReadinessLatch::new(Arc::new(FetchHealthOnReady::new(
        engine.clone(),
    ))));

    let (dbus_cmd_tx, dbus_cmd_rx) = mpsc::unbounded_channel::<DbusCommand>();
    let service = DistroSyncService::new(
        dbus_cmd_tx,
        engine.clone(),
        Arc::clone(&gate),
        Arc::clone(&latch),
        signals.clone(),
    );
    let dbus_connection = match start_dbus_server(service).await {
        Ok(connection) => Some(connection),
        Err(e) => {
            tracing::warn!(error = %format!("{e:#}"), "D-Bus unavailable, running without host signals");
            None
        }
    };

    let native = match settings.focus.source {
        FocusSourceMode::Auto => dbus_connection.as_ref().map(|_| window_focus_rx),
        FocusSourceMode::Native => Some(window_focus_rx),
        FocusSourceMode::Visibility => None,
    };
    let focus_task = FocusCoordinator::new(Arc::clone(&gate))
        .spawn(FocusSignal::select(native, visibility_rx), shutdown.clone());

    let synchronizer = SettingsSynchronizer::new(Arc::clone(&gate));
    let report = synchronizer.apply(&settings.polling);
    tracing::info!(
        enabled = settings.polling.enabled,
        started = ?report.enabled,
        "Initial polling settings applied"
    );
    let sync_task = synchronizer.spawn(settings_watcher.subscribe(), shutdown.clone());

    let latch_task = Arc::clone(&latch).spawn(ready_rx, shutdown.clone());

    tokio::spawn(probe_backend_ready(
        Arc::clone(&backend),
        Arc::clone(&signals.backend_ready),
        shutdown.clone(),
    ));
    tokio::spawn(handle_dbus_commands(dbus_cmd_rx, engine.clone()));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    shutdown.cancel();
    engine.stop();
    let _ = tokio::join!(focus_task, sync_task, latch_task);
    drop(dbus_connection);

    tracing::info!(revision = store.revision().await, "distro-sync daemon stopped");
    Ok(())
}

async fn handle_dbus_commands(mut cmd_rx: mpsc::UnboundedReceiver<DbusCommand>, engine: PollingEngine) {
    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            DbusCommand::Refresh => {
                tracing::info!("D-Bus refresh command received");
                engine.refresh_all().await;
                let store = engine.store();
                let distros = store.distros().await.len();
                let running_with_usage = store.all_usage().await.len();
                let wsl_version = store.health().await.and_then(|h| h.wsl_version);
                tracing::info!(
                    distros,
                    running_with_usage,
                    wsl_version = ?wsl_version,
                    "Refresh finished"
                );
            }
        }
    }
}

/// Flips the readiness signal once the backend answers its probe. The host
/// can also report readiness directly over D-Bus.
async fn probe_backend_ready(
    backend: Arc<dyn Backend>,
    ready_tx: Arc<watch::Sender<bool>>,
    shutdown: CancellationToken,
) {
    loop {
        if *ready_tx.borrow() {
            return;
        }
        if backend.is_ready().await {
            tracing::info!("Backend answered readiness probe");
            ready_tx.send_replace(true);
            return;
        }

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(READY_PROBE_INTERVAL) => {}
        }
    }
}
