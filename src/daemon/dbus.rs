use crate::core::models::Resource;
use crate::daemon::exclusion::{ExclusionGate, ExclusionReason};
use crate::daemon::polling::PollingEngine;
use crate::daemon::readiness::ReadinessLatch;
use crate::daemon::{DBUS_NAME, DBUS_PATH};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use zbus::interface;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbusCommand {
    Refresh,
}

/// Signal senders the host shell drives over D-Bus.
#[derive(Clone)]
pub struct HostSignals {
    pub window_focus: Arc<watch::Sender<bool>>,
    pub visibility: Arc<watch::Sender<bool>>,
    pub backend_ready: Arc<watch::Sender<bool>>,
}

pub struct DistroSyncService {
    cmd_tx: mpsc::UnboundedSender<DbusCommand>,
    engine: PollingEngine,
    gate: Arc<ExclusionGate>,
    latch: Arc<ReadinessLatch>,
    signals: HostSignals,
}

impl DistroSyncService {
    pub fn new(
        cmd_tx: mpsc::UnboundedSender<DbusCommand>,
        engine: PollingEngine,
        gate: Arc<ExclusionGate>,
        latch: Arc<ReadinessLatch>,
        signals: HostSignals,
    ) -> Self {
        Self {
            cmd_tx,
            engine,
            gate,
            latch,
            signals,
        }
    }
}

fn parse_reason(reason: &str) -> zbus::fdo::Result<ExclusionReason> {
    reason
        .parse::<ExclusionReason>()
        .map_err(|e| zbus::fdo::Error::InvalidArgs(e.to_string()))
}

#[interface(name = "io.github.distrosync.Daemon")]
impl DistroSyncService {
    async fn refresh(&self) -> zbus::fdo::Result<()> {
        tracing::info!("D-Bus Refresh called");
        self.cmd_tx
            .send(DbusCommand::Refresh)
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    async fn begin_exclusion(&self, reason: &str) -> zbus::fdo::Result<bool> {
        let reason = parse_reason(reason)?;
        Ok(self.gate.begin_exclusion(reason))
    }

    async fn end_exclusion(&self, reason: &str) -> zbus::fdo::Result<bool> {
        let reason = parse_reason(reason)?;
        Ok(self.gate.end_exclusion(&reason))
    }

    async fn window_focus_changed(&self, focused: bool) {
        self.signals.window_focus.send_replace(focused);
    }

    async fn visibility_changed(&self, visible: bool) {
        self.signals.visibility.send_replace(visible);
    }

    async fn backend_ready(&self, ready: bool) {
        self.signals.backend_ready.send_replace(ready);
    }

    /// Re-arms one-time initialization after the host restarted the backend.
    /// Readiness must be reported again afterwards.
    async fn backend_restarted(&self) {
        tracing::info!("Backend restart reported");
        self.signals.backend_ready.send_replace(false);
        self.latch.reset();
    }

    #[zbus(property)]
    fn is_paused(&self) -> bool {
        self.engine.is_paused()
    }

    #[zbus(property)]
    fn is_running(&self) -> bool {
        self.engine.is_running()
    }

    #[zbus(property)]
    fn is_enabled(&self) -> bool {
        self.engine.is_enabled()
    }

    #[zbus(property)]
    fn is_focused(&self) -> bool {
        self.gate.is_focused()
    }

    #[zbus(property)]
    fn active_exclusions(&self) -> Vec<String> {
        self.gate.active().iter().map(ToString::to_string).collect()
    }

    #[zbus(property)]
    fn in_flight(&self) -> Vec<String> {
        Resource::ALL
            .into_iter()
            .filter(|r| self.engine.is_in_flight(*r))
            .map(|r| r.name().to_string())
            .collect()
    }

    /// Milliseconds until each sleeping timer fires.
    #[zbus(property)]
    fn next_tick_in(&self) -> Vec<(String, u64)> {
        let now = Instant::now();
        Resource::ALL
            .into_iter()
            .filter_map(|r| {
                let next = self.engine.next_tick_at(r)?;
                let ms = next.saturating_duration_since(now).as_millis() as u64;
                Some((r.name().to_string(), ms))
            })
            .collect()
    }

    #[zbus(property)]
    fn initialized(&self) -> bool {
        self.latch.has_fired()
    }

    #[zbus(property)]
    async fn revision(&self) -> u64 {
        self.engine.store().revision().await
    }

    #[zbus(property)]
    async fn last_errors(&self) -> Vec<(String, String)> {
        let mut errors = Vec::new();
        for resource in Resource::ALL {
            if let Some(error) = self.engine.store().last_error(resource).await {
                errors.push((resource.name().to_string(), error));
            }
        }
        errors
    }

    /// RFC 3339 time of the last successful fetch per resource.
    #[zbus(property)]
    async fn last_success(&self) -> Vec<(String, String)> {
        let mut times = Vec::new();
        for resource in Resource::ALL {
            if let Some(at) = self.engine.store().last_success(resource).await {
                times.push((resource.name().to_string(), at.to_rfc3339()));
            }
        }
        times
    }
}

pub async fn start_dbus_server(service: DistroSyncService) -> Result<zbus::Connection> {
    let connection = zbus::connection::Builder::session()
        .context("Failed to connect to session D-Bus")?
        .name(DBUS_NAME)
        .context("Failed to claim D-Bus name")?
        .serve_at(DBUS_PATH, service)
        .context("Failed to register D-Bus object")?
        .build()
        .await
        .context("Failed to start D-Bus server")?;

    tracing::info!(name = DBUS_NAME, path = DBUS_PATH, "D-Bus service registered");
    Ok(connection)
}
