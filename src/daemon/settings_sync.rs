use crate::core::models::Resource;
use crate::core::settings::{PollingSettings, Settings};
use crate::daemon::exclusion::ExclusionGate;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub rescheduled: Vec<Resource>,
    pub enabled: Option<bool>,
}

impl SyncReport {
    pub fn is_empty(&self) -> bool {
        self.rescheduled.is_empty() && self.enabled.is_none()
    }
}

/// Pushes persisted polling settings into the live engine, touching only
/// what actually changed. Enablement goes through the gate so a restart
/// honors active exclusions and focus.
pub struct SettingsSynchronizer {
    gate: Arc<ExclusionGate>,
}

impl SettingsSynchronizer {
    pub fn new(gate: Arc<ExclusionGate>) -> Self {
        Self { gate }
    }

    pub fn apply(&self, settings: &PollingSettings) -> SyncReport {
        let mut report = SyncReport::default();
        let engine = self.gate.engine();
        let live = engine.intervals();

        for resource in Resource::ALL {
            let wanted = settings.intervals.get(resource);
            if wanted == live.get(resource) {
                continue;
            }
            match engine.update_interval(resource, wanted) {
                Ok(true) => report.rescheduled.push(resource),
                Ok(false) => {}
                Err(e) => tracing::warn!(error = %e, "Ignoring polling interval from settings"),
            }
        }

        if settings.enabled != engine.is_running() {
            self.gate.set_enabled(settings.enabled);
            report.enabled = Some(settings.enabled);
        }

        report
    }

    pub fn spawn(
        self,
        mut settings_rx: broadcast::Receiver<Settings>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let settings = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    received = settings_rx.recv() => received,
                };

                match settings {
                    Ok(settings) => {
                        let report = self.apply(&settings.polling);
                        if !report.is_empty() {
                            tracing::info!(
                                rescheduled = ?report.rescheduled,
                                enabled = ?report.enabled,
                                "Applied polling settings"
                            );
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Settings updates lagged, waiting for latest");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
