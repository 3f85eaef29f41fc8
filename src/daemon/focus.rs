//! Translates window focus into engine pause/resume.
//!
//! Exactly one focus source is subscribed for the process lifetime: the
//! native window-focus signal when the host shell provides one, otherwise
//! the page-visibility fallback.

use crate::daemon::exclusion::{ExclusionGate, FocusOutcome};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub enum FocusSignal {
    Native(watch::Receiver<bool>),
    Visibility(watch::Receiver<bool>),
}

impl FocusSignal {
    pub fn select(native: Option<watch::Receiver<bool>>, visibility: watch::Receiver<bool>) -> Self {
        match native {
            Some(rx) => FocusSignal::Native(rx),
            None => FocusSignal::Visibility(visibility),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FocusSignal::Native(_) => "native",
            FocusSignal::Visibility(_) => "visibility",
        }
    }

    fn into_receiver(self) -> watch::Receiver<bool> {
        match self {
            FocusSignal::Native(rx) | FocusSignal::Visibility(rx) => rx,
        }
    }
}

pub struct FocusCoordinator {
    gate: Arc<ExclusionGate>,
}

impl FocusCoordinator {
    pub fn new(gate: Arc<ExclusionGate>) -> Self {
        Self { gate }
    }

    pub fn handle_focus_change(&self, focused: bool) -> FocusOutcome {
        let outcome = self.gate.apply_focus(focused);
        match outcome {
            FocusOutcome::Paused => tracing::debug!("Window lost focus"),
            FocusOutcome::Resumed => tracing::debug!("Window gained focus"),
            FocusOutcome::HeldByExclusions(active) => {
                tracing::info!(active, "Window gained focus, polling held by exclusions")
            }
        }
        outcome
    }

    pub fn spawn(self, signal: FocusSignal, shutdown: CancellationToken) -> JoinHandle<()> {
        tracing::info!(source = signal.kind(), "Subscribing to focus signal");
        let mut rx = signal.into_receiver();

        tokio::spawn(async move {
            let initial = *rx.borrow_and_update();
            self.handle_focus_change(initial);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            tracing::debug!("Focus source closed, keeping last focus state");
                            break;
                        }
                        let focused = *rx.borrow_and_update();
                        self.handle_focus_change(focused);
                    }
                }
            }
        })
    }
}
