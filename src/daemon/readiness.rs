use crate::core::models::Resource;
use crate::daemon::polling::PollingEngine;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait ReadinessAction: Send + Sync {
    async fn run(&self);
}

/// Fetches version/health info once the backend is up.
pub struct FetchHealthOnReady {
    engine: PollingEngine,
}

impl FetchHealthOnReady {
    pub fn new(engine: PollingEngine) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl ReadinessAction for FetchHealthOnReady {
    async fn run(&self) {
        if !self.engine.refresh(Resource::Health).await {
            tracing::warn!("Initial health fetch failed, waiting for regular polling");
        }
    }
}

/// Runs its action the first time the readiness signal turns true, and never
/// again until [`reset`](ReadinessLatch::reset) is called.
pub struct ReadinessLatch {
    fired: AtomicBool,
    action: Arc<dyn ReadinessAction>,
}

impl ReadinessLatch {
    pub fn new(action: Arc<dyn ReadinessAction>) -> Self {
        Self {
            fired: AtomicBool::new(false),
            action,
        }
    }

    /// Returns whether this call ran the action.
    pub async fn signal(&self, ready: bool) -> bool {
        if !ready {
            return false;
        }
        if self
            .fired
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        tracing::info!("Backend ready, running one-time initialization");
        self.action.run().await;
        true
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Re-arms the latch, for whoever detects a backend restart.
    pub fn reset(&self) {
        if self.fired.swap(false, Ordering::SeqCst) {
            tracing::info!("Readiness latch reset");
        }
    }

    pub fn spawn(
        self: Arc<Self>,
        mut ready_rx: watch::Receiver<bool>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let ready = *ready_rx.borrow_and_update();
            self.signal(ready).await;

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    changed = ready_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let ready = *ready_rx.borrow_and_update();
                        self.signal(ready).await;
                    }
                }
            }
        })
    }
}
