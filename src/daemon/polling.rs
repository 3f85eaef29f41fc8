//! Fixed-delay polling of backend resources.
//!
//! Each [`Resource`] gets its own timer task. A task sleeps for the
//! resource's interval, runs one fetch-and-apply cycle (a tick), and only
//! then schedules the next sleep, so a slow backend delays the cadence
//! instead of queuing ticks.
//!
//! ## Rules
//! - At most one tick per resource is in flight. Ticks hold the resource's
//!   gate, which outlives timer handles, so a tick left running by a
//!   replaced handle finishes before the replacement's first tick starts.
//! - `pause`/`stop`/interval changes cancel the *next* tick only; an
//!   in-flight fetch is never aborted.
//! - Results that complete after `stop()` belong to a stale generation and
//!   are dropped. Results completing after `pause()` are still applied.
//! - `start()` and interval changes wait one full interval; `resume()`
//!   ticks immediately so the UI is fresh after regaining focus.

use crate::backend::Backend;
use crate::core::models::Resource;
use crate::core::settings::IntervalSettings;
use crate::core::store::DistroStore;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("interval for {resource} must be greater than 0, got {ms}ms")]
    InvalidInterval { resource: Resource, ms: u64 },
}

#[derive(Default)]
struct TickGate {
    lock: tokio::sync::Mutex<()>,
    in_flight: AtomicBool,
}

struct TimerHandle {
    cancel: CancellationToken,
    next_tick: Arc<Mutex<Option<Instant>>>,
}

struct ResourceTimer {
    resource: Resource,
    interval: Duration,
    gate: Arc<TickGate>,
    handle: Option<TimerHandle>,
}

impl ResourceTimer {
    fn new(resource: Resource, interval: Duration) -> Self {
        Self {
            resource,
            interval,
            gate: Arc::new(TickGate::default()),
            handle: None,
        }
    }

    fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.cancel.cancel();
        }
    }
}

struct EngineState {
    running: bool,
    paused: bool,
    enabled: bool,
    timers: BTreeMap<Resource, ResourceTimer>,
}

#[derive(Clone)]
struct TickContext {
    backend: Arc<dyn Backend>,
    store: DistroStore,
    generation: Arc<AtomicU64>,
}

impl TickContext {
    async fn tick(&self, resource: Resource, gate: &TickGate, generation: u64) -> bool {
        gate.in_flight.store(true, Ordering::SeqCst);
        let applied = self.fetch_and_apply(resource, generation).await;
        gate.in_flight.store(false, Ordering::SeqCst);
        applied
    }

    async fn fetch_and_apply(&self, resource: Resource, generation: u64) -> bool {
        let result = self.backend.fetch(resource).await;

        if self.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!(%resource, "Dropping result from a stopped polling run");
            return false;
        }

        match result {
            Ok(payload) => {
                let changed = self.store.apply(payload).await;
                tracing::debug!(%resource, changed, "Tick applied");
                true
            }
            Err(e) => {
                let error = format!("{e:#}");
                tracing::warn!(%resource, error = %error, "Fetch failed, keeping last known state");
                self.store.record_failure(resource, error).await;
                false
            }
        }
    }
}

/// Owns the per-resource timers. Cheap to clone; all clones drive the same
/// engine.
#[derive(Clone)]
pub struct PollingEngine {
    state: Arc<Mutex<EngineState>>,
    ctx: TickContext,
}

impl PollingEngine {
    pub fn new(backend: Arc<dyn Backend>, store: DistroStore, intervals: IntervalSettings) -> Self {
        let timers = Resource::ALL
            .into_iter()
            .map(|resource| {
                // Zero would busy-loop the timer.
                let ms = intervals.get(resource).max(1);
                (resource, ResourceTimer::new(resource, Duration::from_millis(ms)))
            })
            .collect();

        Self {
            state: Arc::new(Mutex::new(EngineState {
                running: false,
                paused: false,
                enabled: false,
                timers,
            })),
            ctx: TickContext {
                backend,
                store,
                generation: Arc::new(AtomicU64::new(0)),
            },
        }
    }

    pub fn store(&self) -> &DistroStore {
        &self.ctx.store
    }

    pub fn start(&self) {
        let mut state = self.lock();
        self.start_locked(&mut state);
    }

    pub fn stop(&self) {
        let mut state = self.lock();
        self.stop_locked(&mut state);
    }

    pub fn pause(&self) {
        let mut state = self.lock();
        if !state.running || state.paused {
            return;
        }

        for timer in state.timers.values_mut() {
            timer.cancel();
        }
        state.paused = true;
        tracing::info!("Polling paused");
    }

    pub fn resume(&self) {
        let mut state = self.lock();
        if !state.running || !state.paused {
            return;
        }

        state.paused = false;
        for timer in state.timers.values_mut() {
            self.schedule(timer, Duration::ZERO);
        }
        tracing::info!("Polling resumed");
    }

    /// Changes one resource's cadence. Returns `Ok(false)` when the value is
    /// unchanged, in which case no timer is touched.
    pub fn update_interval(&self, resource: Resource, ms: u64) -> Result<bool, EngineError> {
        if ms == 0 {
            tracing::warn!(%resource, "Rejecting non-positive polling interval");
            return Err(EngineError::InvalidInterval { resource, ms });
        }

        let interval = Duration::from_millis(ms);
        let mut state = self.lock();
        let active = state.running && !state.paused;

        let Some(timer) = state.timers.get_mut(&resource) else {
            return Ok(false);
        };
        if timer.interval == interval {
            return Ok(false);
        }

        let previous = timer.interval;
        timer.interval = interval;
        if active {
            self.schedule(timer, interval);
        }

        tracing::info!(
            %resource,
            previous_ms = previous.as_millis() as u64,
            interval_ms = ms,
            rescheduled = active,
            "Polling interval updated"
        );
        Ok(true)
    }

    pub fn set_global_enabled(&self, enabled: bool) {
        let mut state = self.lock();
        state.enabled = enabled;

        if enabled && !state.running {
            self.start_locked(&mut state);
        } else if !enabled && state.running {
            self.stop_locked(&mut state);
        }
    }

    /// Runs one out-of-band tick for `resource` without moving its schedule.
    /// Waits for any tick already in flight for the same resource.
    pub async fn refresh(&self, resource: Resource) -> bool {
        let gate = {
            let state = self.lock();
            state.timers.get(&resource).map(|timer| Arc::clone(&timer.gate))
        };
        let Some(gate) = gate else {
            return false;
        };

        let _guard = gate.lock.lock().await;
        let generation = self.ctx.generation.load(Ordering::SeqCst);
        self.ctx.tick(resource, &gate, generation).await
    }

    pub async fn refresh_all(&self) {
        for resource in Resource::ALL {
            self.refresh(resource).await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    #[cfg(test)]
    pub fn interval(&self, resource: Resource) -> Option<Duration> {
        self.lock().timers.get(&resource).map(|t| t.interval)
    }

    pub fn intervals(&self) -> IntervalSettings {
        let state = self.lock();
        let mut intervals = IntervalSettings::default();
        for (resource, timer) in &state.timers {
            intervals.set(*resource, timer.interval.as_millis() as u64);
        }
        intervals
    }

    pub fn is_in_flight(&self, resource: Resource) -> bool {
        self.lock()
            .timers
            .get(&resource)
            .is_some_and(|t| t.gate.in_flight.load(Ordering::SeqCst))
    }

    #[cfg(test)]
    pub fn has_timer(&self, resource: Resource) -> bool {
        self.lock()
            .timers
            .get(&resource)
            .is_some_and(|t| t.handle.is_some())
    }

    /// When the resource's timer will next fire, if it is currently sleeping.
    pub fn next_tick_at(&self, resource: Resource) -> Option<Instant> {
        let state = self.lock();
        let handle = state.timers.get(&resource)?.handle.as_ref()?;
        let next = *lock_ignoring_poison(&handle.next_tick);
        next
    }

    fn start_locked(&self, state: &mut EngineState) {
        if state.running {
            return;
        }

        state.running = true;
        state.paused = false;
        for timer in state.timers.values_mut() {
            let first = timer.interval;
            self.schedule(timer, first);
        }
        tracing::info!("Polling started");
    }

    fn stop_locked(&self, state: &mut EngineState) {
        if !state.running {
            return;
        }

        for timer in state.timers.values_mut() {
            timer.cancel();
        }
        state.running = false;
        state.paused = false;
        self.ctx.generation.fetch_add(1, Ordering::SeqCst);
        tracing::info!("Polling stopped");
    }

    fn schedule(&self, timer: &mut ResourceTimer, first_delay: Duration) {
        timer.cancel();

        let cancel = CancellationToken::new();
        let next_tick = Arc::new(Mutex::new(None));

        tokio::spawn(run_timer(
            self.ctx.clone(),
            TimerParams {
                resource: timer.resource,
                interval: timer.interval,
                first_delay,
                generation: self.ctx.generation.load(Ordering::SeqCst),
            },
            Arc::clone(&timer.gate),
            cancel.clone(),
            Arc::clone(&next_tick),
        ));

        timer.handle = Some(TimerHandle { cancel, next_tick });
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        lock_ignoring_poison(&self.state)
    }
}

fn lock_ignoring_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct TimerParams {
    resource: Resource,
    interval: Duration,
    first_delay: Duration,
    generation: u64,
}

async fn run_timer(
    ctx: TickContext,
    params: TimerParams,
    gate: Arc<TickGate>,
    cancel: CancellationToken,
    next_tick: Arc<Mutex<Option<Instant>>>,
) {
    let TimerParams {
        resource,
        interval,
        first_delay,
        generation,
    } = params;
    let mut delay = first_delay;

    loop {
        if !delay.is_zero() {
            let deadline = Instant::now() + delay;
            *lock_ignoring_poison(&next_tick) = Some(deadline);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep_until(deadline) => {}
            }
        }

        let _guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            guard = gate.lock.lock() => guard,
        };
        if cancel.is_cancelled() {
            break;
        }

        *lock_ignoring_poison(&next_tick) = None;
        ctx.tick(resource, &gate, generation).await;

        if cancel.is_cancelled() {
            break;
        }
        delay = interval;
    }

    tracing::trace!(%resource, "Timer handle finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;

    fn intervals() -> IntervalSettings {
        IntervalSettings {
            distros: 5_000,
            resource_usage: 10_000,
            health: 30_000,
        }
    }

    fn engine(backend: &MockBackend) -> PollingEngine {
        PollingEngine::new(Arc::new(backend.clone()), DistroStore::new(), intervals())
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        settle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_waits_one_interval_per_resource() {
        let backend = MockBackend::new();
        let engine = engine(&backend);
        engine.start();
        assert!(engine.is_running());

        advance(4_999).await;
        assert_eq!(backend.calls(Resource::Distros), 0);

        advance(2).await;
        assert_eq!(backend.calls(Resource::Distros), 1);
        assert_eq!(backend.calls(Resource::ResourceUsage), 0);

        advance(5_000).await;
        assert_eq!(backend.calls(Resource::Distros), 2);
        assert_eq!(backend.calls(Resource::ResourceUsage), 1);
        assert_eq!(backend.calls(Resource::Health), 0);

        assert_eq!(engine.store().distros().await.len(), 1);
        assert_eq!(engine.store().all_usage().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent_and_stop_leaks_no_timers() {
        let backend = MockBackend::new();
        let engine = engine(&backend);

        engine.start();
        engine.start();
        engine.stop();
        engine.stop();
        assert!(!engine.is_running());
        assert!(!engine.has_timer(Resource::Distros));

        engine.start();
        advance(5_001).await;
        assert_eq!(backend.calls(Resource::Distros), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_then_resume_ticks_immediately_then_keeps_cadence() {
        let backend = MockBackend::new();
        let engine = engine(&backend);
        engine.start();

        advance(5_001).await;
        assert_eq!(backend.calls(Resource::Distros), 1);

        engine.pause();
        assert!(engine.is_paused());
        assert!(!engine.has_timer(Resource::Distros));

        advance(60_000).await;
        assert_eq!(backend.calls(Resource::Distros), 1);
        assert_eq!(backend.calls(Resource::Health), 0);

        engine.resume();
        settle().await;
        assert!(!engine.is_paused());
        assert_eq!(backend.calls(Resource::Distros), 2);
        assert_eq!(backend.calls(Resource::ResourceUsage), 1);
        assert_eq!(backend.calls(Resource::Health), 1);

        advance(4_999).await;
        assert_eq!(backend.calls(Resource::Distros), 2);
        advance(2).await;
        assert_eq!(backend.calls(Resource::Distros), 3);

        advance(5_000).await;
        assert_eq!(backend.calls(Resource::Distros), 4);
        assert_eq!(backend.calls(Resource::ResourceUsage), 2);
        assert_eq!(engine.interval(Resource::Health), Some(Duration::from_secs(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_pause_needs_single_resume() {
        let backend = MockBackend::new();
        let engine = engine(&backend);
        engine.start();

        engine.pause();
        engine.pause();
        assert!(engine.is_paused());
        assert!(engine.is_running());
        assert_eq!(engine.intervals(), intervals());

        engine.resume();
        settle().await;
        assert!(!engine.is_paused());
        assert_eq!(backend.calls(Resource::Distros), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_when_not_paused_is_noop() {
        let backend = MockBackend::new();
        let engine = engine(&backend);

        engine.resume();
        settle().await;
        assert!(!engine.is_running());

        engine.start();
        settle().await;
        let before = engine.next_tick_at(Resource::Distros);
        assert!(before.is_some());

        engine.resume();
        settle().await;
        assert_eq!(engine.next_tick_at(Resource::Distros), before);
        assert_eq!(backend.calls(Resource::Distros), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_when_stopped_is_noop() {
        let backend = MockBackend::new();
        let engine = engine(&backend);
        engine.pause();
        assert!(!engine.is_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_interval_leaves_other_timers_alone() {
        let backend = MockBackend::new();
        let engine = engine(&backend);
        engine.start();
        advance(1_000).await;

        let usage_next = engine.next_tick_at(Resource::ResourceUsage);
        let health_next = engine.next_tick_at(Resource::Health);
        assert!(usage_next.is_some());

        assert_eq!(engine.update_interval(Resource::Distros, 2_000), Ok(true));
        settle().await;

        assert_eq!(engine.next_tick_at(Resource::ResourceUsage), usage_next);
        assert_eq!(engine.next_tick_at(Resource::Health), health_next);
        assert_eq!(
            engine.next_tick_at(Resource::Distros),
            Some(Instant::now() + Duration::from_millis(2_000))
        );

        advance(2_001).await;
        assert_eq!(backend.calls(Resource::Distros), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_interval_validation_and_noop() {
        let backend = MockBackend::new();
        let engine = engine(&backend);
        engine.start();
        settle().await;

        assert_eq!(
            engine.update_interval(Resource::Health, 0),
            Err(EngineError::InvalidInterval {
                resource: Resource::Health,
                ms: 0
            })
        );
        assert_eq!(engine.interval(Resource::Health), Some(Duration::from_secs(30)));

        let before = engine.next_tick_at(Resource::Health);
        advance(100).await;
        assert_eq!(engine.update_interval(Resource::Health, 30_000), Ok(false));
        settle().await;
        assert_eq!(engine.next_tick_at(Resource::Health), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_interval_while_paused_applies_on_resume() {
        let backend = MockBackend::new();
        let engine = engine(&backend);
        engine.start();
        engine.pause();

        assert_eq!(engine.update_interval(Resource::Distros, 1_000), Ok(true));
        assert!(!engine.has_timer(Resource::Distros));

        engine.resume();
        settle().await;
        assert_eq!(backend.calls(Resource::Distros), 1);

        advance(1_001).await;
        assert_eq!(backend.calls(Resource::Distros), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_overlapping_ticks_across_pause_resume() {
        let backend = MockBackend::new();
        backend.hold(Resource::Distros);
        let engine = engine(&backend);
        engine.start();

        advance(5_001).await;
        assert!(engine.is_in_flight(Resource::Distros));

        engine.pause();
        engine.resume();
        settle().await;

        // The resumed handle waits for the in-flight tick.
        assert_eq!(backend.calls(Resource::Distros), 1);

        backend.release(Resource::Distros);
        settle().await;
        assert_eq!(backend.completed(Resource::Distros), 1);
        assert_eq!(backend.calls(Resource::Distros), 2);

        backend.release(Resource::Distros);
        settle().await;
        assert_eq!(backend.completed(Resource::Distros), 2);
        assert!(!engine.is_in_flight(Resource::Distros));
        assert_eq!(backend.max_concurrent(Resource::Distros), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_fetch_delays_next_tick() {
        let backend = MockBackend::new();
        backend.hold(Resource::Distros);
        let engine = engine(&backend);
        engine.start();

        advance(5_001).await;
        advance(20_000).await;
        assert_eq!(backend.calls(Resource::Distros), 1);

        backend.release(Resource::Distros);
        settle().await;
        advance(4_999).await;
        assert_eq!(backend.calls(Resource::Distros), 1);
        advance(2).await;
        assert_eq!(backend.calls(Resource::Distros), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_change_does_not_disturb_in_flight_fetch() {
        let backend = MockBackend::new();
        backend.hold(Resource::Distros);
        let engine = engine(&backend);
        engine.start();

        advance(5_001).await;
        assert!(engine.is_in_flight(Resource::Distros));

        assert_eq!(engine.update_interval(Resource::Health, 60_000), Ok(true));
        settle().await;
        assert_eq!(
            engine.next_tick_at(Resource::Health),
            Some(Instant::now() + Duration::from_millis(60_000))
        );
        assert!(engine.is_in_flight(Resource::Distros));

        backend.release(Resource::Distros);
        settle().await;
        assert_eq!(backend.completed(Resource::Distros), 1);
        assert_eq!(engine.store().distros().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_failure_keeps_state_and_cadence() {
        let backend = MockBackend::new();
        let engine = engine(&backend);
        engine.start();

        advance(10_001).await;
        assert_eq!(backend.calls(Resource::ResourceUsage), 1);
        assert!(engine.store().usage("Ubuntu").await.is_some());

        backend.set_failing(Resource::ResourceUsage, true);
        advance(10_000).await;
        assert_eq!(backend.calls(Resource::ResourceUsage), 2);
        assert!(engine.store().usage("Ubuntu").await.is_some());
        assert!(engine
            .store()
            .last_error(Resource::ResourceUsage)
            .await
            .is_some());
        assert!(engine.is_running());

        advance(10_000).await;
        assert_eq!(backend.calls(Resource::ResourceUsage), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_after_stop_is_dropped() {
        let backend = MockBackend::new();
        backend.hold(Resource::Distros);
        let engine = engine(&backend);
        engine.start();

        advance(5_001).await;
        engine.stop();
        backend.release(Resource::Distros);
        settle().await;

        assert_eq!(backend.completed(Resource::Distros), 1);
        assert!(engine.store().distros().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_after_pause_is_applied() {
        let backend = MockBackend::new();
        backend.hold(Resource::Distros);
        let engine = engine(&backend);
        engine.start();

        advance(5_001).await;
        engine.pause();
        backend.release(Resource::Distros);
        settle().await;

        assert_eq!(engine.store().distros().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_global_enabled_tracks_running() {
        let backend = MockBackend::new();
        let engine = engine(&backend);

        engine.set_global_enabled(true);
        assert!(engine.is_running());
        assert!(engine.is_enabled());
        engine.set_global_enabled(true);
        assert!(engine.is_running());

        engine.set_global_enabled(false);
        assert!(!engine.is_running());
        assert!(!engine.is_enabled());

        advance(60_000).await;
        assert_eq!(backend.calls(Resource::Distros), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_runs_out_of_band() {
        let backend = MockBackend::new();
        let engine = engine(&backend);

        assert!(engine.refresh(Resource::Health).await);
        assert_eq!(backend.calls(Resource::Health), 1);
        assert!(engine.store().health().await.is_some());

        backend.set_failing(Resource::Distros, true);
        assert!(!engine.refresh(Resource::Distros).await);

        engine.refresh_all().await;
        assert_eq!(backend.calls(Resource::Health), 2);
        assert_eq!(backend.calls(Resource::ResourceUsage), 1);
    }
}
