use crate::backend::Backend;
use crate::core::models::{Distro, DistroState, HealthInfo, Resource, ResourceUsage};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

#[derive(Default)]
struct MockState {
    calls: HashMap<Resource, usize>,
    completed: HashMap<Resource, usize>,
    active: HashMap<Resource, usize>,
    max_active: HashMap<Resource, usize>,
    failing: HashSet<Resource>,
    held: HashMap<Resource, Arc<Semaphore>>,
}

/// Scriptable backend: counts calls, can fail or hold fetches in flight.
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
    ready: Arc<AtomicBool>,
}

impl MockBackend {
    pub fn new() -> Self {
        let backend = Self::default();
        backend.ready.store(true, Ordering::SeqCst);
        backend
    }

    pub fn calls(&self, resource: Resource) -> usize {
        self.lock().calls.get(&resource).copied().unwrap_or(0)
    }

    pub fn completed(&self, resource: Resource) -> usize {
        self.lock().completed.get(&resource).copied().unwrap_or(0)
    }

    pub fn max_concurrent(&self, resource: Resource) -> usize {
        self.lock().max_active.get(&resource).copied().unwrap_or(0)
    }

    pub fn set_failing(&self, resource: Resource, failing: bool) {
        let mut state = self.lock();
        if failing {
            state.failing.insert(resource);
        } else {
            state.failing.remove(&resource);
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Makes subsequent fetches of `resource` block until [`release`] is called.
    ///
    /// [`release`]: MockBackend::release
    pub fn hold(&self, resource: Resource) {
        self.lock()
            .held
            .insert(resource, Arc::new(Semaphore::new(0)));
    }

    /// Lets one held fetch of `resource` complete.
    pub fn release(&self, resource: Resource) {
        if let Some(gate) = self.lock().held.get(&resource) {
            gate.add_permits(1);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    async fn enter(&self, resource: Resource) -> Result<()> {
        let gate = {
            let mut state = self.lock();
            *state.calls.entry(resource).or_default() += 1;
            let active = state.active.entry(resource).or_default();
            *active += 1;
            let active = *active;
            let max = state.max_active.entry(resource).or_default();
            *max = (*max).max(active);
            state.held.get(&resource).cloned()
        };

        if let Some(gate) = gate {
            gate.acquire().await?.forget();
        }

        let mut state = self.lock();
        *state.active.entry(resource).or_default() -= 1;
        *state.completed.entry(resource).or_default() += 1;
        if state.failing.contains(&resource) {
            anyhow::bail!("simulated {} failure", resource);
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn list_distros(&self) -> Result<Vec<Distro>> {
        self.enter(Resource::Distros).await?;
        Ok(vec![Distro {
            name: "Ubuntu".to_string(),
            state: DistroState::Running,
            version: 2,
            is_default: true,
        }])
    }

    async fn resource_usage(&self) -> Result<Vec<ResourceUsage>> {
        self.enter(Resource::ResourceUsage).await?;
        Ok(vec![ResourceUsage {
            distro: "Ubuntu".to_string(),
            memory_total_bytes: 8 * 1024 * 1024 * 1024,
            memory_used_bytes: 2 * 1024 * 1024 * 1024,
            load_average: [0.1, 0.2, 0.3],
        }])
    }

    async fn health(&self) -> Result<HealthInfo> {
        self.enter(Resource::Health).await?;
        Ok(HealthInfo {
            wsl_version: Some("2.0.9.0".to_string()),
            kernel_version: Some("5.15.133.1-1".to_string()),
            components: BTreeMap::new(),
            checked_at: Utc::now(),
        })
    }

    async fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}
