use crate::core::models::{Distro, HealthInfo, Resource, ResourcePayload, ResourceUsage};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct StoreInner {
    distros: BTreeMap<String, Distro>,
    usage: BTreeMap<String, ResourceUsage>,
    health: Option<HealthInfo>,
    errors: HashMap<Resource, String>,
    last_success: HashMap<Resource, DateTime<Utc>>,
    revision: u64,
}

/// Last-known-good application state written by polling ticks.
///
/// Entries are keyed by distro name so a tick that returns the same data
/// leaves the store (and its revision) untouched.
#[derive(Clone, Default)]
pub struct DistroStore {
    inner: Arc<RwLock<StoreInner>>,
}

impl DistroStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(StoreInner::default())),
        }
    }

    /// Replaces the state for the payload's resource. Returns whether
    /// anything observable changed.
    pub async fn apply(&self, payload: ResourcePayload) -> bool {
        let mut inner = self.inner.write().await;
        let resource = payload.resource();

        let changed = match payload {
            ResourcePayload::Distros(distros) => {
                let next: BTreeMap<String, Distro> =
                    distros.into_iter().map(|d| (d.name.clone(), d)).collect();
                replace_if_changed(&mut inner.distros, next)
            }
            ResourcePayload::ResourceUsage(usage) => {
                let next: BTreeMap<String, ResourceUsage> =
                    usage.into_iter().map(|u| (u.distro.clone(), u)).collect();
                replace_if_changed(&mut inner.usage, next)
            }
            ResourcePayload::Health(health) => {
                let same = inner
                    .health
                    .as_ref()
                    .is_some_and(|current| current.same_versions(&health));
                // Keep the fresher timestamp either way.
                inner.health = Some(health);
                !same
            }
        };

        inner.errors.remove(&resource);
        inner.last_success.insert(resource, Utc::now());
        if changed {
            inner.revision = inner.revision.wrapping_add(1);
        }
        changed
    }

    /// Records a failed fetch without discarding the previous data.
    pub async fn record_failure(&self, resource: Resource, error: String) {
        self.inner.write().await.errors.insert(resource, error);
    }

    pub async fn distros(&self) -> Vec<Distro> {
        self.inner.read().await.distros.values().cloned().collect()
    }

    #[cfg(test)]
    pub async fn distro(&self, name: &str) -> Option<Distro> {
        self.inner.read().await.distros.get(name).cloned()
    }

    #[cfg(test)]
    pub async fn usage(&self, distro: &str) -> Option<ResourceUsage> {
        self.inner.read().await.usage.get(distro).cloned()
    }

    pub async fn all_usage(&self) -> Vec<ResourceUsage> {
        self.inner.read().await.usage.values().cloned().collect()
    }

    pub async fn health(&self) -> Option<HealthInfo> {
        self.inner.read().await.health.clone()
    }

    pub async fn last_error(&self, resource: Resource) -> Option<String> {
        self.inner.read().await.errors.get(&resource).cloned()
    }

    pub async fn last_success(&self, resource: Resource) -> Option<DateTime<Utc>> {
        self.inner.read().await.last_success.get(&resource).copied()
    }

    pub async fn revision(&self) -> u64 {
        self.inner.read().await.revision
    }
}

fn replace_if_changed<T: PartialEq>(
    current: &mut BTreeMap<String, T>,
    next: BTreeMap<String, T>,
) -> bool {
    if *current == next {
        return false;
    }
    *current = next;
    true
}
