#[cfg(test)]
pub mod mock;
mod wsl;

use crate::core::models::{Distro, HealthInfo, Resource, ResourcePayload, ResourceUsage};
use anyhow::Result;
use async_trait::async_trait;

pub use wsl::WslBackend;

/// The host-side collaborator the polling engine fetches from.
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;
    async fn list_distros(&self) -> Result<Vec<Distro>>;
    async fn resource_usage(&self) -> Result<Vec<ResourceUsage>>;
    async fn health(&self) -> Result<HealthInfo>;

    /// Cheap probe used to decide when the backend is ready to be queried.
    async fn is_ready(&self) -> bool {
        true
    }

    async fn fetch(&self, resource: Resource) -> Result<ResourcePayload> {
        match resource {
            Resource::Distros => self.list_distros().await.map(ResourcePayload::Distros),
            Resource::ResourceUsage => self
                .resource_usage()
                .await
                .map(ResourcePayload::ResourceUsage),
            Resource::Health => self.health().await.map(ResourcePayload::Health),
        }
    }
}
