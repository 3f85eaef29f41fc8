use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resource {
    Distros,
    ResourceUsage,
    Health,
}

impl Resource {
    pub const ALL: [Resource; 3] = [Resource::Distros, Resource::ResourceUsage, Resource::Health];

    pub fn name(&self) -> &'static str {
        match self {
            Resource::Distros => "distros",
            Resource::ResourceUsage => "resource-usage",
            Resource::Health => "health",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Resource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "distros" => Ok(Resource::Distros),
            "resource-usage" | "resource_usage" | "usage" => Ok(Resource::ResourceUsage),
            "health" => Ok(Resource::Health),
            other => anyhow::bail!(
                "Unknown resource: {}. Valid resources: distros, resource-usage, health",
                other
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistroState {
    Running,
    Stopped,
    Installing,
    Converting,
    Uninstalling,
    Unknown(String),
}

impl DistroState {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "running" => DistroState::Running,
            "stopped" => DistroState::Stopped,
            "installing" => DistroState::Installing,
            "converting" => DistroState::Converting,
            "uninstalling" => DistroState::Uninstalling,
            _ => DistroState::Unknown(raw.trim().to_string()),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, DistroState::Running)
    }
}

impl fmt::Display for DistroState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistroState::Running => f.write_str("Running"),
            DistroState::Stopped => f.write_str("Stopped"),
            DistroState::Installing => f.write_str("Installing"),
            DistroState::Converting => f.write_str("Converting"),
            DistroState::Uninstalling => f.write_str("Uninstalling"),
            DistroState::Unknown(raw) => f.write_str(raw),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distro {
    pub name: String,
    pub state: DistroState,
    pub version: u8,
    pub is_default: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub distro: String,
    pub memory_total_bytes: u64,
    pub memory_used_bytes: u64,
    pub load_average: [f64; 3],
}

impl ResourceUsage {
    pub fn memory_used_percent(&self) -> f64 {
        if self.memory_total_bytes == 0 {
            return 0.0;
        }
        self.memory_used_bytes as f64 / self.memory_total_bytes as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthInfo {
    pub wsl_version: Option<String>,
    pub kernel_version: Option<String>,
    #[serde(default)]
    pub components: BTreeMap<String, String>,
    pub checked_at: DateTime<Utc>,
}

impl HealthInfo {
    /// Equality ignoring `checked_at`, used to avoid churning the store when
    /// nothing but the timestamp moved.
    pub fn same_versions(&self, other: &HealthInfo) -> bool {
        self.wsl_version == other.wsl_version
            && self.kernel_version == other.kernel_version
            && self.components == other.components
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResourcePayload {
    Distros(Vec<Distro>),
    ResourceUsage(Vec<ResourceUsage>),
    Health(HealthInfo),
}

impl ResourcePayload {
    pub fn resource(&self) -> Resource {
        match self {
            ResourcePayload::Distros(_) => Resource::Distros,
            ResourcePayload::ResourceUsage(_) => Resource::ResourceUsage,
            ResourcePayload::Health(_) => Resource::Health,
        }
    }
}
