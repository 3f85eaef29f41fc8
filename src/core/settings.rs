use crate::core::models::Resource;
use anyhow::{Context, Result};
use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub polling: PollingSettings,
    pub backend: BackendSettings,
    pub focus: FocusSettings,
    pub debug: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            polling: PollingSettings::default(),
            backend: BackendSettings::default(),
            focus: FocusSettings::default(),
            debug: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingSettings {
    pub enabled: bool,
    pub intervals: IntervalSettings,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            intervals: IntervalSettings::default(),
        }
    }
}

/// Per-resource polling intervals in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntervalSettings {
    pub distros: u64,
    pub resource_usage: u64,
    pub health: u64,
}

impl Default for IntervalSettings {
    fn default() -> Self {
        Self {
            distros: 5_000,
            resource_usage: 10_000,
            health: 30_000,
        }
    }
}

impl IntervalSettings {
    pub fn get(&self, resource: Resource) -> u64 {
        match resource {
            Resource::Distros => self.distros,
            Resource::ResourceUsage => self.resource_usage,
            Resource::Health => self.health,
        }
    }

    pub fn set(&mut self, resource: Resource, ms: u64) {
        match resource {
            Resource::Distros => self.distros = ms,
            Resource::ResourceUsage => self.resource_usage = ms,
            Resource::Health => self.health = ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    pub command: String,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            command: "wsl.exe".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FocusSourceMode {
    #[default]
    Auto,
    Native,
    Visibility,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FocusSettings {
    pub source: FocusSourceMode,
}

impl Settings {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("distro-sync").join("config.toml"))
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path().context("Could not determine config directory")?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!(?path, "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let settings: Settings = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        settings
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        tracing::info!(?path, "Loaded config");
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        for resource in Resource::ALL {
            if self.polling.intervals.get(resource) == 0 {
                anyhow::bail!(
                    "polling.intervals.{} must be greater than 0",
                    resource.name().replace('-', "_")
                );
            }
        }
        if self.backend.command.trim().is_empty() {
            anyhow::bail!("backend.command must not be empty");
        }
        Ok(())
    }
}

/// Owns the live settings and republishes them whenever the config file
/// changes on disk. Invalid edits are logged and ignored.
pub struct SettingsWatcher {
    path: PathBuf,
    current: Arc<RwLock<Settings>>,
    tx: broadcast::Sender<Settings>,
    _watcher: Option<RecommendedWatcher>,
}

impl SettingsWatcher {
    pub fn new() -> Result<Self> {
        let path = Settings::config_path().context("Could not determine config directory")?;
        Self::with_path(path)
    }

    pub fn with_path(path: PathBuf) -> Result<Self> {
        let settings = Settings::load_from(&path)?;
        let (tx, _) = broadcast::channel(16);

        Ok(Self {
            path,
            current: Arc::new(RwLock::new(settings)),
            tx,
            _watcher: None,
        })
    }

    pub async fn get(&self) -> Settings {
        self.current.read().await.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Settings> {
        self.tx.subscribe()
    }

    /// Re-reads the config file and broadcasts it if it parsed, validated and
    /// differs from the current settings. Returns whether a broadcast happened.
    pub async fn reload(&self) -> bool {
        reload_into(&self.path, &self.current, &self.tx).await
    }

    pub fn start_watching(&mut self) -> Result<()> {
        let Some(dir) = self.path.parent().map(Path::to_path_buf) else {
            anyhow::bail!("Config path has no parent: {}", self.path.display());
        };

        if !dir.exists() {
            tracing::warn!(?dir, "Config directory does not exist, settings will not reload");
            return Ok(());
        }

        let file_name = self.path.file_name().map(|f| f.to_os_string());
        let (notify_tx, mut notify_rx) = mpsc::unbounded_channel::<()>();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| {
                let Ok(event) = res else {
                    return;
                };
                if !(event.kind.is_modify() || event.kind.is_create()) {
                    return;
                }
                let touches_config = event
                    .paths
                    .iter()
                    .any(|p| p.file_name().map(|f| f.to_os_string()) == file_name);
                if touches_config {
                    let _ = notify_tx.send(());
                }
            },
            Config::default(),
        )?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch directory: {}", dir.display()))?;
        tracing::info!(?dir, "Watching config directory");

        let path = self.path.clone();
        let current = Arc::clone(&self.current);
        let tx = self.tx.clone();

        tokio::spawn(async move {
            while notify_rx.recv().await.is_some() {
                // Editors write in bursts; coalesce them into one reload.
                tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;
                while notify_rx.try_recv().is_ok() {}

                reload_into(&path, &current, &tx).await;
            }
        });

        self._watcher = Some(watcher);
        Ok(())
    }
}

async fn reload_into(
    path: &Path,
    current: &RwLock<Settings>,
    tx: &broadcast::Sender<Settings>,
) -> bool {
    let settings = match Settings::load_from(path) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!(error = %format!("{e:#}"), "Ignoring config change");
            return false;
        }
    };

    {
        let mut guard = current.write().await;
        if *guard == settings {
            return false;
        }
        *guard = settings.clone();
    }

    tracing::info!("Settings changed, notifying subscribers");
    let _ = tx.send(settings);
    true
}
