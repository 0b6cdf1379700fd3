use crate::constants::{CONFIG_PATH_ENV, PRODUCT_NAME};
use crate::upgrade::config::UpdateConfig;
use crate::utils::fs::atomic_write;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::fs;
use tracing::debug;

/// Persistent storage for [`UpdateConfig`].
///
/// Implementations must make `save` followed by `load` return an equal value,
/// and repeated saves of the same value must be harmless.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Reads the configuration, returning defaults if nothing was stored yet.
    async fn load(&self) -> Result<UpdateConfig>;

    /// Persists the configuration.
    async fn save(&self, config: &UpdateConfig) -> Result<()>;
}

/// JSON file-backed configuration store.
#[derive(Debug, Clone)]
pub struct JsonConfigStore {
    path: PathBuf,
}

impl JsonConfigStore {
    /// Creates a store for the file at `path`. The file need not exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Default configuration path, honoring `DELTA_UPDATE_CONFIG`.
    pub fn default_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV)
            && !path.is_empty()
        {
            return Ok(PathBuf::from(path));
        }

        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Unable to determine configuration directory"))?;

        Ok(config_dir.join(PRODUCT_NAME).join("update.json"))
    }
}

#[async_trait]
impl ConfigStore for JsonConfigStore {
    async fn load(&self) -> Result<UpdateConfig> {
        if !self.path.exists() {
            debug!("No update config at {}, using defaults", self.path.display());
            return Ok(UpdateConfig::default());
        }

        let content = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read update config from {}", self.path.display()))?;

        if content.trim().is_empty() {
            return Ok(UpdateConfig::default());
        }

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse update config from {}", self.path.display()))
    }

    async fn save(&self, config: &UpdateConfig) -> Result<()> {
        let content =
            serde_json::to_vec_pretty(config).context("Failed to serialize update config")?;
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || atomic_write(&path, &content))
            .await
            .context("Config write task panicked")?
            .with_context(|| format!("Failed to write update config to {}", self.path.display()))?;

        debug!("Saved update config to {}", self.path.display());
        Ok(())
    }
}

/// In-memory configuration store.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    config: Mutex<UpdateConfig>,
}

impl MemoryConfigStore {
    /// Creates a store holding `config`.
    #[must_use]
    pub fn new(config: UpdateConfig) -> Self {
        Self {
            config: Mutex::new(config),
        }
    }

    /// Current stored value.
    #[must_use]
    pub fn snapshot(&self) -> UpdateConfig {
        self.config.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn load(&self) -> Result<UpdateConfig> {
        Ok(self.snapshot())
    }

    async fn save(&self, config: &UpdateConfig) -> Result<()> {
        let mut guard =
            self.config.lock().map_err(|_| anyhow::anyhow!("config store lock poisoned"))?;
        *guard = config.clone();
        Ok(())
    }
}
