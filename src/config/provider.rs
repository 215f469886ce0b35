//! Per-cycle configuration sources.
//!
//! Workers read configuration through a [`ConfigProvider`] at the start of
//! every cycle, so edits take effect without restarting the process.

use std::path::{Path, PathBuf};

use tokio::sync::RwLock;

use super::app::AppConfig;
use super::validation::ConfigError;

/// Source of the current [`AppConfig`].
#[async_trait::async_trait]
pub trait ConfigProvider: Send + Sync + 'static {
    /// Load the configuration as it is right now.
    async fn load(&self) -> Result<AppConfig, ConfigError>;
}

/// Re-reads a YAML file on every load.
#[derive(Debug, Clone)]
pub struct FileConfigProvider {
    path: PathBuf,
}

impl FileConfigProvider {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl ConfigProvider for FileConfigProvider {
    async fn load(&self) -> Result<AppConfig, ConfigError> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        AppConfig::from_yaml(&content)
    }
}

/// In-memory configuration, replaceable at runtime.
#[derive(Debug, Default)]
pub struct StaticConfigProvider {
    config: RwLock<AppConfig>,
}

impl StaticConfigProvider {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: RwLock::new(config),
        }
    }

    /// Replace the configuration seen by subsequent loads.
    pub async fn set(&self, config: AppConfig) {
        *self.config.write().await = config;
    }
}

#[async_trait::async_trait]
impl ConfigProvider for StaticConfigProvider {
    async fn load(&self) -> Result<AppConfig, ConfigError> {
        Ok(self.config.read().await.clone())
    }
}
