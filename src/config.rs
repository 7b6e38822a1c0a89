use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::error::ClientError;
use crate::storage::{FileTokenStore, MemoryTokenStore, TokenStore};

/// Client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub auth: AuthEndpoints,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Paths of the authentication endpoints, relative to the API base URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthEndpoints {
    #[serde(default = "default_login_path")]
    pub login: String,
    #[serde(default = "default_refresh_path")]
    pub refresh: String,
    #[serde(default = "default_verify_path")]
    pub verify: String,
    #[serde(default = "default_logout_path")]
    pub logout: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    #[default]
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_token_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_login_path() -> String {
    "/auth/login".to_string()
}

fn default_refresh_path() -> String {
    "/auth/refresh".to_string()
}

fn default_verify_path() -> String {
    "/auth/verify".to_string()
}

fn default_logout_path() -> String {
    "/auth/logout".to_string()
}

fn default_token_path() -> PathBuf {
    PathBuf::from(".learnlab/session.json")
}

fn default_max_batch_size() -> usize {
    crate::telemetry::MAX_BATCH_SIZE
}

fn default_flush_timeout_ms() -> u64 {
    crate::telemetry::FLUSH_TIMEOUT.as_millis() as u64
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
        }
    }
}

impl Default for AuthEndpoints {
    fn default() -> Self {
        Self {
            login: default_login_path(),
            refresh: default_refresh_path(),
            verify: default_verify_path(),
            logout: default_logout_path(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: default_token_path(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            flush_timeout_ms: default_flush_timeout_ms(),
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl TelemetryConfig {
    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }
}

impl StorageConfig {
    pub fn open(&self) -> Arc<dyn TokenStore> {
        match self.backend {
            StorageBackend::Memory => Arc::new(MemoryTokenStore::new()),
            StorageBackend::File => Arc::new(FileTokenStore::new(self.path.clone())),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ClientError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ClientError::Config(format!("{}: {}", path.as_ref().display(), e))
        })?;
        let config = Self::from_toml(&content)?;
        info!(base_url = %config.api.base_url, "configuration loaded");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ClientError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ClientError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `LEARNLAB_API_URL` and `LEARNLAB_TOKEN_PATH` overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("LEARNLAB_API_URL") {
            self.api.base_url = url;
        }
        if let Ok(path) = std::env::var("LEARNLAB_TOKEN_PATH") {
            self.storage.path = PathBuf::from(path);
        }
        self
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if self.api.base_url.trim().is_empty() {
            return Err(ClientError::Config("api.base_url must not be empty".into()));
        }
        if self.telemetry.max_batch_size == 0 {
            return Err(ClientError::Config(
                "telemetry.max_batch_size must be at least 1".into(),
            ));
        }
        if self.telemetry.flush_timeout_ms == 0 {
            return Err(ClientError::Config(
                "telemetry.flush_timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}
