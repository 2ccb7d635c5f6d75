use anyhow::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// A validation error in the configuration
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]: {}", self.field, self.message)
    }
}

pub const DEFAULT_BASE_URL: &str = "http://localhost:5000/api";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

/// Backend API endpoint settings
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

/// Blockchain event polling settings
#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
        }
    }
}

/// Session persistence settings
#[derive(Debug, Clone, Deserialize, Default)]
pub struct StorageConfig {
    /// Overrides ~/.txdash/session.json
    #[serde(default)]
    pub session_file: Option<PathBuf>,
}

/// Activity log settings
#[derive(Debug, Clone, Deserialize)]
pub struct ActivityConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Overrides ~/.txdash/activity/
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub activity: ActivityConfig,
}

impl Config {
    /// Load configuration from default paths
    /// Priority: project (./.txdash/config.toml) > user (~/.txdash/config.toml)
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".txdash").join("config.toml");
            if user_config.exists() {
                let user = Self::load_from(&user_config)?;
                config.merge(user);
            }
        }

        let project_config = Path::new(".txdash").join("config.toml");
        if project_config.exists() {
            let project = Self::load_from(&project_config)?;
            config.merge(project);
        }

        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Merge another config into this one (other takes priority).
    /// Scalars are overridden when they differ from the defaults; optional
    /// paths are overridden when set.
    pub fn merge(&mut self, other: Config) {
        if other.api.base_url != default_base_url() {
            self.api.base_url = other.api.base_url;
        }
        if other.watch.poll_interval_secs != default_poll_interval() {
            self.watch.poll_interval_secs = other.watch.poll_interval_secs;
        }
        if other.storage.session_file.is_some() {
            self.storage.session_file = other.storage.session_file;
        }
        if !other.activity.enabled {
            self.activity.enabled = false;
        }
        if other.activity.dir.is_some() {
            self.activity.dir = other.activity.dir;
        }
    }

    /// Resolve the session file path
    pub fn session_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.storage.session_file {
            return Some(path.clone());
        }
        dirs::home_dir().map(|home| home.join(".txdash").join("session.json"))
    }

    /// Resolve the activity log directory
    pub fn activity_dir(&self) -> Option<PathBuf> {
        if let Some(dir) = &self.activity.dir {
            return Some(dir.clone());
        }
        dirs::home_dir().map(|home| home.join(".txdash").join("activity"))
    }

    /// Validate configuration and return any errors found
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://") {
            errors.push(ValidationError {
                field: "api.base_url".to_string(),
                message: format!("Must be an http(s) URL, got '{}'", self.api.base_url),
            });
        }

        if self.watch.poll_interval_secs == 0 {
            errors.push(ValidationError {
                field: "watch.poll_interval_secs".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
