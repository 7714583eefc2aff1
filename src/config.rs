use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::store::LockBudget;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub process: ProcessConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// State root holding `workspaces/` and `logs/`
    #[serde(default = "default_state_dir")]
    pub state: String,
}

fn default_state_dir() -> String {
    "~/.conductor".to_string()
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state: default_state_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Seconds between the polite signal and the forceful kill
    #[serde(default = "default_graceful_wait")]
    pub graceful_wait_secs: u64,
}

fn default_graceful_wait() -> u64 {
    5
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            graceful_wait_secs: default_graceful_wait(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Lock-contention retries before failing `locked`
    #[serde(default = "default_lock_retry_max")]
    pub lock_retry_max: usize,
    /// Delay between lock retries in milliseconds
    #[serde(default = "default_lock_retry_delay_ms")]
    pub lock_retry_delay_ms: u64,
}

fn default_lock_retry_max() -> usize {
    20
}

fn default_lock_retry_delay_ms() -> u64 {
    50
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_retry_max: default_lock_retry_max(),
            lock_retry_delay_ms: default_lock_retry_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Validation retry cap used when the configured handler does not
    /// override it
    #[serde(default = "default_max_validation_attempts")]
    pub max_validation_attempts: u32,
}

fn default_max_validation_attempts() -> u32 {
    3
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_validation_attempts: default_max_validation_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Write logs to `<state>/logs/` instead of stderr
    #[serde(default)]
    pub to_file: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            to_file: false,
        }
    }
}

impl EngineConfig {
    /// Path of the user-level config file
    fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("conductor").join("config.toml"))
    }

    /// Load configuration layered from embedded defaults, the user config
    /// file, an explicit file, and `CONDUCTOR__`-prefixed environment
    /// variables.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        // Start with embedded defaults so the engine works without any file
        let defaults = EngineConfig::default();
        let defaults_json =
            serde_json::to_string(&defaults).context("Failed to serialize default config")?;

        let mut builder = config::Config::builder().add_source(config::File::from_str(
            &defaults_json,
            config::FileFormat::Json,
        ));

        if let Some(user_config) = Self::user_config_path() {
            if user_config.exists() {
                builder = builder.add_source(config::File::from(user_config));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("CONDUCTOR")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to load configuration")?;
        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Save config to the user config file
    pub fn save(&self) -> Result<()> {
        let config_path = Self::user_config_path()
            .context("No user config directory available on this platform")?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create conductor config directory")?;
        }

        let toml_str =
            toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;
        std::fs::write(&config_path, toml_str).context("Failed to write config file")?;
        Ok(())
    }

    /// Absolute state root, `~` expanded
    pub fn state_path(&self) -> PathBuf {
        expand_tilde(&self.paths.state)
    }

    /// Directory for engine log files
    pub fn logs_path(&self) -> PathBuf {
        self.state_path().join("logs")
    }

    pub fn graceful_wait(&self) -> Duration {
        Duration::from_secs(self.process.graceful_wait_secs)
    }

    pub fn lock_budget(&self) -> LockBudget {
        LockBudget {
            max_retries: self.store.lock_retry_max,
            retry_delay: Duration::from_millis(self.store.lock_retry_delay_ms),
        }
    }
}

/// Expand ~ to home directory in a path
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}
