//! Layered configuration: built-in defaults, then an optional TOML file,
//! then `SITEWATCH_*` environment variables (`__` separates nested keys,
//! e.g. `SITEWATCH_OAUTH__CLIENT_ID`).

use std::path::Path;
use std::path::PathBuf;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::append::WatchWindow;
use crate::auth::OAuthSettings;
use crate::bindings::BindingRules;
use crate::downtime::DowntimeColumns;
use crate::retry::RetryConfig;
use crate::sheets::DEFAULT_API_BASE;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(String),

    #[error("configuration file not found at path: {0}")]
    FileNotFound(PathBuf),

    #[error("failed to encode defaults: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("invalid configuration value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("missing required configuration field: {0}")]
    MissingField(&'static str),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::Load(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// String that never shows up in `Debug` output or logs.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            f.write_str("Secret(<empty>)")
        } else {
            f.write_str("Secret(<redacted>)")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Zero-based header row of downtime tabs.
    pub downtime_header_row: usize,
    /// Zero-based header row of escalation report tabs.
    pub escalation_header_row: usize,
    /// Columns that decide the append row, e.g. `"F,G,H"` or `"F:H"`.
    pub watch_columns: String,
    pub downtime_columns: DowntimeColumns,
    pub bindings: BindingRules,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            downtime_header_row: 0,
            escalation_header_row: 3,
            watch_columns: "F,G,H".to_string(),
            downtime_columns: DowntimeColumns::default(),
            bindings: BindingRules::default(),
        }
    }
}

impl LayoutConfig {
    pub fn watch_window(&self) -> crate::error::Result<WatchWindow> {
        WatchWindow::parse(&self.watch_columns)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SitewatchConfig {
    /// Read-only API key for values/metadata requests.
    pub api_key: Secret,
    pub api_base_url: String,
    pub oauth: OAuthSettings,
    pub retry: RetryConfig,
    pub layout: LayoutConfig,
    /// Pause between consecutive writes of a multi-site append.
    pub write_pacing_ms: u64,
    /// Resolve/verify rounds before an append gives up on conflicts.
    pub append_attempts: u32,
    pub phases_file: Option<PathBuf>,
}

impl Default for SitewatchConfig {
    fn default() -> Self {
        Self {
            api_key: Secret::default(),
            api_base_url: DEFAULT_API_BASE.to_string(),
            oauth: OAuthSettings::default(),
            retry: RetryConfig::default(),
            layout: LayoutConfig::default(),
            write_pacing_ms: 300,
            append_attempts: 3,
            phases_file: None,
        }
    }
}

impl SitewatchConfig {
    pub fn validate(&self) -> Result<()> {
        let invalid = |field, err: crate::error::SheetsError| ConfigError::Invalid {
            field,
            reason: err.to_string(),
        };
        self.layout
            .watch_window()
            .map_err(|e| invalid("layout.watch_columns", e))?;
        self.layout
            .downtime_columns
            .validate()
            .map_err(|e| invalid("layout.downtime_columns", e))?;
        self.layout
            .bindings
            .validate()
            .map_err(|e| invalid("layout.bindings.columns", e))?;
        if self.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid {
                field: "retry.backoff_multiplier",
                reason: "must be at least 1.0".to_string(),
            });
        }
        if self.append_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "append_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        url::Url::parse(&self.api_base_url).map_err(|e| ConfigError::Invalid {
            field: "api_base_url",
            reason: e.to_string(),
        })?;
        Ok(())
    }

    pub fn require_api_key(&self) -> Result<&str> {
        if self.api_key.is_empty() {
            return Err(ConfigError::MissingField("api_key"));
        }
        Ok(self.api_key.expose())
    }
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn load(&self) -> Result<SitewatchConfig> {
        let defaults = serde_json::to_string(&SitewatchConfig::default())?;
        let mut builder =
            Config::builder().add_source(File::from_str(&defaults, config::FileFormat::Json));

        if let Some(path) = &self.config_path {
            if !path.exists() {
                return Err(ConfigError::FileNotFound(path.clone()));
            }
            builder = builder.add_source(File::from(path.as_path()));
        }

        builder = builder.add_source(
            Environment::with_prefix("SITEWATCH")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: SitewatchConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// `./sitewatch.toml`, then `<config dir>/sitewatch/config.toml`.
    pub fn find_config_file() -> Option<PathBuf> {
        let cwd = PathBuf::from("./sitewatch.toml");
        if cwd.exists() {
            return Some(cwd);
        }
        dirs::config_dir()
            .map(|dir| dir.join("sitewatch").join("config.toml"))
            .filter(|path| path.exists())
    }

    pub fn load_default() -> Result<SitewatchConfig> {
        match Self::find_config_file() {
            Some(path) => ConfigLoader::new().with_file(path).load(),
            None => ConfigLoader::new().load(),
        }
    }
}
