//! Configuration module for lmsync.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Environment variable that overrides `canvas.token`.
pub const TOKEN_ENV_VAR: &str = "LMSYNC_TOKEN";

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for lmsync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub canvas: CanvasConfig,
    pub logging: LoggingConfig,
}

/// Synchronization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Root directory for the local course mirror.
    pub root: PathBuf,
    /// File name of the history ledger, stored directly under `root`.
    pub history_file_name: String,
    /// Names of the courses to expand; every other course is listed but skipped.
    pub courses_to_sync: Vec<String>,
    /// Which kinds of course content are discovered.
    pub content: ContentToggles,
}

/// One switch per category of course content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentToggles {
    /// Modules, their files and pages.
    pub modules: bool,
    /// The course file area, mirrored as `Other Files`.
    pub files: bool,
    /// Assignments. Only counts towards [`ContentToggles::any`].
    pub assignments: bool,
}

impl ContentToggles {
    /// `false` when every category is switched off; no course is expanded then.
    pub fn any(&self) -> bool {
        self.modules || self.files || self.assignments
    }
}

/// Canvas API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CanvasConfig {
    /// Base URL of the Canvas instance, e.g. `https://school.instructure.com`.
    pub domain: String,
    /// Personal access token. `LMSYNC_TOKEN` takes precedence.
    pub token: Option<String>,
    /// Retries for read requests that fail transiently.
    pub max_retries: u32,
    /// First backoff delay in milliseconds; doubles on each retry.
    pub retry_base_delay_ms: u64,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Output format: `text` or `json`.
    pub format: String,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/lmsync/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("lmsync")
            .join("config.yaml")
    }

    /// Full path of the history ledger file.
    pub fn history_path(&self) -> PathBuf {
        self.sync.root.join(&self.sync.history_file_name)
    }

    /// Access token from the environment or the file, environment first.
    pub fn resolve_token(&self) -> Option<String> {
        std::env::var(TOKEN_ENV_VAR)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| self.canvas.token.clone().filter(|t| !t.trim().is_empty()))
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            root: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join("Canvas"),
            history_file_name: ".lmsync-history.csv".to_string(),
            courses_to_sync: Vec::new(),
            content: ContentToggles::default(),
        }
    }
}

impl Default for ContentToggles {
    fn default() -> Self {
        Self {
            modules: true,
            files: false,
            assignments: false,
        }
    }
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            domain: "https://canvas.instructure.com".to_string(),
            token: None,
            max_retries: 3,
            retry_base_delay_ms: 1000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"canvas.domain"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Valid values for `logging.format`.
const VALID_LOG_FORMATS: &[&str] = &["text", "json"];

/// Upper bound for `canvas.max_retries`.
const MAX_RETRIES_LIMIT: u32 = 10;

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- sync ---
        if !self.sync.root.is_absolute() {
            errors.push(ValidationError {
                field: "sync.root".into(),
                message: format!("must be an absolute path: {}", self.sync.root.display()),
            });
        }
        let history_name = self.sync.history_file_name.trim();
        if history_name.is_empty() {
            errors.push(ValidationError {
                field: "sync.history_file_name".into(),
                message: "must not be empty".into(),
            });
        } else if history_name.contains('/') || history_name.contains('\\') {
            errors.push(ValidationError {
                field: "sync.history_file_name".into(),
                message: "must be a file name, not a path".into(),
            });
        }
        if self
            .sync
            .courses_to_sync
            .iter()
            .any(|name| name.trim().is_empty())
        {
            errors.push(ValidationError {
                field: "sync.courses_to_sync".into(),
                message: "course names must not be empty".into(),
            });
        }

        // --- canvas ---
        match url::Url::parse(&self.canvas.domain) {
            Ok(url) if url.scheme() == "https" || url.scheme() == "http" => {}
            Ok(url) => errors.push(ValidationError {
                field: "canvas.domain".into(),
                message: format!("unsupported scheme '{}', expected http or https", url.scheme()),
            }),
            Err(e) => errors.push(ValidationError {
                field: "canvas.domain".into(),
                message: format!("not a valid URL: {e}"),
            }),
        }
        if self.canvas.max_retries > MAX_RETRIES_LIMIT {
            errors.push(ValidationError {
                field: "canvas.max_retries".into(),
                message: format!("must be at most {MAX_RETRIES_LIMIT}"),
            });
        }
        if self.canvas.retry_base_delay_ms == 0 {
            errors.push(ValidationError {
                field: "canvas.retry_base_delay_ms".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}', expected one of: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }
        if !VALID_LOG_FORMATS.contains(&self.logging.format.as_str()) {
            errors.push(ValidationError {
                field: "logging.format".into(),
                message: format!(
                    "invalid format '{}', expected one of: {}",
                    self.logging.format,
                    VALID_LOG_FORMATS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Fluent builder for [`Config`], starting from defaults.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Start from [`Config::default`].
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- sync ---

    pub fn sync_root(mut self, root: PathBuf) -> Self {
        self.config.sync.root = root;
        self
    }

    pub fn history_file_name(mut self, name: impl Into<String>) -> Self {
        self.config.sync.history_file_name = name.into();
        self
    }

    pub fn courses_to_sync<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.sync.courses_to_sync = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn content(mut self, modules: bool, files: bool, assignments: bool) -> Self {
        self.config.sync.content = ContentToggles {
            modules,
            files,
            assignments,
        };
        self
    }

    // --- canvas ---

    pub fn canvas_domain(mut self, domain: impl Into<String>) -> Self {
        self.config.canvas.domain = domain.into();
        self
    }

    pub fn canvas_token(mut self, token: impl Into<String>) -> Self {
        self.config.canvas.token = Some(token.into());
        self
    }

    pub fn canvas_max_retries(mut self, n: u32) -> Self {
        self.config.canvas.max_retries = n;
        self
    }

    pub fn canvas_retry_base_delay_ms(mut self, ms: u64) -> Self {
        self.config.canvas.retry_base_delay_ms = ms;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_format(mut self, format: impl Into<String>) -> Self {
        self.config.logging.format = format.into();
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
