use anyhow::{anyhow, bail, Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::lister::{ClassificationPolicy, ListerOptions, DEFAULT_CONCURRENCY};
use crate::repo::AccountKind;
use crate::vanity::TemplateOptions;

/// Main configuration structure for vaingogh
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Refresh behavior of the repository cache
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// Repository discovery settings
    #[serde(default)]
    pub lister: ListerConfig,

    /// Vanity page template settings
    #[serde(default)]
    pub template: TemplateConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ServerConfig {
    /// Vanity import base URL, e.g. "go.example.com" or "example.com/go"
    #[serde(default)]
    pub base_url: String,

    /// Grace period for in-flight requests on shutdown
    pub shutdown_timeout: Option<String>, // "10s"

    /// Deployment environment reported on "/"
    pub environment: Option<String>,
}

/// Watcher configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatcherConfig {
    /// Time between repository list refreshes
    #[serde(default = "default_check_interval")]
    pub check_interval: String, // "1h"
}

/// Repository lister configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ListerConfig {
    /// Maximum concurrent language lookups
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Language a repository must contain
    #[serde(default = "default_language")]
    pub language: String,

    /// Behavior when a single language lookup fails
    #[serde(default)]
    pub on_classification_error: ClassificationPolicy,

    #[serde(default)]
    pub github: GitHubConfig,
}

/// Account kind as written in the configuration file
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccountKindSetting {
    #[default]
    Auto,
    User,
    Organization,
}

impl From<AccountKindSetting> for AccountKind {
    fn from(setting: AccountKindSetting) -> Self {
        match setting {
            AccountKindSetting::Auto => AccountKind::Unknown,
            AccountKindSetting::User => AccountKind::User,
            AccountKindSetting::Organization => AccountKind::Organization,
        }
    }
}

/// GitHub configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct GitHubConfig {
    /// GitHub user or organization whose repositories are served
    #[serde(default)]
    pub username: String,

    /// Whether `username` is a user or an organization ("auto" detects it)
    #[serde(default)]
    pub account_kind: AccountKindSetting,

    /// Personal access token; `${VAR}` references are expanded
    pub token: Option<String>,

    /// API base URL, for GitHub Enterprise
    pub api_url: Option<String>,
}

/// Vanity page template configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TemplateConfig {
    #[serde(default = "default_url_prefix")]
    pub import_url_prefix: String,

    #[serde(default = "default_url_prefix")]
    pub source_url_prefix: String,

    /// Path to a custom handlebars template
    pub html_template: Option<String>,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"

    /// Log format
    #[serde(default = "default_log_format")]
    pub format: String, // "compact" or "full"
}

// Default value functions
fn default_check_interval() -> String {
    "1h".to_string()
}
fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}
fn default_language() -> String {
    crate::classifier::DEFAULT_LANGUAGE.to_string()
}
fn default_url_prefix() -> String {
    "https://github.com".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "compact".to_string()
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            check_interval: default_check_interval(),
        }
    }
}

impl Default for ListerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            language: default_language(),
            on_classification_error: ClassificationPolicy::default(),
            github: GitHubConfig::default(),
        }
    }
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            import_url_prefix: default_url_prefix(),
            source_url_prefix: default_url_prefix(),
            html_template: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Longest accepted duration (100 years); keeps timer deadlines representable.
const MAX_DURATION_SECS: u64 = 100 * 365 * 86400;

/// Parse duration strings like "30s", "30m", "1h", "2d" or raw seconds.
pub fn parse_duration(duration_str: &str) -> Result<Duration> {
    let duration_str = duration_str.trim().to_lowercase();

    let (value, unit_secs, unit) = if let Some(value) = duration_str.strip_suffix('s') {
        (value, 1, "seconds")
    } else if let Some(value) = duration_str.strip_suffix('m') {
        (value, 60, "minutes")
    } else if let Some(value) = duration_str.strip_suffix('h') {
        (value, 3600, "hours")
    } else if let Some(value) = duration_str.strip_suffix('d') {
        (value, 86400, "days")
    } else {
        (
            duration_str.as_str(),
            1,
            "duration format. Use format like '30m', '1h', '2d'",
        )
    };

    let secs = value
        .parse::<u64>()
        .with_context(|| format!("Invalid {} value", unit))?
        .checked_mul(unit_secs)
        .filter(|secs| *secs <= MAX_DURATION_SECS)
        .ok_or_else(|| anyhow!("duration '{}' is out of range", duration_str))?;

    Ok(Duration::from_secs(secs))
}

impl Config {
    /// Candidate configuration files, in lookup order
    pub fn default_config_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("vaingogh.yaml")];
        if let Some(dir) = config_dir() {
            paths.push(dir.join("vaingogh").join("config.yaml"));
        }
        paths.push(PathBuf::from("/etc/vaingogh/config.yaml"));
        paths
    }

    /// Load the first existing default config file, or defaults if none exists
    pub fn load_or_default() -> Result<Self> {
        match Self::default_config_paths().into_iter().find(|p| p.exists()) {
            Some(path) => Self::load(&path),
            None => {
                tracing::info!("No configuration file found, using defaults");
                let mut config = Self::default();
                config.expand_values()?;
                Ok(config)
            }
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config = Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        config.expand_values()?;

        tracing::debug!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Invalid YAML configuration")
    }

    /// Expand environment variables in values that may reference them
    pub fn expand_values(&mut self) -> Result<()> {
        if let Some(token) = &self.lister.github.token {
            // An unset variable leaves the token empty so GITHUB_TOKEN still applies.
            self.lister.github.token = match shellexpand::env(token) {
                Ok(expanded) => Some(expanded.into_owned()),
                Err(e) => {
                    tracing::warn!("Ignoring github token: {}", e);
                    None
                }
            };
        }

        if let Some(path) = &self.template.html_template {
            let expanded =
                shellexpand::full(path).context("Failed to expand html_template path")?;
            self.template.html_template = Some(expanded.into_owned());
        }

        Ok(())
    }

    /// Return an error describing the first invalid setting
    pub fn validate(&self) -> Result<()> {
        let interval = self
            .check_interval()
            .context("Invalid watcher check interval (watcher.check_interval)")?;
        if interval.is_zero() {
            bail!("watcher check interval must be positive (watcher.check_interval)");
        }

        if self.lister.github.username.trim().is_empty() {
            bail!("GitHub username is required (lister.github.username)");
        }
        if self.lister.concurrency == 0 {
            bail!("lister concurrency must be positive (lister.concurrency)");
        }
        if self.lister.language.trim().is_empty() {
            bail!("target language must not be empty (lister.language)");
        }

        if self.base_url().is_empty() {
            bail!("server base URL must not be empty (server.base_url)");
        }
        if let Some(timeout) = &self.server.shutdown_timeout {
            parse_duration(timeout)
                .context("Invalid shutdown timeout (server.shutdown_timeout)")?;
        }

        match self.logging.format.as_str() {
            "compact" | "full" => {}
            other => bail!("unknown log format '{}' (logging.format)", other),
        }

        Ok(())
    }

    pub fn check_interval(&self) -> Result<Duration> {
        parse_duration(&self.watcher.check_interval)
    }

    pub fn shutdown_timeout(&self) -> Result<Option<Duration>> {
        self.server
            .shutdown_timeout
            .as_deref()
            .map(parse_duration)
            .transpose()
    }

    /// Base URL without protocol or surrounding slashes
    pub fn base_url(&self) -> String {
        crate::vanity::strip_protocol(self.server.base_url.trim())
            .trim_matches('/')
            .to_string()
    }

    pub fn lister_options(&self) -> Result<ListerOptions> {
        let github = &self.lister.github;
        let concurrency = NonZeroUsize::new(self.lister.concurrency)
            .ok_or_else(|| anyhow!("lister concurrency must be positive (lister.concurrency)"))?;

        Ok(ListerOptions {
            account: github.username.trim().to_string(),
            account_kind: github.account_kind.into(),
            concurrency,
            language: self.lister.language.clone(),
            policy: self.lister.on_classification_error,
        })
    }

    pub fn template_options(&self) -> Result<TemplateOptions> {
        let html_template = match &self.template.html_template {
            Some(path) => Some(
                std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read HTML template: {}", path))?,
            ),
            None => None,
        };

        Ok(TemplateOptions {
            html_template,
            import_url_prefix: self.template.import_url_prefix.clone(),
            source_url_prefix: self.template.source_url_prefix.clone(),
        })
    }
}
