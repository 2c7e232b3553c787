//! Configuration management for Parley gateway
//!
//! Precedence: built-in defaults, then the TOML file, then environment
//! variables.

pub mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::chat::ReplySettings;
use crate::context::CompactionConfig;
use crate::providers::openai::DEFAULT_BASE_URL;
use crate::{Error, Result};

pub use file::{ParleyConfigFile, config_file_path, load_config_file};

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 5000;

/// Models a conversation may use unless configured otherwise
pub const DEFAULT_ALLOWED_MODELS: &[&str] = &["gpt-3.5-turbo", "gpt-4"];

/// Model for new conversations unless configured otherwise
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// Parley gateway configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to data directory (database, model cache)
    pub data_dir: PathBuf,

    /// `SQLite` database file
    pub database_path: PathBuf,

    /// HTTP API server configuration
    pub api_server: ApiServerConfig,

    /// `OpenAI` API access
    pub openai: OpenAiConfig,

    /// Parameters for reply completions
    pub reply: ReplySettings,

    /// History compaction policy
    pub compaction: CompactionConfig,

    /// Model catalog and selection
    pub models: ModelsConfig,
}

/// HTTP API server configuration
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Port to listen on
    pub port: u16,

    /// Path to static files directory (web UI)
    pub static_dir: Option<PathBuf>,
}

/// `OpenAI` API access
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// API key (from `OPENAI_API_KEY`)
    pub api_key: Option<SecretString>,

    /// API root, e.g. `https://api.openai.com/v1`
    pub base_url: Url,

    /// Per-request timeout
    pub timeout: Duration,
}

/// Model catalog and per-conversation model selection
#[derive(Debug, Clone)]
pub struct ModelsConfig {
    /// Model assigned to new conversations
    pub default_model: String,

    /// Models a conversation may be switched to
    pub allowed: Vec<String>,

    /// JSON file holding the last fetched model list
    pub cache_path: PathBuf,

    /// Age after which the model list is refetched
    pub refresh_after: Duration,

    /// How often the background task checks staleness
    pub check_interval: Duration,
}

impl ModelsConfig {
    /// Whether a conversation may switch to `model`
    #[must_use]
    pub fn is_allowed(&self, model: &str) -> bool {
        self.allowed.iter().any(|m| m == model)
    }
}

impl Config {
    /// Load configuration from the config file and process environment
    ///
    /// # Errors
    ///
    /// Returns error if an explicit config file is unreadable or any
    /// setting is invalid
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let file = load_config_file(config_path)?;
        Self::from_sources(file, |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if any setting is invalid
    pub fn from_sources<F>(file: ParleyConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse_env = |key: &str| -> Result<Option<u64>> {
            env(key)
                .map(|v| {
                    v.trim()
                        .parse()
                        .map_err(|_| Error::Config(format!("{key} must be a number, got {v:?}")))
                })
                .transpose()
        };

        // Data directory (~/.local/share/parley on Linux)
        let data_dir = env("PARLEY_DATA_DIR")
            .map(PathBuf::from)
            .or(file.data_dir)
            .unwrap_or_else(default_data_dir);

        let database_path = env("PARLEY_DB_PATH")
            .map(PathBuf::from)
            .or(file.database.path)
            .unwrap_or_else(|| data_dir.join("parley.db"));

        let port = match env("PARLEY_PORT").or_else(|| env("PORT")) {
            Some(v) => v
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("invalid port {v:?}")))?,
            None => file.server.port.unwrap_or(DEFAULT_PORT),
        };

        let api_server = ApiServerConfig {
            port,
            static_dir: env("PARLEY_STATIC_DIR")
                .map(PathBuf::from)
                .or(file.server.static_dir),
        };

        let base_url = env("OPENAI_BASE_URL")
            .or(file.openai.base_url)
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base_url = Url::parse(&base_url)
            .map_err(|e| Error::Config(format!("invalid OpenAI base URL {base_url:?}: {e}")))?;

        let timeout_secs = parse_env("PARLEY_REQUEST_TIMEOUT_SECS")?
            .or(file.openai.timeout_secs)
            .unwrap_or(120);

        let openai = OpenAiConfig {
            api_key: env("OPENAI_API_KEY")
                .or(file.openai.api_key)
                .filter(|k| !k.trim().is_empty())
                .map(SecretString::from),
            base_url,
            timeout: Duration::from_secs(timeout_secs),
        };

        let defaults = ReplySettings::default();
        let reply = ReplySettings {
            max_tokens: parse_env("PARLEY_MAX_OUTPUT_TOKENS")?
                .map(u32::try_from)
                .transpose()
                .map_err(|_| Error::Config("PARLEY_MAX_OUTPUT_TOKENS out of range".to_string()))?
                .or(file.openai.max_tokens)
                .unwrap_or(defaults.max_tokens),
            temperature: file.openai.temperature.unwrap_or(defaults.temperature),
        };

        let defaults = CompactionConfig::default();
        let compaction = CompactionConfig {
            threshold_tokens: parse_env("PARLEY_COMPACT_THRESHOLD")?
                .map(usize::try_from)
                .transpose()
                .map_err(|_| Error::Config("PARLEY_COMPACT_THRESHOLD out of range".to_string()))?
                .or(file.compaction.threshold_tokens)
                .unwrap_or(defaults.threshold_tokens),
            summary_model: env("PARLEY_SUMMARY_MODEL")
                .or(file.compaction.summary_model)
                .unwrap_or(defaults.summary_model),
            summary_max_tokens: file
                .compaction
                .summary_max_tokens
                .unwrap_or(defaults.summary_max_tokens),
            summary_temperature: defaults.summary_temperature,
        };

        let allowed = env("PARLEY_ALLOWED_MODELS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .map(String::from)
                    .collect()
            })
            .or(file.models.allowed)
            .unwrap_or_else(|| DEFAULT_ALLOWED_MODELS.iter().map(ToString::to_string).collect());

        let refresh_secs = file
            .models
            .refresh_days
            .unwrap_or(14)
            .checked_mul(24 * 60 * 60)
            .ok_or_else(|| Error::Config("models.refresh_days is too large".to_string()))?;
        let models = ModelsConfig {
            default_model: env("PARLEY_DEFAULT_MODEL")
                .or(file.models.default)
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            allowed,
            cache_path: env("PARLEY_MODELS_CACHE")
                .map(PathBuf::from)
                .or(file.models.cache_path)
                .unwrap_or_else(|| data_dir.join("models_cache.json")),
            refresh_after: Duration::from_secs(refresh_secs),
            check_interval: Duration::from_secs(
                file.models.check_interval_secs.unwrap_or(6 * 60 * 60),
            ),
        };

        let config = Self {
            data_dir,
            database_path,
            api_server,
            openai,
            reply,
            compaction,
            models,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.models.allowed.is_empty() {
            return Err(Error::Config("at least one allowed model is required".to_string()));
        }
        if !self.models.is_allowed(&self.models.default_model) {
            return Err(Error::Config(format!(
                "default model {:?} is not in the allowed list",
                self.models.default_model
            )));
        }
        if self.models.check_interval.is_zero() {
            return Err(Error::Config("model check interval must be positive".to_string()));
        }
        Ok(())
    }
}

/// Platform data directory, falling back to the working directory
fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "omni", "parley")
        .map_or_else(|| PathBuf::from("."), |d| d.data_dir().to_path_buf())
}
