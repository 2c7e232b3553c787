//! TOML configuration file loading
//!
//! Supports `~/.config/omni/parley/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParleyConfigFile {
    /// Data directory for the database and model cache
    pub data_dir: Option<PathBuf>,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseFileConfig,

    /// `OpenAI` API configuration
    #[serde(default)]
    pub openai: OpenAiFileConfig,

    /// History compaction policy
    #[serde(default)]
    pub compaction: CompactionFileConfig,

    /// Model catalog and selection
    #[serde(default)]
    pub models: ModelsFileConfig,
}

/// Server/runtime configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    pub port: Option<u16>,
    /// Directory of a web UI to serve at `/`
    pub static_dir: Option<PathBuf>,
}

/// Database configuration
#[derive(Debug, Default, Deserialize)]
pub struct DatabaseFileConfig {
    pub path: Option<PathBuf>,
}

/// `OpenAI` configuration
#[derive(Debug, Default, Deserialize)]
pub struct OpenAiFileConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout_secs: Option<u64>,
    /// Output cap for replies
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// Compaction configuration
#[derive(Debug, Default, Deserialize)]
pub struct CompactionFileConfig {
    pub threshold_tokens: Option<usize>,
    pub summary_model: Option<String>,
    pub summary_max_tokens: Option<u32>,
}

/// Model catalog configuration
#[derive(Debug, Default, Deserialize)]
pub struct ModelsFileConfig {
    /// Model for new conversations
    pub default: Option<String>,
    /// Models a conversation may switch to
    pub allowed: Option<Vec<String>>,
    pub cache_path: Option<PathBuf>,
    pub refresh_days: Option<u64>,
    pub check_interval_secs: Option<u64>,
}

/// Load the TOML config file
///
/// An explicit `path` must exist and parse. Without one, the standard
/// path is tried and a missing or broken file falls back to defaults.
///
/// # Errors
///
/// Returns error if an explicit path cannot be read or parsed
pub fn load_config_file(path: Option<&Path>) -> Result<ParleyConfigFile> {
    if let Some(path) = path {
        let content = std::fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), "loaded config file");
        return Ok(config);
    }

    let Some(path) = config_file_path() else {
        return Ok(ParleyConfigFile::default());
    };

    if !path.exists() {
        return Ok(ParleyConfigFile::default());
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                Ok(config)
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                Ok(ParleyConfigFile::default())
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            Ok(ParleyConfigFile::default())
        }
    }
}

/// Return the config file path: `~/.config/omni/parley/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| {
        d.config_dir()
            .join("omni")
            .join("parley")
            .join("config.toml")
    })
}
