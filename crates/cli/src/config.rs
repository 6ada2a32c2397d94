//! # CLI Configuration
//!
//! Loads the settings for the `storytrack` binary from, in increasing order of
//! precedence:
//!
//! 1. programmatic defaults,
//! 2. an optional `storytrack.yml` (with `${VAR}` substitution),
//! 3. `SUPABASE_URL` / `SUPABASE_ANON_KEY`,
//! 4. `STORYTRACK_`-prefixed variables (e.g. `STORYTRACK_PAGE_SIZE`).

use config::{Config as ConfigBuilder, Environment, File, FileFormat, Map};
use regex::Regex;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use storytrack::geo::{default_stores, Store};
use tracing::info;

pub const DEFAULT_CONFIG_FILE: &str = "storytrack.yml";

#[derive(Debug)]
pub enum ConfigError {
    /// An error from the underlying `config` crate or a malformed file.
    General(String),
    /// A setting needed by the command is absent.
    Missing(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::General(msg) => write!(f, "Configuration error: {msg}"),
            ConfigError::Missing(key) => write!(
                f,
                "'{key}' is not configured. Set it in {DEFAULT_CONFIG_FILE} or the environment."
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::General(err.to_string())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CliConfig {
    /// Project URL of the hosted backend.
    #[serde(default)]
    pub backend_url: String,
    /// Public (anon) API key.
    #[serde(default)]
    pub anon_key: String,
    /// Realtime endpoint. Falls back to `backend_url`.
    #[serde(default)]
    pub realtime_url: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Where local settings such as the theme are kept.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_recommendation_limit")]
    pub recommendation_limit: usize,
    #[serde(default = "default_stores")]
    pub stores: Vec<Store>,
}

fn default_page_size() -> usize {
    12
}

fn default_recommendation_limit() -> usize {
    10
}

fn default_data_dir() -> PathBuf {
    match env::var("HOME") {
        Ok(home) if !home.is_empty() => Path::new(&home).join(".storytrack"),
        _ => PathBuf::from(".storytrack"),
    }
}

impl CliConfig {
    pub fn realtime_url(&self) -> &str {
        self.realtime_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .unwrap_or(&self.backend_url)
    }

    /// The backend URL and key, or an error naming the first one missing.
    pub fn backend(&self) -> Result<(&str, &str), ConfigError> {
        if self.backend_url.trim().is_empty() {
            return Err(ConfigError::Missing("backend_url".to_string()));
        }
        if self.anon_key.trim().is_empty() {
            return Err(ConfigError::Missing("anon_key".to_string()));
        }
        Ok((&self.backend_url, &self.anon_key))
    }
}

/// Reads a file and replaces `${VAR}` with the variable's value (empty when unset).
/// Returns `Ok(None)` when the file does not exist.
fn read_and_substitute(path: &str) -> Result<Option<String>, ConfigError> {
    if !Path::new(path).exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(path)
        .map_err(|e| ConfigError::General(format!("Failed to read config file '{path}': {e}")))?;

    let re = Regex::new(r"\$\{(?P<var>[A-Z0-9_]+)\}")
        .map_err(|e| ConfigError::General(e.to_string()))?;
    let expanded = re.replace_all(&content, |caps: &regex::Captures| {
        env::var(&caps["var"]).unwrap_or_default()
    });

    Ok(Some(expanded.to_string()))
}

/// The backend variables exposed under their conventional names.
fn backend_env() -> Map<String, String> {
    let mut vars = Map::new();
    for (var, key) in [("SUPABASE_URL", "BACKEND_URL"), ("SUPABASE_ANON_KEY", "ANON_KEY")] {
        if let Ok(value) = env::var(var) {
            if !value.is_empty() {
                vars.insert(key.to_string(), value);
            }
        }
    }
    vars
}

/// Loads the configuration. `config_path_override` replaces `./storytrack.yml`;
/// an explicitly named file must exist.
pub fn get_config(config_path_override: Option<&str>) -> Result<CliConfig, ConfigError> {
    let mut builder = ConfigBuilder::builder()
        .set_default("page_size", default_page_size() as i64)?
        .set_default("recommendation_limit", default_recommendation_limit() as i64)?;

    let path = config_path_override.unwrap_or(DEFAULT_CONFIG_FILE);
    match read_and_substitute(path)? {
        Some(content) => {
            info!("Loading configuration from '{path}'.");
            builder = builder.add_source(File::from_str(&content, FileFormat::Yaml));
        }
        None if config_path_override.is_some() => {
            return Err(ConfigError::General(format!(
                "Config file not found at '{path}'."
            )));
        }
        None => {}
    }

    let settings = builder
        .add_source(Environment::default().source(Some(backend_env())))
        .add_source(
            Environment::with_prefix("STORYTRACK")
                .prefix_separator("_")
                .try_parsing(true)
                .separator("__"),
        )
        .build()?;

    let config: CliConfig = settings.try_deserialize()?;
    if config.page_size == 0 {
        return Err(ConfigError::General("page_size must be at least 1".to_string()));
    }
    Ok(config)
}
