// Application options and their loaders (TOML/JSON files, environment)

use crate::logging::{LogConfig, LogFormat, LogLevel};
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Default request body limit: 1 MiB.
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

/// What happens to hooks a scope adds after it has forked children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookPropagation {
    /// The hook is appended to the scope and every existing descendant.
    #[default]
    Broadcast,
    /// The hook only applies to the scope itself and children forked later.
    Isolated,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid value for '{key}': {value}")]
    InvalidValue { key: String, value: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Toml,
}

impl FileFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "json" => Some(FileFormat::Json),
            "toml" => Some(FileFormat::Toml),
            _ => None,
        }
    }
}

/// Application-wide options.
///
/// ```toml
/// body_limit = 1048576
/// ignore_trailing_slash = true
/// hook_propagation = "isolated"
/// request_id_header = "x-request-id"
///
/// [log]
/// level = "debug"
/// format = "pretty"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppOptions {
    /// Default maximum request body size in bytes.
    pub body_limit: usize,
    /// Register `/path` and `/path/` as the same route.
    pub ignore_trailing_slash: bool,
    pub hook_propagation: HookPropagation,
    /// Header to take request ids from; ids are generated when unset or absent.
    pub request_id_header: Option<String>,
    /// Suppress the per-request "incoming request"/"request completed" lines.
    pub disable_request_logging: bool,
    pub log: LogConfig,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            body_limit: DEFAULT_BODY_LIMIT,
            ignore_trailing_slash: false,
            hook_propagation: HookPropagation::Broadcast,
            request_id_header: None,
            disable_request_logging: false,
            log: LogConfig::default(),
        }
    }
}

impl AppOptions {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(format!("TOML parse error: {}", e)))
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| ConfigError::ParseError(format!("JSON parse error: {}", e)))
    }

    /// Load from a `.toml` or `.json` file, detected by extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .ok_or_else(|| ConfigError::LoadError("No file extension found".to_string()))?;
        let format = FileFormat::from_extension(ext)
            .ok_or_else(|| ConfigError::LoadError(format!("Unsupported format: {}", ext)))?;

        let content = std::fs::read_to_string(path)?;
        match format {
            FileFormat::Json => Self::from_json_str(&content),
            FileFormat::Toml => Self::from_toml_str(&content),
        }
    }

    /// Load from `{PREFIX}_*` environment variables on top of the defaults.
    /// A `.env` file in the working directory is read first when present.
    pub fn from_env(prefix: &str) -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::default().merge_vars(prefix, std::env::vars())
    }

    /// Apply `{PREFIX}_*` variables from `vars` over `self`.
    ///
    /// Recognized keys: `BODY_LIMIT`, `IGNORE_TRAILING_SLASH`,
    /// `HOOK_PROPAGATION`, `REQUEST_ID_HEADER`, `DISABLE_REQUEST_LOGGING`,
    /// `LOG_LEVEL`, `LOG_FORMAT`. Unknown keys are ignored.
    pub fn merge_vars<I>(mut self, prefix: &str, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let prefix = format!("{}_", prefix.trim_end_matches('_').to_uppercase());

        for (key, value) in vars {
            let Some(name) = key.strip_prefix(&prefix) else {
                continue;
            };
            let invalid = || ConfigError::InvalidValue {
                key: key.clone(),
                value: value.clone(),
            };

            match name {
                "BODY_LIMIT" => self.body_limit = value.trim().parse().map_err(|_| invalid())?,
                "IGNORE_TRAILING_SLASH" => {
                    self.ignore_trailing_slash = parse_bool(&value).ok_or_else(invalid)?
                }
                "DISABLE_REQUEST_LOGGING" => {
                    self.disable_request_logging = parse_bool(&value).ok_or_else(invalid)?
                }
                "HOOK_PROPAGATION" => self.hook_propagation = parse_enum(&value).ok_or_else(invalid)?,
                "REQUEST_ID_HEADER" => {
                    let header = value.trim();
                    self.request_id_header = (!header.is_empty()).then(|| header.to_lowercase());
                }
                "LOG_LEVEL" => self.log.level = parse_enum::<LogLevel>(&value).ok_or_else(invalid)?,
                "LOG_FORMAT" => {
                    self.log.format = parse_enum::<LogFormat>(&value).ok_or_else(invalid)?
                }
                _ => {}
            }
        }
        Ok(self)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a lowercase unit enum variant through serde.
fn parse_enum<T: serde::de::DeserializeOwned>(value: &str) -> Option<T> {
    serde_json::from_value(serde_json::Value::String(value.trim().to_lowercase())).ok()
}
