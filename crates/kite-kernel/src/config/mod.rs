//! Configuration loading
//!
//! Engine and deployment settings are read from YAML, TOML or JSON files,
//! selected by file extension.
//!
//! ## Features
//!
//! - Environment variable substitution inside files (`${VAR}` and `$VAR`)
//! - Layering of several files, later ones overriding earlier ones
//! - `PREFIX__SECTION__KEY` environment overrides on top of a file

use config::{Config as Cfg, Environment, File};

pub use config::FileFormat;
use regex::Regex;
use serde::de::DeserializeOwned;
use std::path::Path;

/// Environment prefix used by the `kite` binary.
pub const ENV_PREFIX: &str = "KITE";

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parsing error: {0}")]
    Parse(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Detect configuration format from file extension.
///
/// Accepts `.yaml`/`.yml`, `.toml` and `.json`.
pub fn detect_format(path: &str) -> ConfigResult<FileFormat> {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| ConfigError::UnsupportedFormat("No file extension found".to_string()))?;

    match ext.to_lowercase().as_str() {
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        "toml" => Ok(FileFormat::Toml),
        "json" => Ok(FileFormat::Json),
        _ => Err(ConfigError::UnsupportedFormat(ext.to_string())),
    }
}

/// Substitute environment variables in a string.
///
/// `${VAR}` is replaced first, then bare `$VAR`. References to unset
/// variables are left as written.
pub fn substitute_env_vars(content: &str) -> ConfigResult<String> {
    let re_braced = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
        .map_err(|e| ConfigError::Parse(e.to_string()))?;
    let re_simple = Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)\b")
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    let lookup = |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
    };

    let braced = re_braced.replace_all(content, lookup).to_string();
    Ok(re_simple.replace_all(&braced, lookup).to_string())
}

fn deserialize<T: DeserializeOwned>(builder: config::ConfigBuilder<config::builder::DefaultState>) -> ConfigResult<T> {
    let config = builder
        .build()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    config
        .try_deserialize()
        .map_err(|e| ConfigError::Serialization(e.to_string()))
}

fn file_source(path: &str) -> ConfigResult<File<config::FileSourceString, FileFormat>> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    let substituted = substitute_env_vars(&content)?;
    Ok(File::from_str(&substituted, format))
}

/// Load configuration from a file.
///
/// ```rust,ignore
/// use kite_kernel::config::load_config;
///
/// let config: EngineConfig = load_config("kite.toml")?;
/// ```
pub fn load_config<T>(path: &str) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    deserialize(Cfg::builder().add_source(file_source(path)?))
}

/// Load configuration from a string with explicit format.
pub fn from_str<T>(content: &str, format: FileFormat) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    let substituted = substitute_env_vars(content)?;
    deserialize(Cfg::builder().add_source(File::from_str(&substituted, format)))
}

/// Merge several in-memory sources; later sources override earlier ones.
pub fn merge_configs<T>(sources: &[(&str, FileFormat)]) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    let mut builder = Cfg::builder();
    for (content, format) in sources {
        let substituted = substitute_env_vars(content)?;
        builder = builder.add_source(File::from_str(&substituted, *format));
    }
    deserialize(builder)
}

/// Load several files; later files override earlier ones.
pub fn load_merged<T>(paths: &[&str]) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    let mut builder = Cfg::builder();
    for path in paths {
        builder = builder.add_source(file_source(path)?);
    }
    deserialize(builder)
}

/// Load an optional file with `PREFIX__A__B` environment overrides on top.
///
/// Without a file, only the environment is consulted, so `T` should carry
/// serde defaults for every field.
///
/// ```rust,ignore
/// // KITE__POOL__MAX_TOTAL=8 overrides pool.max_total
/// let config: EngineConfig = load_with_env(Some("kite.toml"), "KITE")?;
/// ```
pub fn load_with_env<T>(path: Option<&str>, env_prefix: &str) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    let mut builder = Cfg::builder();
    if let Some(path) = path {
        builder = builder.add_source(file_source(path)?);
    }
    builder = builder.add_source(
        Environment::with_prefix(env_prefix)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );
    deserialize(builder)
}
