//! Error types for the gridcalc binary

use std::path::PathBuf;
use thiserror::Error;

/// Errors from reading the TOML config file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Refusing to read {}: file too large ({size} bytes, max {max})", path.display())]
    TooLarge { path: PathBuf, size: u64, max: u64 },

    #[error("Invalid config value for '{key}': {message}")]
    Invalid { key: &'static str, message: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;
