//! Settings from `gridcalc.toml`.
//!
//! The file lives in the user config dir (`~/.config/gridcalc/` on Linux)
//! unless `--config` names another one. Every key is optional:
//!
//! ```toml
//! workers = 4
//! timeout_secs = 30.0
//! poll_interval_ms = 50
//! functions = ["/home/me/finance.rhai"]
//! usercode = "/home/me/calc.rhai"
//! ```

use crate::error::{ConfigError, Result};
use directories::ProjectDirs;
use gridcalc_engine::engine::RecalcConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const MAX_CONFIG_FILE_BYTES: u64 = 64 * 1024;

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub workers: Option<usize>,
    pub timeout_secs: Option<f64>,
    pub poll_interval_ms: Option<u64>,
    /// Functions files loaded before any given with `-f`.
    pub functions: Vec<PathBuf>,
    /// Script replacing the default calculation steps.
    pub usercode: Option<PathBuf>,
}

fn config_dir() -> Option<PathBuf> {
    let proj = ProjectDirs::from("", "", "gridcalc")?;
    Some(proj.config_dir().to_path_buf())
}

pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("gridcalc.toml"))
}

pub fn default_functions_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("default.rhai"))
}

/// Load the config. An explicit path must exist; the default one may not.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match default_config_path() {
            Some(path) if path.is_file() => path,
            _ => return Ok(Config::default()),
        },
    };

    let meta = std::fs::metadata(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    if meta.len() > MAX_CONFIG_FILE_BYTES {
        return Err(ConfigError::TooLarge {
            path,
            size: meta.len(),
            max: MAX_CONFIG_FILE_BYTES,
        });
    }
    let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    let config = parse_config(&content, &path)?;
    tracing::debug!(path = %path.display(), "loaded config");
    Ok(config)
}

pub fn parse_config(content: &str, path: &Path) -> Result<Config> {
    toml::from_str(content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Recalculation settings from the config, with command-line overrides
/// applied on top.
pub fn recalc_config(
    config: &Config,
    workers: Option<usize>,
    timeout_secs: Option<f64>,
) -> Result<RecalcConfig> {
    let mut recalc = RecalcConfig::default();

    if let Some(workers) = workers.or(config.workers) {
        if workers == 0 {
            return Err(ConfigError::Invalid {
                key: "workers",
                message: "must be at least 1".to_string(),
            });
        }
        recalc.workers = workers;
    }

    if let Some(secs) = timeout_secs.or(config.timeout_secs) {
        recalc.timeout = Some(Duration::try_from_secs_f64(secs).map_err(|e| ConfigError::Invalid {
            key: "timeout_secs",
            message: e.to_string(),
        })?);
    }

    if let Some(ms) = config.poll_interval_ms {
        if ms == 0 {
            return Err(ConfigError::Invalid {
                key: "poll_interval_ms",
                message: "must be at least 1".to_string(),
            });
        }
        recalc.poll_interval = Duration::from_millis(ms);
    }

    Ok(recalc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_paths_are_deterministic() {
        assert_eq!(default_functions_path(), default_functions_path());
        if let Some(path) = default_config_path() {
            assert!(path.ends_with("gridcalc.toml"));
        }
    }

    #[test]
    fn test_parse_full_config() {
        let content = r#"
workers = 4
timeout_secs = 2.5
poll_interval_ms = 20
functions = ["a.rhai", "b.rhai"]
usercode = "calc.rhai"
"#;
        let config = parse_config(content, Path::new("gridcalc.toml")).unwrap();
        assert_eq!(config.workers, Some(4));
        assert_eq!(config.functions, vec![PathBuf::from("a.rhai"), PathBuf::from("b.rhai")]);

        let recalc = recalc_config(&config, None, None).unwrap();
        assert_eq!(recalc.workers, 4);
        assert_eq!(recalc.timeout, Some(Duration::from_millis(2500)));
        assert_eq!(recalc.poll_interval, Duration::from_millis(20));
    }

    #[test]
    fn test_command_line_overrides_config() {
        let config = Config {
            workers: Some(4),
            timeout_secs: Some(10.0),
            ..Config::default()
        };
        let recalc = recalc_config(&config, Some(2), Some(1.0)).unwrap();
        assert_eq!(recalc.workers, 2);
        assert_eq!(recalc.timeout, Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_empty_config_keeps_defaults() {
        let config = parse_config("", Path::new("gridcalc.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(recalc_config(&config, None, None).unwrap(), RecalcConfig::default());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let config = Config::default();
        assert!(matches!(
            recalc_config(&config, Some(0), None),
            Err(ConfigError::Invalid { key: "workers", .. })
        ));
        assert!(matches!(
            recalc_config(&config, None, Some(-1.0)),
            Err(ConfigError::Invalid { key: "timeout_secs", .. })
        ));
        assert!(matches!(
            parse_config("colour = \"red\"", Path::new("gridcalc.toml")),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let path = std::env::temp_dir().join("gridcalc_no_such_config.toml");
        assert!(matches!(load_config(Some(&path)), Err(ConfigError::Io { .. })));
    }
}
