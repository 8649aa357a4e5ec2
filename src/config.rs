//! TOML configuration for playtrail.
//!
//! Layered model: an explicit `--config` path, then the `PLAYTRAIL_CONFIG`
//! environment variable, then `~/.playtrail/playtrail.toml`, then compiled-in
//! defaults. The database path can be overridden independently on the command
//! line or through `PLAYTRAIL_DATABASE`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "PLAYTRAIL_CONFIG";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Resolve the configuration for one invocation.
    ///
    /// An explicit path must load; the fallbacks only warn when broken.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "PLAYTRAIL_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        if let Some(home_path) = home_config_path() {
            if home_path.exists() {
                match Self::load(&home_path) {
                    Ok(cfg) => return Ok(cfg),
                    Err(e) => {
                        warn!(
                            path = %home_path.display(),
                            error = %e,
                            "user config file exists but could not be loaded, using defaults"
                        );
                    }
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }
}

fn home_config_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".playtrail").join("playtrail.toml"))
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file holding the run history.
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let path = std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(".playtrail").join("playtrail.sqlite"))
            .unwrap_or_else(|| PathBuf::from("playtrail.sqlite"));
        Self { path }
    }
}

// ---------------------------------------------------------------------------
// Report generation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Skip the warning raised when a report scope holds no playbooks.
    pub ignore_empty_generation: bool,
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = Config::default();
        assert!(!cfg.report.ignore_empty_generation);
        assert_eq!(cfg.log.level, "warn");
        assert_eq!(cfg.log.format, LogFormat::Text);
        assert!(cfg.database.path.ends_with("playtrail.sqlite"));
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
[database]
path = "/var/lib/playtrail/history.sqlite"

[report]
ignore_empty_generation = true

[log]
level = "debug"
format = "json"
"#;
        let cfg: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.database.path, PathBuf::from("/var/lib/playtrail/history.sqlite"));
        assert!(cfg.report.ignore_empty_generation);
        assert_eq!(cfg.log.level, "debug");
        assert_eq!(cfg.log.format, LogFormat::Json);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let cfg: Config = toml::from_str("[report]\nignore_empty_generation = true\n").unwrap();
        assert!(cfg.report.ignore_empty_generation);
        assert_eq!(cfg.log.level, "warn");
    }

    #[test]
    fn test_explicit_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(Config::resolve(Some(&missing)).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("playtrail.toml");
        std::fs::write(&path, "[database]\npath = \"runs.sqlite\"\n").unwrap();
        let cfg = Config::resolve(Some(&path)).unwrap();
        assert_eq!(cfg.database.path, PathBuf::from("runs.sqlite"));
    }
}
