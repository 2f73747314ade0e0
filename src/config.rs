use crate::error::{self, ConfigError};
use crate::model::TrackedProcess;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "BROWSER_PROFILER_CONFIG";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilerConfig {
    pub default_interval_secs: f64,
    pub tracked: Vec<TrackedProcess>,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            default_interval_secs: 1.0,
            tracked: TrackedProcess::defaults(),
        }
    }
}

pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("browser-profiler")
}

pub fn config_path() -> PathBuf {
    match std::env::var_os(CONFIG_ENV) {
        Some(path) => PathBuf::from(path),
        None => config_dir().join("config.json"),
    }
}

impl ProfilerConfig {
    /// Loads the config from the usual location, falling back to defaults.
    pub fn load() -> Self {
        let path = config_path();
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("ignoring config at {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Like [`load`](Self::load), but a file named by `$BROWSER_PROFILER_CONFIG`
    /// has to exist and parse.
    pub fn load_checked() -> error::Result<Self> {
        let explicit = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        Self::load_checked_from(explicit.as_deref())
    }

    pub fn load_checked_from(explicit: Option<&Path>) -> error::Result<Self> {
        match explicit {
            Some(path) => Ok(Self::load_from(path)?),
            None => Ok(Self::load()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.default_interval_secs.is_finite() || self.default_interval_secs <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "default_interval_secs must be positive, got {}",
                self.default_interval_secs
            )));
        }

        let mut seen = HashSet::new();
        for t in &self.tracked {
            if t.key.is_empty() || !t.key.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(ConfigError::Invalid(format!(
                    "tracked key {:?} must be non-empty alphanumeric",
                    t.key
                )));
            }
            if t.pattern.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "tracked key {:?} has an empty pattern",
                    t.key
                )));
            }
            if !seen.insert(t.key.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate tracked key {:?}", t.key)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProfilerError;
    use tempfile::tempdir;

    #[test]
    fn defaults_track_firefox_and_safari() {
        let config = ProfilerConfig::default();
        assert_eq!(config.default_interval_secs, 1.0);
        let keys: Vec<_> = config.tracked.iter().map(|t| t.key.as_str()).collect();
        assert_eq!(keys, ["ffx", "saf"]);
    }

    #[test]
    fn save_then_load_from_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = ProfilerConfig {
            default_interval_secs: 0.5,
            tracked: vec![TrackedProcess::new("chr", "chrome")],
        };
        config.save_to(&path).unwrap();
        assert_eq!(ProfilerConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn missing_fields_use_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"default_interval_secs": 2.0}"#).unwrap();
        let config = ProfilerConfig::load_from(&path).unwrap();
        assert_eq!(config.default_interval_secs, 2.0);
        assert_eq!(config.tracked, TrackedProcess::defaults());
    }

    #[test]
    fn rejects_duplicate_keys() {
        let config = ProfilerConfig {
            default_interval_secs: 1.0,
            tracked: vec![
                TrackedProcess::new("ffx", "firefox"),
                TrackedProcess::new("ffx", "firefox-bin"),
            ],
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_non_positive_interval() {
        let config = ProfilerConfig {
            default_interval_secs: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn explicit_config_must_parse() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"tracked": [{"key": "", "pattern": "x"}]}"#).unwrap();
        assert!(matches!(
            ProfilerConfig::load_checked_from(Some(path.as_path())),
            Err(ProfilerError::Config(ConfigError::Invalid(_)))
        ));
        assert!(matches!(
            ProfilerConfig::load_checked_from(Some(dir.path().join("missing.json").as_path())),
            Err(ProfilerError::Config(ConfigError::Io(_)))
        ));
    }

    #[test]
    fn malformed_json_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            ProfilerConfig::load_from(&path),
            Err(ConfigError::Json(_))
        ));
    }
}
