use calm_booking::BookingConfig;
use calm_routing::{ClarificationConfig, RouterConfig};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const ENV_EXTERNAL_TIMEOUT_MS: &str = "CALM_EXTERNAL_TIMEOUT_MS";
pub const ENV_HISTORY_WINDOW: &str = "CALM_HISTORY_WINDOW";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub external_timeout_ms: u64,
    pub history_window: usize,
    /// Also bounds the router trace kept in state and responses.
    pub raw_history_limit: usize,
    pub session_cache_limit: usize,
    pub confidence_floor: f32,
    pub default_user_id: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            external_timeout_ms: 4_000,
            history_window: 5,
            raw_history_limit: 10,
            session_cache_limit: crate::session::DEFAULT_SESSION_CACHE_LIMIT,
            confidence_floor: 0.5,
            default_user_id: "default".to_string(),
        }
    }
}

impl RuntimeConfig {
    pub fn external_timeout(&self) -> Duration {
        Duration::from_millis(self.external_timeout_ms.max(1))
    }
}

/// Full dialogue configuration. Every section is optional in TOML.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CalmConfig {
    pub router: RouterConfig,
    pub clarification: ClarificationConfig,
    pub booking: BookingConfig,
    pub runtime: RuntimeConfig,
}

impl CalmConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Reads the file when given, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml_str(&contents)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_EXTERNAL_TIMEOUT_MS) {
            self.runtime.external_timeout_ms = parse_env(ENV_EXTERNAL_TIMEOUT_MS, &value)?;
        }
        if let Some(value) = lookup(ENV_HISTORY_WINDOW) {
            self.runtime.history_window = parse_env(ENV_HISTORY_WINDOW, &value)?;
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_toml_is_the_default_config() {
        let config = CalmConfig::from_toml_str("").expect("parse");
        assert_eq!(config, CalmConfig::default());
        assert_eq!(config.clarification.max_attempts, 2);
        assert_eq!(config.booking.max_slots, 5);
    }

    #[test]
    fn partial_sections_override_only_named_fields() {
        let config = CalmConfig::from_toml_str(
            r#"
            [router]
            therapy_keywords = ["coach"]

            [runtime]
            external_timeout_ms = 250
            "#,
        )
        .expect("parse");
        assert_eq!(config.router.therapy_keywords, vec!["coach".to_string()]);
        assert_eq!(config.router.min_input_chars, 3);
        assert_eq!(config.runtime.external_timeout(), Duration::from_millis(250));
        assert_eq!(config.runtime.history_window, 5);
    }

    #[test]
    fn env_overrides_apply_and_reject_garbage() {
        let vars = HashMap::from([
            (ENV_EXTERNAL_TIMEOUT_MS, "900"),
            (ENV_HISTORY_WINDOW, " 3 "),
        ]);
        let mut config = CalmConfig::default();
        config
            .apply_env(|key| vars.get(key).map(|value| value.to_string()))
            .expect("apply env");
        assert_eq!(config.runtime.external_timeout_ms, 900);
        assert_eq!(config.runtime.history_window, 3);

        let err = config
            .apply_env(|key| (key == ENV_HISTORY_WINDOW).then(|| "many".to_string()))
            .expect_err("bad value");
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }

    #[test]
    fn mistyped_values_fail_to_parse() {
        let err = CalmConfig::from_toml_str("[clarification]\nmax_attempts = \"two\"")
            .expect_err("bad type");
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
