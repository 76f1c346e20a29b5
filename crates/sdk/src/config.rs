//! Engine timing configuration.
//!
//! Loaded in layers, later sources overriding earlier ones:
//! 1. Built-in defaults
//! 2. TOML file (explicit path, else `KEYSUB_CONFIG` when set)
//! 3. Environment variables prefixed with `KEYSUB__`, e.g.
//!    `KEYSUB__PERSIST_DEBOUNCE_MS=250`

use std::{env, time::Duration};

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

pub const CONFIG_PATH_ENV: &str = "KEYSUB_CONFIG";
pub const ENV_PREFIX: &str = "KEYSUB";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Quiet window coalescing bursts of subscribe/unsubscribe calls into a
    /// single reconciliation.
    pub demand_debounce_ms: u64,
    /// Quiet window after the last cache mutation before the cache blob is
    /// written to the backend.
    pub persist_debounce_ms: u64,
    /// Minimal interval between two combined-state publications.
    pub combine_throttle_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { demand_debounce_ms: 100, persist_debounce_ms: 1000, combine_throttle_ms: 100 }
    }
}

impl EngineConfig {
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(true));
        } else if let Ok(path) = env::var(CONFIG_PATH_ENV) {
            builder = builder.add_source(File::with_name(&path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()
    }

    /// Rejects zero-length windows, which would turn debouncing into busy
    /// looping.
    pub fn validate(self) -> Result<Self> {
        for (name, value) in [
            ("demand_debounce_ms", self.demand_debounce_ms),
            ("persist_debounce_ms", self.persist_debounce_ms),
            ("combine_throttle_ms", self.combine_throttle_ms),
        ] {
            if value == 0 {
                return Err(EngineError::InvalidArgument(format!("{name} must be positive")));
            }
        }
        Ok(self)
    }

    pub fn demand_debounce(&self) -> Duration { Duration::from_millis(self.demand_debounce_ms) }

    pub fn persist_debounce(&self) -> Duration { Duration::from_millis(self.persist_debounce_ms) }

    pub fn combine_throttle(&self) -> Duration { Duration::from_millis(self.combine_throttle_ms) }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;
    use temp_env::with_vars;

    use super::*;

    const ALL_VARS: [&str; 4] = [
        CONFIG_PATH_ENV,
        "KEYSUB__DEMAND_DEBOUNCE_MS",
        "KEYSUB__PERSIST_DEBOUNCE_MS",
        "KEYSUB__COMBINE_THROTTLE_MS",
    ];

    fn cleared<'a>() -> Vec<(&'a str, Option<&'a str>)> {
        ALL_VARS.iter().map(|v| (*v, None)).collect()
    }

    #[test]
    #[serial]
    fn defaults_match_reference_windows() {
        with_vars(cleared(), || {
            let config = EngineConfig::load(None).unwrap();
            assert_eq!(config, EngineConfig::default());
            assert_eq!(config.demand_debounce(), Duration::from_millis(100));
            assert_eq!(config.persist_debounce(), Duration::from_secs(1));
            assert_eq!(config.combine_throttle(), Duration::from_millis(100));
        });
    }

    #[test]
    #[serial]
    fn file_then_env_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keysub.toml");
        std::fs::write(&path, "persist_debounce_ms = 250\ncombine_throttle_ms = 50\n").unwrap();

        let mut vars = cleared();
        vars.retain(|(k, _)| *k != "KEYSUB__COMBINE_THROTTLE_MS");
        vars.push(("KEYSUB__COMBINE_THROTTLE_MS", Some("75")));
        with_vars(vars, || {
            let config = EngineConfig::load(path.to_str()).unwrap();
            assert_eq!(config.demand_debounce_ms, 100);
            assert_eq!(config.persist_debounce_ms, 250);
            assert_eq!(config.combine_throttle_ms, 75);
        });
    }

    #[test]
    #[serial]
    fn config_path_from_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("from_env.toml");
        std::fs::write(&path, "demand_debounce_ms = 20\n").unwrap();

        let mut vars = cleared();
        vars.retain(|(k, _)| *k != CONFIG_PATH_ENV);
        vars.push((CONFIG_PATH_ENV, path.to_str()));
        with_vars(vars, || {
            assert_eq!(EngineConfig::load(None).unwrap().demand_debounce_ms, 20);
        });
    }

    #[test]
    #[serial]
    fn zero_window_is_rejected() {
        let mut vars = cleared();
        vars.retain(|(k, _)| *k != "KEYSUB__DEMAND_DEBOUNCE_MS");
        vars.push(("KEYSUB__DEMAND_DEBOUNCE_MS", Some("0")));
        with_vars(vars, || {
            assert!(matches!(EngineConfig::load(None), Err(EngineError::InvalidArgument(_))));
        });
    }
}
