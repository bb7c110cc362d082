//! Process-level settings for the vqgen binaries and tests.
//!
//! Sources are layered in this order, later ones winning: built-in defaults,
//! an optional `vqgen.{toml,json,yaml}` file in the working directory, then
//! environment variables prefixed with `VQGEN__` (for example
//! `VQGEN__RUNTIME__SEED=7`). Model hyperparameters are not settings; they live
//! in [`ModelConfig`](crate::vqgen::architectures::base::config::ModelConfig).

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeSettings {
    /// Seed for parameter initialization and for the sampling RNG.
    pub seed: u64,

    /// Backend name understood by `BackendType::from_name` ("cpu", "wgpu").
    pub backend: String,

    /// Level passed to the logger when the binary starts.
    pub log_level: String,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            seed: 42,
            backend: "cpu".to_string(),
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SamplingSettings {
    /// Number of index grids drawn per sampling call.
    pub num_samples: usize,
}

impl Default for SamplingSettings {
    fn default() -> Self {
        Self { num_samples: 16 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    pub runtime: RuntimeSettings,
    pub sampling: SamplingSettings,
}

impl Settings {
    /// Build settings from defaults, the optional `vqgen` file and `VQGEN__*` variables.
    pub fn new() -> Result<Self, ConfigError> {
        let defaults = RuntimeSettings::default();
        let settings = Config::builder()
            .set_default("runtime.seed", defaults.seed as i64)?
            .set_default("runtime.backend", defaults.backend)?
            .set_default("runtime.log_level", defaults.log_level)?
            .set_default(
                "sampling.num_samples",
                SamplingSettings::default().num_samples as i64,
            )?
            .add_source(File::with_name("vqgen").required(false))
            .add_source(
                Environment::with_prefix("VQGEN")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        settings.try_deserialize()
    }
}

static SETTINGS: OnceLock<Settings> = OnceLock::new();

/// Get the global settings instance, initializing it on first use.
///
/// A malformed source falls back to defaults with a warning rather than
/// aborting the process.
pub fn settings() -> &'static Settings {
    SETTINGS.get_or_init(|| {
        Settings::new().unwrap_or_else(|e| {
            log::warn!("falling back to default settings: {}", e);
            Settings::default()
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();

        assert_eq!(settings.runtime.seed, 42);
        assert_eq!(settings.runtime.backend, "cpu");
        assert_eq!(settings.runtime.log_level, "info");
        assert_eq!(settings.sampling.num_samples, 16);
    }

    #[test]
    fn test_settings_new_matches_defaults_without_overrides() {
        let settings = Settings::new().unwrap_or_else(|_| Settings::default());

        // the environment may override the seed or log level, not these
        assert_eq!(settings.runtime.backend, "cpu");
        assert_eq!(settings.sampling.num_samples, 16);
    }

    #[test]
    fn test_settings_serialization() {
        let settings = Settings::default();

        let json = serde_json::to_string(&settings).expect("Should serialize to JSON");
        assert!(json.contains("\"seed\":42"));
        assert!(json.contains("num_samples"));
        assert!(!json.contains("testing"));

        let deserialized: Settings =
            serde_json::from_str(&json).expect("Should deserialize from JSON");
        assert_eq!(deserialized, settings);

        // sections this crate does not know about are ignored
        let legacy: Settings = serde_json::from_str(
            r#"{"runtime":{"seed":1,"backend":"cpu","log_level":"warn"},"sampling":{"num_samples":2},"testing":{"ci":true}}"#,
        )
        .expect("unknown sections are skipped");
        assert_eq!(legacy.runtime.seed, 1);
        assert_eq!(legacy.sampling.num_samples, 2);
    }

    #[test]
    fn test_global_settings_singleton() {
        let settings1 = settings();
        let settings2 = settings();

        assert_eq!(settings1 as *const Settings, settings2 as *const Settings);
    }
}
