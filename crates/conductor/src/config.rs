use serde::Deserialize;

use crate::error::Error;
use crate::policy::MAX_STEPS;

/// Engine configuration, loaded from `conductor.toml`.
///
/// Only the engine's own knobs live here — provider credentials, storage
/// buckets, and ledger connection details belong to the host service.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Model identifier passed to the generation provider and priced by
    /// the ledger.
    pub model: String,
    /// Ledger feature gate for the turn itself.
    #[serde(default = "default_feature")]
    pub feature: String,
    /// Step budget per turn. Clamped to the hard cap of 25.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// Default requested output ceiling, before affordability capping.
    #[serde(default = "default_max_output_units")]
    pub max_output_units: u32,
}

fn default_feature() -> String {
    "chat".into()
}

fn default_max_steps() -> usize {
    MAX_STEPS
}

fn default_max_output_units() -> u32 {
    4096
}

impl EngineConfig {
    /// Parse a TOML document into a validated configuration.
    pub fn from_toml_str(raw: &str) -> Result<Self, Error> {
        let config: EngineConfig =
            toml::from_str(raw).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.model.is_empty() {
            return Err(Error::Config("model must not be empty".into()));
        }
        if self.max_steps == 0 {
            return Err(Error::Config("max_steps must be at least 1".into()));
        }
        if self.max_steps > MAX_STEPS {
            return Err(Error::Config(format!(
                "max_steps {} exceeds the hard cap of {MAX_STEPS}",
                self.max_steps
            )));
        }
        if self.max_output_units == 0 {
            return Err(Error::Config("max_output_units must be at least 1".into()));
        }
        Ok(())
    }
}
