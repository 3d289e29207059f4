mod adapter;
mod model;
mod training;

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

pub use adapter::Adapter;
pub use model::ModelConfig;
pub use training::TrainingConfig;

use crate::error::{OrchestratorError, Result};

/// A whole run description, as read from `{ "model": ..., "training": ... }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub model: ModelConfig,
    pub training: TrainingConfig,
}

impl Config {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| OrchestratorError::InvalidConfig(e.to_string()))
    }

    /// Reads and parses a JSON configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config = Config::from_json(r#"{ "model": { "z_dim": 8 }, "training": {} }"#).unwrap();

        assert_eq!(config.model.z_dim, 8);
        assert_eq!(config.model.n_critic, 5);
        assert_eq!(config.training, TrainingConfig::default());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = Config::from_json(r#"{ "model": { "zdim": 8 } }"#).unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidConfig(_)));
    }

    #[test]
    fn zero_strides_are_rejected() {
        for json in [
            r#"{ "training": { "print_epochs": 0 } }"#,
            r#"{ "training": { "show_epochs": 0 } }"#,
            r#"{ "training": { "n_images": 0 } }"#,
            r#"{ "training": { "epochs": 0 } }"#,
        ] {
            let config = Config::from_json(json).unwrap();
            assert!(matches!(
                config.training.validate(),
                Err(OrchestratorError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn serializes_back_to_the_same_config() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(Config::from_json(&json).unwrap(), config);
    }
}
