use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};

/// How a training run is driven.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainingConfig {
    pub epochs: usize,
    /// Root directory for checkpoints and samples.
    pub out_dir: PathBuf,
    /// Stride in steps between sample slots and checkpoints.
    pub show_epochs: usize,
    /// Stride in steps between loss records.
    pub print_epochs: usize,
    /// Images generated per sample slot.
    pub n_images: usize,
    pub batch_size: usize,
    /// Whether to reshuffle the data source on every epoch.
    pub shuffle: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 1,
            out_dir: PathBuf::from("run"),
            show_epochs: 100,
            print_epochs: 10,
            n_images: 10,
            batch_size: 64,
            shuffle: true,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("epochs", self.epochs),
            ("show_epochs", self.show_epochs),
            ("print_epochs", self.print_epochs),
            ("n_images", self.n_images),
            ("batch_size", self.batch_size),
        ];

        for (name, value) in positive {
            if value == 0 {
                return Err(OrchestratorError::InvalidConfig(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        Ok(())
    }
}
