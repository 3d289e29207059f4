use machine_learning::{GanSpec, MlErr};

use super::ModelConfig;
use crate::{
    data::DataSource,
    error::{OrchestratorError, Result},
};

/// Turns configurations into the specification of a model.
pub struct Adapter;

impl Adapter {
    pub fn new() -> Self {
        Self
    }

    /// Builds the `GanSpec` of a model trained on the images of `data`.
    ///
    /// # Returns
    /// The validated `GanSpec`, or an `InvalidConfig` error naming the offending value.
    pub fn adapt_model(&self, model: &ModelConfig, data: &dyn DataSource) -> Result<GanSpec> {
        let spec = GanSpec {
            model_name: model.model_name.clone(),
            height: data.patch_h(),
            width: data.patch_w(),
            channels: data.n_channels(),
            z_dim: model.z_dim,
            use_bn: model.use_bn,
            alpha: model.alpha,
            beta_1: model.beta_1,
            beta_2: model.beta_2,
            n_critic: model.n_critic,
            gp_coeff: model.gp_coeff,
            learning_rate: model.learning_rate,
            seed: model.seed,
            generator_dense_units: model.generator_dense_units,
            generator_filters: model.generator_filters,
            discriminator_conv_filters: model.discriminator_conv_filters,
            discriminator_dense_units: model.discriminator_dense_units,
        };

        if model.model_name.is_empty() {
            return Err(OrchestratorError::InvalidConfig(
                "model_name must not be empty".into(),
            ));
        }

        match spec.validate() {
            Ok(()) => Ok(spec),
            Err(MlErr::InvalidSpec(msg)) => Err(OrchestratorError::InvalidConfig(msg)),
            Err(e) => Err(e.into()),
        }
    }
}

impl Default for Adapter {
    fn default() -> Self {
        Self::new()
    }
}
