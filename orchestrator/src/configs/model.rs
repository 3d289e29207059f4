use serde::{Deserialize, Serialize};

/// The hyperparameters of a RaSGAN-GP model.
///
/// The image size is not part of it, it comes from the data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    pub model_name: String,
    pub z_dim: usize,
    pub use_bn: bool,
    pub alpha: f32,
    pub beta_1: f32,
    pub beta_2: f32,
    pub n_critic: usize,
    pub gp_coeff: f32,
    pub learning_rate: f32,
    pub seed: Option<u64>,
    pub generator_dense_units: usize,
    pub generator_filters: usize,
    pub discriminator_conv_filters: (usize, usize),
    pub discriminator_dense_units: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_name: "RaSGAN_GP".into(),
            z_dim: 200,
            use_bn: true,
            alpha: 0.2,
            beta_1: 0.5,
            beta_2: 0.9,
            n_critic: 5,
            gp_coeff: 10.,
            learning_rate: 1e-4,
            seed: None,
            generator_dense_units: 1024,
            generator_filters: 128,
            discriminator_conv_filters: (64, 128),
            discriminator_dense_units: 1024,
        }
    }
}
