use crate::{
    MlErr, Result,
    arch::{DiscriminatorSpec, GeneratorSpec},
};

/// Everything needed to build a [`RaSganGp`](super::RaSganGp).
#[derive(Debug, Clone, PartialEq)]
pub struct GanSpec {
    pub model_name: String,
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    pub z_dim: usize,
    pub use_bn: bool,
    /// Slope of the leaky rectifiers for negative inputs.
    pub alpha: f32,
    pub beta_1: f32,
    pub beta_2: f32,
    /// The stride between generator updates.
    pub n_critic: usize,
    pub gp_coeff: f32,
    pub learning_rate: f32,
    pub seed: Option<u64>,
    pub generator_dense_units: usize,
    pub generator_filters: usize,
    pub discriminator_conv_filters: (usize, usize),
    pub discriminator_dense_units: usize,
}

impl GanSpec {
    /// Checks every hyperparameter is in its valid range.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(MlErr::InvalidSpec(msg));

        if self.z_dim == 0 {
            return invalid("z_dim must be positive".into());
        }

        if self.n_critic == 0 {
            return invalid("n_critic must be positive".into());
        }

        if !(self.learning_rate > 0. && self.learning_rate.is_finite()) {
            return invalid(format!("invalid learning rate {}", self.learning_rate));
        }

        for (name, beta) in [("beta_1", self.beta_1), ("beta_2", self.beta_2)] {
            if !(0. ..1.).contains(&beta) {
                return invalid(format!("{name} must be in [0, 1), got {beta}"));
            }
        }

        if !(self.gp_coeff >= 0. && self.gp_coeff.is_finite()) {
            return invalid(format!("invalid gradient penalty weight {}", self.gp_coeff));
        }

        if !self.alpha.is_finite() {
            return invalid(format!("invalid leaky rectifier slope {}", self.alpha));
        }

        let (h, w) = (self.height, self.width);
        if h == 0 || w == 0 || h % 4 != 0 || w % 4 != 0 {
            return invalid(format!("the image sides must be multiples of 4, got {h}x{w}"));
        }

        if self.channels == 0 {
            return invalid("the images have no channels".into());
        }

        Ok(())
    }

    pub fn generator(&self) -> GeneratorSpec {
        GeneratorSpec {
            z_dim: self.z_dim,
            height: self.height,
            width: self.width,
            channels: self.channels,
            dense_units: self.generator_dense_units,
            filters: self.generator_filters,
            alpha: self.alpha,
            use_bn: self.use_bn,
        }
    }

    pub fn discriminator(&self) -> DiscriminatorSpec {
        DiscriminatorSpec {
            height: self.height,
            width: self.width,
            channels: self.channels,
            conv_filters: self.discriminator_conv_filters,
            dense_units: self.discriminator_dense_units,
            alpha: self.alpha,
            use_bn: self.use_bn,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A model small enough to train in tests.
    pub(crate) fn tiny() -> GanSpec {
        GanSpec {
            model_name: "tiny".into(),
            height: 8,
            width: 8,
            channels: 1,
            z_dim: 8,
            use_bn: true,
            alpha: 0.2,
            beta_1: 0.5,
            beta_2: 0.9,
            n_critic: 5,
            gp_coeff: 10.,
            learning_rate: 1e-3,
            seed: Some(42),
            generator_dense_units: 16,
            generator_filters: 4,
            discriminator_conv_filters: (4, 8),
            discriminator_dense_units: 16,
        }
    }

    #[test]
    fn tiny_is_valid() {
        assert_eq!(tiny().validate(), Ok(()));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let cases = [
            GanSpec { z_dim: 0, ..tiny() },
            GanSpec { n_critic: 0, ..tiny() },
            GanSpec { learning_rate: 0., ..tiny() },
            GanSpec { learning_rate: -1e-4, ..tiny() },
            GanSpec { beta_1: 1., ..tiny() },
            GanSpec { beta_2: -0.1, ..tiny() },
            GanSpec { gp_coeff: -1., ..tiny() },
            GanSpec { height: 10, ..tiny() },
            GanSpec { width: 0, ..tiny() },
            GanSpec { channels: 0, ..tiny() },
        ];

        for spec in cases {
            assert!(
                matches!(spec.validate(), Err(MlErr::InvalidSpec(_))),
                "{spec:?} was accepted"
            );
        }
    }
}
