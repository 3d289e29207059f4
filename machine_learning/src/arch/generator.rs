use std::{cell::RefCell, rc::Rc};

use ndarray::{Array2, Array4, Ix4};
use rand::Rng;

use super::{
    Mode, Sequential, SequentialBuilder,
    layers::{BN_MOMENTUM, ConvSpec, Forward, Init},
};
use crate::{
    MlErr, Result,
    autodiff::{Tape, Var},
    params::{BoundParams, NormState, ParamSet},
};

/// The shape of a [`Generator`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeneratorSpec {
    pub z_dim: usize,
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    pub dense_units: usize,
    pub filters: usize,
    pub alpha: f32,
    pub use_bn: bool,
}

/// Maps latent vectors to images.
///
/// Two dense layers expand the latent vector into a feature map a quarter of the target
/// size, then two stride 2 transposed convolutions bring it to full size with a stride 1
/// convolution in between. The output goes through a sigmoid.
#[derive(Debug, Clone)]
pub struct Generator {
    spec: GeneratorSpec,
    net: Sequential,
    params: ParamSet,
    norms: NormState,
}

impl Generator {
    pub const NAME: &'static str = "generator";

    /// Creates a new `Generator`, initializing its parameters from `rng`.
    ///
    /// # Returns
    /// An error if `spec` has empty dimensions or the image sides are not divisible by 4.
    pub fn new<R: Rng>(spec: GeneratorSpec, rng: Rc<RefCell<R>>) -> Result<Self> {
        let GeneratorSpec {
            z_dim,
            height,
            width,
            channels,
            dense_units,
            filters,
            alpha,
            use_bn,
        } = spec;

        if height % 4 != 0 || width % 4 != 0 || height == 0 || width == 0 {
            return Err(MlErr::InvalidSpec(format!(
                "the image sides must be positive multiples of 4, got {height}x{width}"
            )));
        }

        if z_dim == 0 || channels == 0 || dense_units == 0 || filters == 0 {
            return Err(MlErr::InvalidSpec(format!("empty generator {spec:?}")));
        }

        let mut params = ParamSet::new(Self::NAME);
        let mut norms = NormState::new(Self::NAME, BN_MOMENTUM);
        let init = Init::new(&mut params, &mut norms, rng);

        let (h4, w4) = (height / 4, width / 4);
        let upsample = |in_channels, filters| ConvSpec {
            in_channels,
            filters,
            kernel: (2, 2),
            stride: (2, 2),
        };

        let net = SequentialBuilder::new(init, use_bn)
            .dense((z_dim, dense_units))?
            .batch_norm(dense_units)?
            .leaky_relu(alpha)
            .dense((dense_units, h4 * w4 * filters))?
            .batch_norm(h4 * w4 * filters)?
            .leaky_relu(alpha)
            .reshape(&[h4, w4, filters])
            .conv2d_transpose(upsample(filters, filters))?
            .batch_norm(filters)?
            .leaky_relu(alpha)
            .conv2d(ConvSpec {
                in_channels: filters,
                filters,
                kernel: (5, 5),
                stride: (1, 1),
            })?
            .batch_norm(filters)?
            .leaky_relu(alpha)
            .conv2d_transpose(upsample(filters, channels))?
            .sigmoid()
            .build();

        Ok(Self {
            spec,
            net,
            params,
            norms,
        })
    }

    pub fn spec(&self) -> &GeneratorSpec {
        &self.spec
    }

    pub fn params(&self) -> &ParamSet {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut ParamSet {
        &mut self.params
    }

    pub fn norms(&self) -> &NormState {
        &self.norms
    }

    pub fn norms_mut(&mut self) -> &mut NormState {
        &mut self.norms
    }

    /// Borrows the parameters and the normalization statistics at once.
    pub fn state_mut(&mut self) -> (&mut ParamSet, &mut NormState) {
        (&mut self.params, &mut self.norms)
    }

    /// Runs the network on a batch of latent vectors already recorded on a tape.
    ///
    /// # Arguments
    /// * `z` - Latent vectors of shape `[batch, z_dim]`.
    /// * `params` - This generator's parameters bound to the same tape as `z`.
    /// * `mode` - How normalization layers behave.
    ///
    /// # Returns
    /// Images of shape `[batch, height, width, channels]`.
    pub fn forward<'t>(
        &mut self,
        z: Var<'t>,
        params: &BoundParams<'t>,
        mode: Mode,
    ) -> Result<Var<'t>> {
        let shape = z.shape();
        if shape.len() != 2 || shape[1] != self.spec.z_dim {
            let n = shape.first().copied().unwrap_or(0);
            return Err(MlErr::shape("latent batch", &shape, &[n, self.spec.z_dim]));
        }

        let mut fwd = Forward::new(params, &mut self.norms, mode);
        self.net.forward(z, &mut fwd)
    }

    /// Generates images from latent vectors on a tape of its own.
    ///
    /// # Arguments
    /// * `z` - Latent vectors of shape `[batch, z_dim]`.
    /// * `training` - Whether to normalize with batch statistics and commit them, or to use
    ///   the stored statistics and mutate nothing.
    pub fn generate(&mut self, z: &Array2<f32>, training: bool) -> Result<Array4<f32>> {
        let mode = if training { Mode::Train } else { Mode::Infer };

        let tape = Tape::new();
        let params = tape.bind(&self.params)?;
        let z = tape.leaf(z.clone().into_dyn());
        let images = self.forward(z, &params, mode)?;

        Ok(images.value().as_ref().clone().into_dimensionality::<Ix4>()?)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array2;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn spec(use_bn: bool) -> GeneratorSpec {
        GeneratorSpec {
            z_dim: 4,
            height: 8,
            width: 12,
            channels: 2,
            dense_units: 16,
            filters: 3,
            alpha: 0.2,
            use_bn,
        }
    }

    fn rng() -> Rc<RefCell<StdRng>> {
        Rc::new(RefCell::new(StdRng::seed_from_u64(7)))
    }

    fn latent(n: usize) -> Array2<f32> {
        Array2::from_shape_fn((n, 4), |(i, j)| ((i * 4 + j) as f32 * 0.37).sin())
    }

    #[test]
    fn output_matches_the_target_image() {
        let mut generator = Generator::new(spec(true), rng()).unwrap();
        let images = generator.generate(&latent(3), true).unwrap();

        assert_eq!(images.shape(), &[3, 8, 12, 2]);
        assert!(images.iter().all(|p| (0. ..=1.).contains(p)));
    }

    #[test]
    fn inference_is_deterministic_and_stateless() {
        let mut generator = Generator::new(spec(true), rng()).unwrap();
        let before: Vec<_> = generator.norms().iter().map(|(_, s)| s.clone()).collect();

        let a = generator.generate(&latent(2), false).unwrap();
        let b = generator.generate(&latent(2), false).unwrap();
        assert_eq!(a, b);

        let after: Vec<_> = generator.norms().iter().map(|(_, s)| s.clone()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn training_commits_statistics() {
        let mut generator = Generator::new(spec(true), rng()).unwrap();
        let before: Vec<_> = generator.norms().iter().map(|(_, s)| s.clone()).collect();

        generator.generate(&latent(2), true).unwrap();
        let after: Vec<_> = generator.norms().iter().map(|(_, s)| s.clone()).collect();
        assert_ne!(before, after);
    }

    #[test]
    fn use_bn_gates_normalization() {
        let with = Generator::new(spec(true), rng()).unwrap();
        let without = Generator::new(spec(false), rng()).unwrap();

        assert_eq!(with.norms().len(), 4);
        assert!(without.norms().is_empty());
        assert!(without.params().iter().all(|(name, ..)| !name.contains("batch_norm")));
        assert!(with.params().iter().all(|(name, ..)| name.starts_with("generator/")));
    }

    #[test]
    fn sides_must_be_multiples_of_four() {
        let spec = GeneratorSpec {
            height: 10,
            ..spec(true)
        };
        assert!(matches!(Generator::new(spec, rng()), Err(MlErr::InvalidSpec(_))));
    }

    #[test]
    fn latent_width_is_checked() {
        let mut generator = Generator::new(spec(true), rng()).unwrap();
        let z = Array2::zeros((2, 5));
        assert!(matches!(
            generator.generate(&z, false),
            Err(MlErr::ShapeMismatch { what: "latent batch", .. })
        ));
    }
}
