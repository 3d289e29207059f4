use std::{cell::RefCell, rc::Rc};

use ndarray::{Array2, Array4, Ix2};
use rand::Rng;

use super::{
    Mode, Sequential, SequentialBuilder,
    layers::{BN_MOMENTUM, ConvSpec, Forward, Init},
};
use crate::{
    MlErr, Result,
    autodiff::{ConvGeometry, Tape, Var},
    params::{BoundParams, NormState, ParamSet},
};

/// The shape of a [`Discriminator`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiscriminatorSpec {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    pub conv_filters: (usize, usize),
    pub dense_units: usize,
    pub alpha: f32,
    pub use_bn: bool,
}

/// Scores images with a single logit each.
///
/// Two stride 2 convolutions (the first one without normalization) feed a dense bottleneck
/// and a final dense layer producing the logit.
#[derive(Debug, Clone)]
pub struct Discriminator {
    spec: DiscriminatorSpec,
    net: Sequential,
    params: ParamSet,
    norms: NormState,
}

impl Discriminator {
    pub const NAME: &'static str = "discriminator";

    /// Creates a new `Discriminator`, initializing its parameters from `rng`.
    pub fn new<R: Rng>(spec: DiscriminatorSpec, rng: Rc<RefCell<R>>) -> Result<Self> {
        let DiscriminatorSpec {
            height,
            width,
            channels,
            conv_filters: (f0, f1),
            dense_units,
            alpha,
            use_bn,
        } = spec;

        if [height, width, channels, f0, f1, dense_units].contains(&0) {
            return Err(MlErr::InvalidSpec(format!("empty discriminator {spec:?}")));
        }

        let mut params = ParamSet::new(Self::NAME);
        let mut norms = NormState::new(Self::NAME, BN_MOMENTUM);
        let init = Init::new(&mut params, &mut norms, rng);

        let downsample = |in_channels, filters| ConvSpec {
            in_channels,
            filters,
            kernel: (5, 5),
            stride: (2, 2),
        };

        let half = |h, w| {
            let geom = ConvGeometry::same(1, (h, w), 1, (5, 5), (2, 2));
            (geom.out_h, geom.out_w)
        };
        let (h2, w2) = half(height, width);
        let (h4, w4) = half(h2, w2);

        let net = SequentialBuilder::new(init, use_bn)
            .conv2d(downsample(channels, f0))?
            .leaky_relu(alpha)
            .conv2d(downsample(f0, f1))?
            .batch_norm(f1)?
            .leaky_relu(alpha)
            .flatten()
            .dense((h4 * w4 * f1, dense_units))?
            .batch_norm(dense_units)?
            .leaky_relu(alpha)
            .dense((dense_units, 1))?
            .build();

        Ok(Self {
            spec,
            net,
            params,
            norms,
        })
    }

    pub fn spec(&self) -> &DiscriminatorSpec {
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

    /// Scores a batch of images already recorded on a tape.
    ///
    /// Every call within a pass must use the same `params`, so that all of them share one
    /// set of variables.
    ///
    /// # Returns
    /// The probabilities and the logits, both of shape `[batch, 1]`.
    pub fn forward<'t>(
        &mut self,
        x: Var<'t>,
        params: &BoundParams<'t>,
        mode: Mode,
    ) -> Result<(Var<'t>, Var<'t>)> {
        let DiscriminatorSpec {
            height,
            width,
            channels,
            ..
        } = self.spec;

        let shape = x.shape();
        if shape.len() != 4 || shape[1..] != [height, width, channels] {
            let n = shape.first().copied().unwrap_or(0);
            return Err(MlErr::shape(
                "discriminator input",
                &shape,
                &[n, height, width, channels],
            ));
        }

        let mut fwd = Forward::new(params, &mut self.norms, mode);
        let logits = self.net.forward(x, &mut fwd)?;
        Ok((logits.sigmoid(), logits))
    }

    /// Scores images on a tape of its own.
    ///
    /// # Returns
    /// The probabilities and the logits, both of shape `[batch, 1]`.
    pub fn discriminate(
        &mut self,
        x: &Array4<f32>,
        mode: Mode,
    ) -> Result<(Array2<f32>, Array2<f32>)> {
        let tape = Tape::new();
        let params = tape.bind(&self.params)?;
        let x = tape.leaf(x.clone().into_dyn());
        let (prob, logits) = self.forward(x, &params, mode)?;

        let prob = prob.value().as_ref().clone().into_dimensionality::<Ix2>()?;
        let logits = logits.value().as_ref().clone().into_dimensionality::<Ix2>()?;
        Ok((prob, logits))
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array4;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::autodiff::sigmoid;

    fn spec() -> DiscriminatorSpec {
        DiscriminatorSpec {
            height: 8,
            width: 8,
            channels: 1,
            conv_filters: (4, 6),
            dense_units: 16,
            alpha: 0.2,
            use_bn: true,
        }
    }

    fn discriminator() -> Discriminator {
        let rng = Rc::new(RefCell::new(StdRng::seed_from_u64(3)));
        Discriminator::new(spec(), rng).unwrap()
    }

    fn images(n: usize) -> Array4<f32> {
        Array4::from_shape_fn((n, 8, 8, 1), |(i, y, x, _)| {
            ((i * 64 + y * 8 + x) as f32 * 0.61).sin() * 0.5 + 0.5
        })
    }

    #[test]
    fn probability_is_the_sigmoid_of_the_logit() {
        let mut discriminator = discriminator();
        let (prob, logits) = discriminator.discriminate(&images(4), Mode::Train).unwrap();

        assert_eq!(prob.shape(), &[4, 1]);
        for (p, l) in prob.iter().zip(&logits) {
            assert_eq!(*p, sigmoid(*l));
            assert!((0. ..=1.).contains(p));
        }
    }

    #[test]
    fn wrong_image_sizes_are_rejected() {
        let mut discriminator = discriminator();
        let x = Array4::zeros((2, 8, 4, 1));
        assert!(matches!(
            discriminator.discriminate(&x, Mode::Infer),
            Err(MlErr::ShapeMismatch {
                what: "discriminator input",
                ..
            })
        ));
    }

    #[test]
    fn inference_is_deterministic() {
        let mut discriminator = discriminator();
        let a = discriminator.discriminate(&images(2), Mode::Infer).unwrap();
        let b = discriminator.discriminate(&images(2), Mode::Infer).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn odd_sizes_round_up() {
        let rng = Rc::new(RefCell::new(StdRng::seed_from_u64(3)));
        let spec = DiscriminatorSpec {
            height: 7,
            width: 5,
            ..spec()
        };
        let mut discriminator = Discriminator::new(spec, rng).unwrap();

        let x = Array4::zeros((2, 7, 5, 1));
        let (prob, _) = discriminator.discriminate(&x, Mode::Observe).unwrap();
        assert_eq!(prob.shape(), &[2, 1]);
    }
}
