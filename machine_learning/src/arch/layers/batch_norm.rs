use ndarray::Array1;
use rand::Rng;

use super::{Forward, Init};
use crate::{
    MlErr, Result,
    autodiff::Var,
    initialization::ConstParamGen,
    params::{NormKey, ParamKey},
};

/// Weight of the running statistics when committing a batch.
pub const MOMENTUM: f32 = 0.99;

/// Added to the variance before taking its square root.
pub const EPSILON: f32 = 1e-3;

/// Batch normalization over the last axis.
///
/// Every other axis is treated as a batch axis, so it normalizes dense activations per unit
/// and convolution activations per channel.
#[derive(Debug, Clone)]
pub struct BatchNorm {
    channels: usize,
    gamma: ParamKey,
    beta: ParamKey,
    stats: NormKey,
}

impl BatchNorm {
    /// Creates a new `BatchNorm` layer, registering its scale, offset and running statistics.
    pub fn new<R: Rng>(name: &str, channels: usize, init: &mut Init<'_, R>) -> Result<Self> {
        if channels == 0 {
            return Err(MlErr::InvalidSpec(format!("{name} has no channels")));
        }

        let gamma = init.params.register(
            &format!("{name}/gamma"),
            &[channels],
            &mut ConstParamGen::ones(channels),
        )?;
        let beta = init.params.register(
            &format!("{name}/beta"),
            &[channels],
            &mut ConstParamGen::zeros(channels),
        )?;
        let stats = init.norms.register(name, channels)?;

        Ok(Self {
            channels,
            gamma,
            beta,
            stats,
        })
    }

    pub fn forward<'t>(&self, x: Var<'t>, fwd: &mut Forward<'_, 't>) -> Result<Var<'t>> {
        let shape = x.shape();
        if shape.len() < 2 || shape.last() != Some(&self.channels) {
            return Err(MlErr::shape("batch norm input", &shape, &[0, self.channels]));
        }

        let rows = shape.iter().product::<usize>() / self.channels;
        let x2 = x.reshape(&[rows, self.channels])?;

        let normalized = if fwd.mode.uses_batch_stats() {
            let mean = x2.mean_axis(0)?;
            let centered = x2.sub(mean)?;
            let var = centered.square()?.mean_axis(0)?;

            if fwd.mode.commits() {
                let correction = if rows > 1 {
                    rows as f32 / (rows - 1) as f32
                } else {
                    1.
                };

                let batch_mean: Array1<f32> = mean.value().iter().copied().collect();
                let batch_var: Array1<f32> =
                    var.value().iter().map(|v| v * correction).collect();
                fwd.norms.commit(self.stats, &batch_mean, &batch_var)?;
            }

            centered.div(var.add_scalar(EPSILON).sqrt())?
        } else {
            let stats = fwd.norms.get(self.stats)?;
            let tape = x.tape();
            let mean = tape.leaf(stats.mean.clone().into_dyn());
            let std = tape.leaf(stats.var.mapv(|v| (v + EPSILON).sqrt()).into_dyn());
            x2.sub(mean)?.div(std)?
        };

        let gamma = fwd.params.get(self.gamma)?;
        let beta = fwd.params.get(self.beta)?;
        normalized.mul(gamma)?.add(beta)?.reshape(&shape)
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use ndarray::array;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::{
        arch::Mode,
        autodiff::Tape,
        params::{NormState, ParamSet},
    };

    fn layer() -> (BatchNorm, ParamSet, NormState) {
        let mut params = ParamSet::new("net");
        let mut norms = NormState::new("net", 0.99);
        let rng = Rc::new(RefCell::new(StdRng::seed_from_u64(0)));
        let bn = BatchNorm::new("bn_0", 2, &mut Init::new(&mut params, &mut norms, rng)).unwrap();
        (bn, params, norms)
    }

    #[test]
    fn train_normalizes_and_commits() {
        let (bn, params, mut norms) = layer();
        let tape = Tape::new();
        let bound = tape.bind(&params).unwrap();

        let x = tape.leaf(array![[1., 10.], [3., 10.]].into_dyn());
        let y = bn
            .forward(x, &mut Forward::new(&bound, &mut norms, Mode::Train))
            .unwrap();

        let y = y.value();
        assert!((y[[0, 0]] + 1.).abs() < 1e-3);
        assert!((y[[1, 0]] - 1.).abs() < 1e-3);
        assert_eq!(y[[0, 1]], 0.);

        // mean (2, 10) and unbiased variance (2, 0).
        let stats = norms.iter().next().unwrap().1;
        assert!((stats.mean[0] - 0.02).abs() < 1e-6);
        assert!((stats.mean[1] - 0.1).abs() < 1e-6);
        assert!((stats.var[0] - 1.01).abs() < 1e-6);
        assert!((stats.var[1] - 0.99).abs() < 1e-6);
    }

    #[test]
    fn observe_and_infer_leave_statistics_alone() {
        let (bn, params, mut norms) = layer();
        let before = norms.clone();

        for mode in [Mode::Observe, Mode::Infer] {
            let tape = Tape::new();
            let bound = tape.bind(&params).unwrap();
            let x = tape.leaf(array![[1., 2.], [3., 4.]].into_dyn());
            bn.forward(x, &mut Forward::new(&bound, &mut norms, mode))
                .unwrap();
        }

        let stats: Vec<_> = norms.iter().map(|(_, s)| s.clone()).collect();
        let expected: Vec<_> = before.iter().map(|(_, s)| s.clone()).collect();
        assert_eq!(stats, expected);
    }

    #[test]
    fn infer_uses_running_statistics() {
        let (bn, params, mut norms) = layer();
        let tape = Tape::new();
        let bound = tape.bind(&params).unwrap();

        // Fresh statistics are zero mean and unit variance.
        let x = tape.leaf(array![[1., -2.]].into_dyn());
        let y = bn
            .forward(x, &mut Forward::new(&bound, &mut norms, Mode::Infer))
            .unwrap();

        let scale = (1. + EPSILON).sqrt();
        let y = y.value();
        assert!((y[[0, 0]] - 1. / scale).abs() < 1e-6);
        assert!((y[[0, 1]] + 2. / scale).abs() < 1e-6);
    }

    #[test]
    fn images_are_normalized_per_channel() {
        let (bn, params, mut norms) = layer();
        let tape = Tape::new();
        let bound = tape.bind(&params).unwrap();

        let x = tape.leaf(ndarray::ArrayD::from_shape_fn(
            ndarray::IxDyn(&[2, 3, 3, 2]),
            |idx| (idx[0] * 9 + idx[1] * 3 + idx[2]) as f32 * if idx[3] == 0 { 1. } else { -5. },
        ));
        let y = bn
            .forward(x, &mut Forward::new(&bound, &mut norms, Mode::Observe))
            .unwrap();
        assert_eq!(y.shape(), vec![2, 3, 3, 2]);

        let y = y.value();
        for c in 0..2 {
            let channel: Vec<f32> = y.iter().skip(c).step_by(2).copied().collect();
            let mean = channel.iter().sum::<f32>() / channel.len() as f32;
            assert!(mean.abs() < 1e-4);
        }
    }
}
