use crate::{MlErr, Result, autodiff::Var};

/// Added to the squared gradient norm before taking its square root.
pub const GP_EPSILON: f32 = 1e-12;

/// Mixes real and generated images, `real * (1 - epsilon) + fake * epsilon`.
///
/// `epsilon` has shape `[batch, 1, 1, 1]`, one mixing factor per sample.
pub fn interpolate<'t>(real: Var<'t>, fake: Var<'t>, epsilon: Var<'t>) -> Result<Var<'t>> {
    let keep = epsilon.neg().add_scalar(1.);
    real.mul(keep)?.add(fake.mul(epsilon)?)
}

/// Penalizes the distance of the per-sample gradient norm of `logits` with respect to `x`
/// from 1, summed over the batch.
///
/// The gradient is recorded on the tape, so the penalty can be differentiated with respect
/// to whatever produced `logits`.
pub fn gradient_penalty<'t>(logits: Var<'t>, x: Var<'t>) -> Result<Var<'t>> {
    let grads = logits.tape().gradients(logits, &[x])?;
    let grad = grads
        .first()
        .copied()
        .ok_or_else(|| MlErr::shape("gradient penalty", &[], &x.shape()))?;

    penalty_from_gradients(grad)
}

/// `sum over batch of (sqrt(sum(grad^2) + GP_EPSILON) - 1)^2`, the sum of squares taken over
/// every axis but the first.
pub fn penalty_from_gradients(grad: Var<'_>) -> Result<Var<'_>> {
    let shape = grad.shape();
    let Some(&n) = shape.first() else {
        return Err(MlErr::shape("gradient penalty", &shape, &[0, 0]));
    };

    let per_sample = grad.value().len() / n.max(1);
    let norms = grad
        .square()?
        .reshape(&[n, per_sample])?
        .sum_axis(1)?
        .add_scalar(GP_EPSILON)
        .sqrt();

    Ok(norms.add_scalar(-1.).square()?.sum())
}

#[cfg(test)]
mod tests {
    use ndarray::{ArrayD, IxDyn, array};

    use super::*;
    use crate::autodiff::Tape;

    #[test]
    fn unit_norms_are_not_penalized() {
        let tape = Tape::new();
        let grad = tape.leaf(array![[[[1.]], [[0.]]], [[[0.]], [[-1.]]]].into_dyn());

        let penalty = penalty_from_gradients(grad).unwrap().item().unwrap();
        assert_eq!(penalty, 0.);
    }

    #[test]
    fn penalty_is_a_sum_over_the_batch() {
        let tape = Tape::new();
        // norms 2 and 0 contribute 1 each.
        let grad = tape.leaf(array![[2., 0.], [0., 0.]].into_dyn());

        let penalty = penalty_from_gradients(grad).unwrap().item().unwrap();
        assert!((penalty - 2.).abs() < 1e-5);
        assert!(penalty >= 0.);
    }

    #[test]
    fn unit_linear_critic_has_no_penalty() {
        // logits = x w with |w| = 1, so d logits / dx = w for every sample.
        let tape = Tape::new();
        let x = tape.leaf(ArrayD::from_shape_fn(IxDyn(&[3, 2]), |i| (i[0] + i[1]) as f32));
        let w = tape.leaf(array![[0.], [1.]].into_dyn());
        let logits = x.matmul(w).unwrap();

        let penalty = gradient_penalty(logits, x).unwrap().item().unwrap();
        assert!(penalty.abs() < 1e-6);
    }

    #[test]
    fn interpolation_mixes_per_sample() {
        let tape = Tape::new();
        let real = tape.leaf(ArrayD::ones(IxDyn(&[2, 1, 2, 1])));
        let fake = tape.leaf(ArrayD::zeros(IxDyn(&[2, 1, 2, 1])));
        let epsilon = array![0.25, 1.].into_shape_with_order((2, 1, 1, 1)).unwrap();
        let epsilon = tape.leaf(epsilon.into_dyn());

        let x = interpolate(real, fake, epsilon).unwrap();
        let x: Vec<f32> = x.value().iter().copied().collect();
        assert_eq!(x, [0.75, 0.75, 0., 0.]);
    }

    #[test]
    fn penalty_is_never_negative() {
        let tape = Tape::new();
        let x = tape.leaf(ArrayD::from_shape_fn(IxDyn(&[4, 3]), |i| {
            ((i[0] * 3 + i[1]) as f32 * 1.3).sin()
        }));
        let logits = x.mul(x).unwrap().sum_axis(1).unwrap().sigmoid();

        let penalty = gradient_penalty(logits, x).unwrap().item().unwrap();
        assert!(penalty >= 0.);
        assert!(penalty.is_finite());
    }
}
