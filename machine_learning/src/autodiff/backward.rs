use ndarray::ArrayD;

use super::tape::{Op, Tape, Var};
use crate::Result;

impl Tape {
    /// Computes the gradients of `output` with respect to each variable in `wrt`.
    ///
    /// The output is seeded with ones of its own shape, so a non scalar output is
    /// differentiated as the sum of its elements. The gradient computation is recorded on
    /// this same tape, which means the returned variables can be differentiated again.
    ///
    /// A variable in `wrt` that `output` does not depend on gets a zero gradient.
    ///
    /// # Arguments
    /// * `output` - The variable to differentiate.
    /// * `wrt` - The variables to differentiate with respect to.
    ///
    /// # Returns
    /// One gradient per variable in `wrt`, each one shaped like its variable.
    pub fn gradients<'t>(&'t self, output: Var<'t>, wrt: &[Var<'t>]) -> Result<Vec<Var<'t>>> {
        let end = output.id + 1;
        let Some(start) = wrt.iter().map(|v| v.id).filter(|&id| id < end).min() else {
            return Ok(wrt.iter().map(|v| self.zeros_like(*v)).collect());
        };

        // A node is live when it depends on some variable in `wrt`.
        let mut live = vec![false; end];
        for v in wrt.iter().filter(|v| v.id < end) {
            live[v.id] = true;
        }

        for id in start..end {
            if !live[id] {
                let (parents, n) = self.op(id).parents();
                live[id] = parents[..n].iter().any(|&p| live[p]);
            }
        }

        let mut grads: Vec<Option<Var<'t>>> = vec![None; end];
        if live[output.id] {
            let ones = ArrayD::ones(output.value().raw_dim());
            grads[output.id] = Some(self.leaf(ones));
        }

        for id in (start..end).rev() {
            let Some(g) = grads[id] else {
                continue;
            };

            for (parent, contribution) in self.vjp(id, g, &live)? {
                grads[parent] = Some(match grads[parent] {
                    Some(acc) => acc.add(contribution)?,
                    None => contribution,
                });
            }
        }

        let result = wrt
            .iter()
            .map(|v| {
                grads
                    .get(v.id)
                    .copied()
                    .flatten()
                    .unwrap_or_else(|| self.zeros_like(*v))
            })
            .collect();

        Ok(result)
    }

    fn zeros_like<'t>(&'t self, v: Var<'t>) -> Var<'t> {
        self.leaf(ArrayD::zeros(v.value().raw_dim()))
    }

    /// Pulls the gradient `g` of node `id` back to its live parents.
    fn vjp<'t>(&'t self, id: usize, g: Var<'t>, live: &[bool]) -> Result<Vec<(usize, Var<'t>)>> {
        let want = |p: usize| live[p];
        let out = self.var(id);
        let mut pulled = Vec::with_capacity(2);

        match self.op(id) {
            Op::Leaf => {}
            Op::Add(a, b) => {
                if want(a) {
                    pulled.push((a, self.unbroadcast(g, a)?));
                }
                if want(b) {
                    pulled.push((b, self.unbroadcast(g, b)?));
                }
            }
            Op::Sub(a, b) => {
                if want(a) {
                    pulled.push((a, self.unbroadcast(g, a)?));
                }
                if want(b) {
                    pulled.push((b, self.unbroadcast(g.neg(), b)?));
                }
            }
            Op::Mul(a, b) => {
                let (va, vb) = (self.var(a), self.var(b));
                if want(a) {
                    pulled.push((a, self.unbroadcast(g.mul(vb)?, a)?));
                }
                if want(b) {
                    pulled.push((b, self.unbroadcast(g.mul(va)?, b)?));
                }
            }
            Op::Div(a, b) => {
                let vb = self.var(b);
                if want(a) {
                    pulled.push((a, self.unbroadcast(g.div(vb)?, a)?));
                }
                if want(b) {
                    // d(a / b)/db = -(a / b) / b
                    let gb = g.mul(out)?.div(vb)?.neg();
                    pulled.push((b, self.unbroadcast(gb, b)?));
                }
            }
            Op::Neg(a) => pulled.push((a, g.neg())),
            Op::Scale(a, factor) => pulled.push((a, g.scale(factor))),
            Op::AddScalar(a) => pulled.push((a, g)),
            Op::MatMul(a, b) => {
                let (va, vb) = (self.var(a), self.var(b));
                if want(a) {
                    pulled.push((a, g.matmul(vb.t()?)?));
                }
                if want(b) {
                    pulled.push((b, va.t()?.matmul(g)?));
                }
            }
            Op::Transpose(a) => pulled.push((a, g.t()?)),
            Op::Reshape(a) => pulled.push((a, g.reshape(&self.var(a).shape())?)),
            Op::Sum(a) | Op::SumAxis(a) | Op::SumTo(a) => {
                pulled.push((a, g.broadcast_to(&self.var(a).shape())?))
            }
            Op::BroadcastTo(a) => pulled.push((a, g.sum_to(&self.var(a).shape())?)),
            Op::LeakyRelu(a, alpha) => {
                // The slope is piecewise constant, so the mask carries no gradient itself.
                let mask = self.value(a).mapv(|x| if x > 0. { 1. } else { alpha });
                pulled.push((a, g.mul(self.leaf(mask))?));
            }
            Op::Sigmoid(a) => {
                let slope = out.mul(out.neg().add_scalar(1.))?;
                pulled.push((a, g.mul(slope)?));
            }
            Op::Softplus(a) => pulled.push((a, g.mul(self.var(a).sigmoid())?)),
            Op::Sqrt(a) => pulled.push((a, g.div(out)?.scale(0.5))),
            Op::Im2Col(a, geom) => pulled.push((a, g.col2im(geom)?)),
            Op::Col2Im(a, geom) => pulled.push((a, g.im2col(geom)?)),
        }

        Ok(pulled)
    }

    /// Reduces a gradient to the shape of the operand it flows into, undoing broadcasting.
    fn unbroadcast<'t>(&'t self, g: Var<'t>, parent: usize) -> Result<Var<'t>> {
        let shape = self.var(parent).shape();
        if g.shape() == shape {
            return Ok(g);
        }

        g.sum_to(&shape)
    }
}

impl<'t> Var<'t> {
    /// Shorthand for [`Tape::gradients`] with this variable as output.
    pub fn grad(self, wrt: &[Var<'t>]) -> Result<Vec<Var<'t>>> {
        self.tape.gradients(self, wrt)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{ArrayD, IxDyn, array};

    use super::*;
    use crate::autodiff::ConvGeometry;

    const H: f32 = 1e-2;

    /// Compares the gradient of `f` at `x` against central finite differences.
    fn check<F>(x: ArrayD<f32>, f: F)
    where
        F: for<'t> Fn(Var<'t>) -> Var<'t>,
    {
        let tape = Tape::new();
        let v = tape.leaf(x.clone());
        let y = f(v).sum();
        let analytic: Vec<f32> = y.grad(&[v]).unwrap()[0].value().iter().copied().collect();

        for i in 0..x.len() {
            let eval = |delta: f32| {
                let mut x = x.clone();
                x.as_slice_mut().unwrap()[i] += delta;
                let tape = Tape::new();
                f(tape.leaf(x)).sum().item().unwrap()
            };

            let numeric = (eval(H) - eval(-H)) / (2. * H);
            let got = analytic[i];
            assert!(
                (numeric - got).abs() < 2e-2 * (1. + numeric.abs()),
                "element {i}: numeric {numeric} vs analytic {got}"
            );
        }
    }

    #[test]
    fn elementwise_gradients_match_finite_differences() {
        let x = array![[0.3, -1.2, 2.0], [1.5, -0.4, 0.7]].into_dyn();

        check(x.clone(), |v| v.sigmoid());
        check(x.clone(), |v| v.softplus());
        check(x.clone(), |v| v.leaky_relu(0.2));
        check(x.clone(), |v| v.mul(v).unwrap().scale(3.).add_scalar(1.));
        check(x.mapv(f32::abs), |v| v.add_scalar(1.).sqrt());
        check(x.clone(), |v| v.div(v.sigmoid()).unwrap());
    }

    #[test]
    fn broadcasting_gradients_match_finite_differences() {
        let x = array![[0.3, -1.2, 2.0], [1.5, -0.4, 0.7]].into_dyn();

        check(x.clone(), |v| {
            let mean = v.mean_axis(0).unwrap();
            let centered = v.sub(mean).unwrap();
            centered.mul(centered).unwrap()
        });
        check(x.clone(), |v| {
            let row = v.sum_axis(1).unwrap();
            v.mul(row).unwrap().sigmoid()
        });
    }

    #[test]
    fn matmul_gradients_match_finite_differences() {
        let x = array![[0.3, -1.2], [1.5, -0.4], [0.1, 0.9]].into_dyn();
        let w = array![[0.5, -0.3, 0.2], [0.1, 0.4, -0.6]].into_dyn();

        check(x, move |v| {
            let w = v.tape().leaf(w.clone());
            v.matmul(w).unwrap().t().unwrap().sigmoid()
        });
    }

    #[test]
    fn convolution_gradients_match_finite_differences() {
        let geom = ConvGeometry::same(2, (4, 4), 2, (3, 3), (2, 2));
        let x = ArrayD::from_shape_fn(IxDyn(&geom.image_shape()), |idx| {
            ((idx[0] + 2 * idx[1] + 3 * idx[2] + 5 * idx[3]) % 7) as f32 * 0.3 - 0.9
        });
        let kernel = ArrayD::from_shape_fn(IxDyn(&[geom.patch_len(), 3]), |idx| {
            ((idx[0] * 3 + idx[1]) % 5) as f32 * 0.1 - 0.2
        });

        check(x, move |v| {
            let k = v.tape().leaf(kernel.clone());
            v.im2col(geom).unwrap().matmul(k).unwrap().softplus()
        });
    }

    #[test]
    fn unrelated_variables_get_zero_gradients() {
        let tape = Tape::new();
        let a = tape.leaf(array![1., 2.].into_dyn());
        let b = tape.leaf(array![3., 4., 5.].into_dyn());

        let grads = a.mul(a).unwrap().sum().grad(&[a, b]).unwrap();
        assert_eq!(*grads[0].value(), array![2., 4.].into_dyn());
        assert_eq!(*grads[1].value(), ArrayD::zeros(IxDyn(&[3])));
    }

    #[test]
    fn gradients_are_differentiable() {
        // f(x) = sum(x^3), f'(x) = 3x^2, and d/dx sum(f'(x)) = 6x.
        let tape = Tape::new();
        let x = tape.leaf(array![0.5, -1., 2.].into_dyn());
        let cube = x.mul(x).unwrap().mul(x).unwrap().sum();

        let first = cube.grad(&[x]).unwrap()[0];
        assert_eq!(*first.value(), array![0.75, 3., 12.].into_dyn());

        let second = first.sum().grad(&[x]).unwrap()[0];
        assert_eq!(*second.value(), array![3., -6., 12.].into_dyn());
    }

    #[test]
    fn gradient_norm_penalty_is_differentiable_through_parameters() {
        // y = sigmoid(x w), penalty = (|dy/dx| - 1)^2 and its gradient w.r.t. w by finite
        // differences, which is the shape of a gradient penalty.
        let x = array![[0.4, -0.8]].into_dyn();
        let penalty = |w: ArrayD<f32>| -> (f32, Vec<f32>) {
            let tape = Tape::new();
            let x = tape.leaf(x.clone());
            let wv = tape.leaf(w);
            let y = x.matmul(wv).unwrap().sigmoid();
            let gx = y.grad(&[x]).unwrap()[0];
            let norm = gx.square().unwrap().sum().add_scalar(1e-12).sqrt();
            let p = norm.add_scalar(-1.).square().unwrap();
            let gw = p.grad(&[wv]).unwrap()[0].value();
            (p.item().unwrap(), gw.iter().copied().collect::<Vec<_>>())
        };

        let w = array![[1.5], [-2.0]].into_dyn();
        let (_, analytic) = penalty(w.clone());

        for i in 0..2 {
            let shifted = |delta: f32| {
                let mut w = w.clone();
                w.as_slice_mut().unwrap()[i] += delta;
                penalty(w).0
            };
            let numeric = (shifted(H) - shifted(-H)) / (2. * H);
            let got = analytic[i];
            assert!((numeric - got).abs() < 2e-2 * (1. + numeric.abs()), "{numeric} vs {got}");
        }
    }
}
