use rand::Rng;

use super::{Forward, Init};
use crate::{
    MlErr, Result,
    autodiff::Var,
    initialization::{ConstParamGen, RandParamGen},
    params::ParamKey,
};

/// A fully connected layer, `x @ kernel + bias`.
#[derive(Debug, Clone)]
pub struct Dense {
    dim: (usize, usize),
    kernel: ParamKey,
    bias: ParamKey,
}

impl Dense {
    /// Creates a new `Dense` layer, registering its kernel and bias.
    ///
    /// The kernel is initialized with Xavier uniform and the bias with zeros.
    ///
    /// # Arguments
    /// * `name` - The scope of the layer's parameters.
    /// * `dim` - The amount of input and output units.
    /// * `init` - Where to register the parameters.
    pub fn new<R: Rng>(name: &str, dim: (usize, usize), init: &mut Init<'_, R>) -> Result<Self> {
        let (fan_in, fan_out) = dim;
        let size = fan_in * fan_out;

        let mut kernel_gen = RandParamGen::xavier_uniform(init.rng(), size, fan_in, fan_out)?;
        let kernel = init
            .params
            .register(&format!("{name}/kernel"), &[fan_in, fan_out], &mut kernel_gen)?;

        let mut bias_gen = ConstParamGen::zeros(fan_out);
        let bias = init
            .params
            .register(&format!("{name}/bias"), &[fan_out], &mut bias_gen)?;

        Ok(Self { dim, kernel, bias })
    }

    /// Returns the amount of input and output units.
    pub fn dim(&self) -> (usize, usize) {
        self.dim
    }

    pub fn forward<'t>(&self, x: Var<'t>, fwd: &mut Forward<'_, 't>) -> Result<Var<'t>> {
        let shape = x.shape();
        if shape.len() != 2 || shape[1] != self.dim.0 {
            let rows = shape.first().copied().unwrap_or(1);
            return Err(MlErr::shape("dense input", &shape, &[rows, self.dim.0]));
        }

        let kernel = fwd.params.get(self.kernel)?;
        let bias = fwd.params.get(self.bias)?;
        x.matmul(kernel)?.add(bias)
    }
}
