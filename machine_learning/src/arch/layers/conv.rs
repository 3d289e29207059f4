use rand::Rng;

use super::{Forward, Init};
use crate::{
    MlErr, Result,
    autodiff::{ConvGeometry, Var},
    initialization::{ConstParamGen, RandParamGen},
    params::ParamKey,
};

/// The hyperparameters shared by both convolution flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvSpec {
    pub in_channels: usize,
    pub filters: usize,
    pub kernel: (usize, usize),
    pub stride: (usize, usize),
}

impl ConvSpec {
    fn validate(&self) -> Result<()> {
        let ConvSpec {
            in_channels,
            filters,
            kernel,
            stride,
        } = *self;

        if in_channels == 0 || filters == 0 || kernel.0 == 0 || kernel.1 == 0 {
            return Err(MlErr::InvalidSpec(format!("empty convolution {self:?}")));
        }

        if stride.0 == 0 || stride.1 == 0 {
            return Err(MlErr::InvalidSpec(format!("zero stride in {self:?}")));
        }

        Ok(())
    }

    /// Registers a Xavier uniform kernel of the given shape and a zero bias.
    fn register<R: Rng>(
        &self,
        name: &str,
        kernel_shape: [usize; 4],
        init: &mut Init<'_, R>,
    ) -> Result<(ParamKey, ParamKey)> {
        self.validate()?;

        let area = self.kernel.0 * self.kernel.1;
        let size = kernel_shape.iter().product();
        let (fan_in, fan_out) = (area * self.in_channels, area * self.filters);

        let mut kernel_gen = RandParamGen::xavier_uniform(init.rng(), size, fan_in, fan_out)?;
        let kernel = init
            .params
            .register(&format!("{name}/kernel"), &kernel_shape, &mut kernel_gen)?;

        let mut bias_gen = ConstParamGen::zeros(self.filters);
        let bias = init
            .params
            .register(&format!("{name}/bias"), &[self.filters], &mut bias_gen)?;

        Ok((kernel, bias))
    }
}

/// Checks that `x` is a batch of NHWC images with `channels` channels.
fn image_dims(x: Var<'_>, channels: usize, what: &'static str) -> Result<(usize, usize, usize)> {
    let shape = x.shape();
    match *shape.as_slice() {
        [n, h, w, c] if c == channels => Ok((n, h, w)),
        _ => Err(MlErr::shape(what, &shape, &[0, 0, 0, channels])),
    }
}

/// A 2D convolution with `'same'` padding over NHWC images.
///
/// The kernel has shape `[kernel_h, kernel_w, in_channels, filters]`.
#[derive(Debug, Clone)]
pub struct Conv2d {
    spec: ConvSpec,
    kernel: ParamKey,
    bias: ParamKey,
}

impl Conv2d {
    pub fn new<R: Rng>(name: &str, spec: ConvSpec, init: &mut Init<'_, R>) -> Result<Self> {
        let (kh, kw) = spec.kernel;
        let (kernel, bias) = spec.register(name, [kh, kw, spec.in_channels, spec.filters], init)?;

        Ok(Self { spec, kernel, bias })
    }

    /// Returns the spatial size of the output for an input of size `(h, w)`.
    pub fn output_hw(&self, (h, w): (usize, usize)) -> (usize, usize) {
        let ConvSpec {
            in_channels,
            kernel,
            stride,
            ..
        } = self.spec;

        let geom = ConvGeometry::same(1, (h, w), in_channels, kernel, stride);
        (geom.out_h, geom.out_w)
    }

    pub fn forward<'t>(&self, x: Var<'t>, fwd: &mut Forward<'_, 't>) -> Result<Var<'t>> {
        let ConvSpec {
            in_channels,
            filters,
            kernel,
            stride,
        } = self.spec;

        let (n, h, w) = image_dims(x, in_channels, "conv2d input")?;
        let geom = ConvGeometry::same(n, (h, w), in_channels, kernel, stride);

        let k = fwd
            .params
            .get(self.kernel)?
            .reshape(&[geom.patch_len(), filters])?;
        let bias = fwd.params.get(self.bias)?;

        x.im2col(geom)?
            .matmul(k)?
            .add(bias)?
            .reshape(&[n, geom.out_h, geom.out_w, filters])
    }
}

/// A 2D transposed convolution with `'same'` padding over NHWC images.
///
/// It is the adjoint of a [`Conv2d`] that maps the upsampled image back to the input, so the
/// output has `in * stride` positions per axis. The kernel has shape
/// `[kernel_h, kernel_w, filters, in_channels]`.
#[derive(Debug, Clone)]
pub struct ConvTranspose2d {
    spec: ConvSpec,
    kernel: ParamKey,
    bias: ParamKey,
}

impl ConvTranspose2d {
    pub fn new<R: Rng>(name: &str, spec: ConvSpec, init: &mut Init<'_, R>) -> Result<Self> {
        let (kh, kw) = spec.kernel;
        let (kernel, bias) = spec.register(name, [kh, kw, spec.filters, spec.in_channels], init)?;

        Ok(Self { spec, kernel, bias })
    }

    pub fn forward<'t>(&self, x: Var<'t>, fwd: &mut Forward<'_, 't>) -> Result<Var<'t>> {
        let ConvSpec {
            in_channels,
            filters,
            kernel,
            stride,
        } = self.spec;

        let (n, h, w) = image_dims(x, in_channels, "conv2d_transpose input")?;
        let out_hw = (h * stride.0, w * stride.1);
        let geom = ConvGeometry::same(n, out_hw, filters, kernel, stride);

        let k = fwd
            .params
            .get(self.kernel)?
            .reshape(&[geom.patch_len(), in_channels])?
            .t()?;
        let bias = fwd.params.get(self.bias)?;

        x.reshape(&[n * h * w, in_channels])?
            .matmul(k)?
            .col2im(geom)?
            .add(bias)
    }
}
