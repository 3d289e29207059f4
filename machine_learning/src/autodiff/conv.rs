use ndarray::{Array3, Array4, ArrayD, Axis, Ix4, IxDyn, Zip};

use crate::{MlErr, Result};

/// The geometry of a 2D convolution over NHWC images with `'same'` padding.
///
/// It describes how an image of shape `[batch, in_h, in_w, channels]` is unfolded into a
/// matrix of patches of shape `[batch * out_h * out_w, kernel_h * kernel_w * channels]`,
/// each row holding the receptive field of one output position in `(ky, kx, c)` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvGeometry {
    pub batch: usize,
    pub in_h: usize,
    pub in_w: usize,
    pub channels: usize,
    pub kernel: (usize, usize),
    pub stride: (usize, usize),
    pub pad: (usize, usize),
    pub out_h: usize,
    pub out_w: usize,
}

impl ConvGeometry {
    /// Creates the geometry of a convolution using `'same'` padding: the output has
    /// `ceil(in / stride)` positions per axis and the padding is split with the smaller
    /// half before the image.
    ///
    /// # Arguments
    /// * `batch` - The amount of images.
    /// * `in_hw` - The height and width of the images.
    /// * `channels` - The amount of channels of the images.
    /// * `kernel` - The height and width of the kernel.
    /// * `stride` - The vertical and horizontal stride.
    pub fn same(
        batch: usize,
        in_hw: (usize, usize),
        channels: usize,
        kernel: (usize, usize),
        stride: (usize, usize),
    ) -> Self {
        let axis = |size: usize, k: usize, s: usize| {
            let out = size.div_ceil(s);
            let total = ((out.saturating_sub(1)) * s + k).saturating_sub(size);
            (out, total / 2)
        };

        let (out_h, pad_h) = axis(in_hw.0, kernel.0, stride.0);
        let (out_w, pad_w) = axis(in_hw.1, kernel.1, stride.1);

        Self {
            batch,
            in_h: in_hw.0,
            in_w: in_hw.1,
            channels,
            kernel,
            stride,
            pad: (pad_h, pad_w),
            out_h,
            out_w,
        }
    }

    /// The shape of the images this geometry applies to.
    pub fn image_shape(&self) -> [usize; 4] {
        [self.batch, self.in_h, self.in_w, self.channels]
    }

    /// The shape of the unfolded patch matrix.
    pub fn cols_shape(&self) -> [usize; 2] {
        [self.batch * self.out_h * self.out_w, self.patch_len()]
    }

    /// The amount of values in a single receptive field.
    pub fn patch_len(&self) -> usize {
        self.kernel.0 * self.kernel.1 * self.channels
    }

    /// Maps an output position and a kernel offset to an input position, if it falls
    /// inside the image.
    fn source(&self, (oy, ox): (usize, usize), (ky, kx): (usize, usize)) -> Option<(usize, usize)> {
        let iy = (oy * self.stride.0 + ky).checked_sub(self.pad.0)?;
        let ix = (ox * self.stride.1 + kx).checked_sub(self.pad.1)?;
        (iy < self.in_h && ix < self.in_w).then_some((iy, ix))
    }
}

/// Unfolds `x` into its patch matrix.
pub(crate) fn im2col(x: &ArrayD<f32>, geom: &ConvGeometry) -> Result<ArrayD<f32>> {
    if x.shape() != geom.image_shape() {
        return Err(MlErr::shape("im2col", x.shape(), &geom.image_shape()));
    }

    let img = x.view().into_dimensionality::<Ix4>()?;
    let positions = geom.out_h * geom.out_w;
    let mut cols = Array3::<f32>::zeros((geom.batch, positions, geom.patch_len()));
    let (kh, kw) = geom.kernel;
    let c = geom.channels;

    Zip::from(cols.axis_iter_mut(Axis(0)))
        .and(img.axis_iter(Axis(0)))
        .par_for_each(|mut cols, img| {
            for oy in 0..geom.out_h {
                for ox in 0..geom.out_w {
                    let row = oy * geom.out_w + ox;
                    for ky in 0..kh {
                        for kx in 0..kw {
                            let Some((iy, ix)) = geom.source((oy, ox), (ky, kx)) else {
                                continue;
                            };

                            let base = (ky * kw + kx) * c;
                            for ch in 0..c {
                                cols[[row, base + ch]] = img[[iy, ix, ch]];
                            }
                        }
                    }
                }
            }
        });

    Ok(cols.into_shape_with_order(IxDyn(&geom.cols_shape()))?)
}

/// Folds a patch matrix back into an image, summing overlapping contributions.
///
/// This is the adjoint of [`im2col`].
pub(crate) fn col2im(cols: &ArrayD<f32>, geom: &ConvGeometry) -> Result<ArrayD<f32>> {
    if cols.shape() != geom.cols_shape() {
        return Err(MlErr::shape("col2im", cols.shape(), &geom.cols_shape()));
    }

    let positions = geom.out_h * geom.out_w;
    let cols = cols.to_shape((geom.batch, positions, geom.patch_len()))?;
    let [n, h, w, c] = geom.image_shape();
    let mut img = Array4::<f32>::zeros((n, h, w, c));
    let (kh, kw) = geom.kernel;

    Zip::from(img.axis_iter_mut(Axis(0)))
        .and(cols.axis_iter(Axis(0)))
        .par_for_each(|mut img, cols| {
            for oy in 0..geom.out_h {
                for ox in 0..geom.out_w {
                    let row = oy * geom.out_w + ox;
                    for ky in 0..kh {
                        for kx in 0..kw {
                            let Some((iy, ix)) = geom.source((oy, ox), (ky, kx)) else {
                                continue;
                            };

                            let base = (ky * kw + kx) * c;
                            for ch in 0..c {
                                img[[iy, ix, ch]] += cols[[row, base + ch]];
                            }
                        }
                    }
                }
            }
        });

    Ok(img.into_dyn())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_padding_halves_with_stride_two() {
        let geom = ConvGeometry::same(1, (28, 28), 1, (5, 5), (2, 2));
        assert_eq!((geom.out_h, geom.out_w), (14, 14));
        assert_eq!(geom.pad, (1, 1));

        let geom = ConvGeometry::same(1, (7, 7), 1, (5, 5), (2, 2));
        assert_eq!((geom.out_h, geom.out_w), (4, 4));
        assert_eq!(geom.pad, (2, 2));
    }

    #[test]
    fn same_padding_keeps_size_with_unit_stride() {
        let geom = ConvGeometry::same(2, (4, 4), 3, (5, 5), (1, 1));
        assert_eq!((geom.out_h, geom.out_w), (4, 4));
        assert_eq!(geom.pad, (2, 2));
        assert_eq!(geom.cols_shape(), [32, 75]);
    }

    #[test]
    fn non_overlapping_kernel_needs_no_padding() {
        let geom = ConvGeometry::same(1, (8, 8), 2, (2, 2), (2, 2));
        assert_eq!((geom.out_h, geom.out_w), (4, 4));
        assert_eq!(geom.pad, (0, 0));
    }

    #[test]
    fn im2col_gathers_receptive_fields() {
        // 1x3x3x1 image with values 1..=9 and a 3x3 kernel: the center patch is the image.
        let x = ArrayD::from_shape_vec(IxDyn(&[1, 3, 3, 1]), (1..=9).map(|v| v as f32).collect())
            .unwrap();
        let geom = ConvGeometry::same(1, (3, 3), 1, (3, 3), (1, 1));
        let cols = im2col(&x, &geom).unwrap();

        assert_eq!(cols.shape(), &[9, 9]);
        let center: Vec<f32> = cols.index_axis(Axis(0), 4).iter().copied().collect();
        assert_eq!(center, (1..=9).map(|v| v as f32).collect::<Vec<_>>());

        // The top left patch is padded with zeros above and to the left.
        let corner: Vec<f32> = cols.index_axis(Axis(0), 0).iter().copied().collect();
        assert_eq!(corner, vec![0., 0., 0., 0., 1., 2., 0., 4., 5.]);
    }

    #[test]
    fn col2im_is_the_adjoint_of_im2col() {
        let geom = ConvGeometry::same(2, (5, 4), 3, (3, 2), (2, 1));
        let x = ArrayD::from_shape_fn(IxDyn(&geom.image_shape()), |idx| {
            (idx[0] * 7 + idx[1] * 5 + idx[2] * 3 + idx[3]) as f32 * 0.1 - 1.0
        });
        let c = ArrayD::from_shape_fn(IxDyn(&geom.cols_shape()), |idx| {
            ((idx[0] * 13 + idx[1] * 3) % 11) as f32 * 0.2 - 0.5
        });

        let lhs: f32 = (&im2col(&x, &geom).unwrap() * &c).sum();
        let rhs: f32 = (&x * &col2im(&c, &geom).unwrap()).sum();
        assert!((lhs - rhs).abs() < 1e-3, "{lhs} != {rhs}");
    }

    #[test]
    fn im2col_rejects_mismatched_images() {
        let geom = ConvGeometry::same(1, (4, 4), 1, (2, 2), (2, 2));
        let x = ArrayD::zeros(IxDyn(&[1, 4, 4, 2]));
        assert!(matches!(
            im2col(&x, &geom),
            Err(MlErr::ShapeMismatch { what: "im2col", .. })
        ));
    }
}
