use ndarray::{Array4, ArrayD};

use crate::error::Result;

/// A batch of real images, with pixel values in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Images of shape `[batch, height, width, channels]`.
    pub images: Array4<f32>,
    /// Optional labels, one row per image.
    pub labels: Option<ArrayD<f32>>,
}

/// Where training batches come from.
///
/// A source yields batches until the epoch is exhausted, then `None` until it is reset.
pub trait DataSource {
    /// The height of every image.
    fn patch_h(&self) -> usize;

    /// The width of every image.
    fn patch_w(&self) -> usize;

    fn n_channels(&self) -> usize;

    fn batch_size(&self) -> usize;

    /// Returns the next batch of the current epoch, if any.
    fn next_batch(&mut self) -> Result<Option<Batch>>;

    /// Starts a new epoch.
    fn reset(&mut self);
}
