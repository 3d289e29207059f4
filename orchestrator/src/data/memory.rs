use std::{fs, path::Path};

use log::debug;
use ndarray::{Array4, ArrayD, Axis, Ix4, IxDyn};
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use safetensors::SafeTensors;

use super::{Batch, DataSource};
use crate::{
    error::{OrchestratorError, Result},
    tensor_io,
};

/// A data source holding every image in memory.
///
/// Only full batches are yielded, the remainder of an epoch is dropped.
#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    images: Array4<f32>,
    labels: Option<ArrayD<f32>>,
    batch_size: usize,
    order: Vec<usize>,
    cursor: usize,
    shuffler: Option<StdRng>,
}

impl InMemoryDataset {
    /// Creates a new `InMemoryDataset` that yields images in order.
    ///
    /// # Arguments
    /// * `images` - Every image, of shape `[n, height, width, channels]` with values in `[0, 1]`.
    /// * `labels` - Optional labels whose first axis has length `n`.
    /// * `batch_size` - The amount of images per batch.
    ///
    /// # Returns
    /// A `Data` error if there is not a single full batch, the labels do not match the
    /// images or a pixel is out of range.
    pub fn new(
        images: Array4<f32>,
        labels: Option<ArrayD<f32>>,
        batch_size: usize,
    ) -> Result<Self> {
        let n = images.len_of(Axis(0));

        if batch_size == 0 || batch_size > n {
            return Err(OrchestratorError::Data(format!(
                "cannot make batches of {batch_size} out of {n} images"
            )));
        }

        if let Some(labels) = &labels {
            if labels.ndim() == 0 || labels.len_of(Axis(0)) != n {
                return Err(OrchestratorError::Data(format!(
                    "{n} images but labels of shape {:?}",
                    labels.shape()
                )));
            }
        }

        if images.iter().any(|p| !(0. ..=1.).contains(p)) {
            return Err(OrchestratorError::Data(
                "pixel values must be in [0, 1]".into(),
            ));
        }

        Ok(Self {
            images,
            labels,
            batch_size,
            order: (0..n).collect(),
            cursor: 0,
            shuffler: None,
        })
    }

    /// Reads a safetensors file with an `images` tensor and an optional `labels` one.
    pub fn load<P: AsRef<Path>>(path: P, batch_size: usize) -> Result<Self> {
        let path = path.as_ref();
        let buffer = fs::read(path)?;
        let tensors = SafeTensors::deserialize(&buffer)
            .map_err(|e| OrchestratorError::Data(format!("{}: {e}", path.display())))?;

        let read = |name: &str| -> Result<Option<ArrayD<f32>>> {
            let view = match tensors.tensor(name) {
                Ok(view) => view,
                Err(_) => return Ok(None),
            };

            let data = tensor_io::read_f32(name, &view).map_err(OrchestratorError::Data)?;
            let array = ArrayD::from_shape_vec(IxDyn(view.shape()), data)
                .map_err(|e| OrchestratorError::Data(format!("{name}: {e}")))?;
            Ok(Some(array))
        };

        let images = read("images")?
            .ok_or_else(|| OrchestratorError::Data(format!("{} has no images", path.display())))?
            .into_dimensionality::<Ix4>()
            .map_err(|e| OrchestratorError::Data(format!("images must be NHWC: {e}")))?;
        let labels = read("labels")?;

        debug!(images = images.len_of(Axis(0)); "loaded {}", path.display());
        Self::new(images, labels, batch_size)
    }

    /// Reshuffles the images on every reset, starting now.
    ///
    /// Without a seed the shuffling is seeded from the operating system.
    pub fn shuffled(mut self, seed: Option<u64>) -> Self {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        self.order.shuffle(&mut rng);
        self.shuffler = Some(rng);
        self
    }

    /// Returns the amount of images.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Returns the amount of batches yielded per epoch.
    pub fn batches_per_epoch(&self) -> usize {
        self.len() / self.batch_size
    }
}

impl DataSource for InMemoryDataset {
    fn patch_h(&self) -> usize {
        self.images.len_of(Axis(1))
    }

    fn patch_w(&self) -> usize {
        self.images.len_of(Axis(2))
    }

    fn n_channels(&self) -> usize {
        self.images.len_of(Axis(3))
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn next_batch(&mut self) -> Result<Option<Batch>> {
        let end = self.cursor + self.batch_size;
        if end > self.order.len() {
            return Ok(None);
        }

        let indices = &self.order[self.cursor..end];
        self.cursor = end;

        Ok(Some(Batch {
            images: self.images.select(Axis(0), indices),
            labels: self.labels.as_ref().map(|l| l.select(Axis(0), indices)),
        }))
    }

    fn reset(&mut self) {
        self.cursor = 0;
        if let Some(rng) = &mut self.shuffler {
            self.order.shuffle(rng);
        }
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{Array1, Array4};

    use super::*;

    fn images(n: usize) -> Array4<f32> {
        Array4::from_shape_fn((n, 2, 2, 1), |(i, ..)| i as f32 / n as f32)
    }

    fn firsts(data: &mut InMemoryDataset) -> Vec<f32> {
        let mut seen = Vec::new();
        while let Some(batch) = data.next_batch().unwrap() {
            seen.extend(batch.images.outer_iter().map(|img| img[[0, 0, 0]]));
        }
        seen
    }

    #[test]
    fn epochs_drop_the_remainder() {
        let mut data = InMemoryDataset::new(images(5), None, 2).unwrap();
        assert_eq!(data.batches_per_epoch(), 2);
        assert_eq!(firsts(&mut data), [0., 0.2, 0.4, 0.6]);
        assert_eq!(data.next_batch().unwrap(), None);

        data.reset();
        assert_eq!(firsts(&mut data).len(), 4);
    }

    #[test]
    fn labels_follow_their_images() {
        let labels = Array1::from_iter((0..6).map(|i| i as f32)).into_dyn();
        let mut data = InMemoryDataset::new(images(6), Some(labels), 3)
            .unwrap()
            .shuffled(Some(1));

        while let Some(batch) = data.next_batch().unwrap() {
            let labels = batch.labels.unwrap();
            for (img, label) in batch.images.outer_iter().zip(labels.iter()) {
                assert_eq!(img[[0, 0, 0]], label / 6.);
            }
        }
    }

    #[test]
    fn shuffling_visits_every_image() {
        let mut data = InMemoryDataset::new(images(8), None, 2)
            .unwrap()
            .shuffled(Some(3));

        for _ in 0..3 {
            let mut seen = firsts(&mut data);
            seen.sort_by(f32::total_cmp);
            let expected: Vec<_> = (0..8).map(|i| i as f32 / 8.).collect();
            assert_eq!(seen, expected);
            data.reset();
        }
    }

    #[test]
    fn invalid_datasets_are_rejected() {
        assert!(InMemoryDataset::new(images(2), None, 3).is_err());
        assert!(InMemoryDataset::new(images(2), None, 0).is_err());
        assert!(InMemoryDataset::new(images(2) + 1.5, None, 1).is_err());

        let labels = Array1::<f32>::zeros(3).into_dyn();
        assert!(InMemoryDataset::new(images(2), Some(labels), 1).is_err());
    }
}
