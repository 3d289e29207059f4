use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::{Path, PathBuf},
};

use log::info;
use ndarray::{Array2, Array4};

use crate::{
    error::{OrchestratorError, Result},
    tensor_io::{self, Entry},
};

/// Keeps the images generated along a training run.
pub trait SampleStore {
    /// Stores generated images and the latent vectors they came from.
    ///
    /// # Arguments
    /// * `slot` - The index of this sample in the run.
    /// * `images` - Images of shape `[n_images, height, width, channels]`.
    /// * `latents` - Latent vectors of shape `[n_images, z_dim]`.
    fn store(&mut self, slot: usize, images: &Array4<f32>, latents: &Array2<f32>) -> Result<()>;
}

/// Writes every slot to `<out>/<model_name>/samples/slot-<k>.safetensors`.
#[derive(Debug, Clone)]
pub struct SafetensorsSampleStore {
    dir: PathBuf,
}

impl SafetensorsSampleStore {
    pub fn new<P: AsRef<Path>>(out: P, model_name: &str) -> Result<Self> {
        let dir = out.as_ref().join(model_name).join("samples");
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn path(&self, slot: usize) -> PathBuf {
        self.dir.join(format!("slot-{slot}.safetensors"))
    }
}

impl SampleStore for SafetensorsSampleStore {
    fn store(&mut self, slot: usize, images: &Array4<f32>, latents: &Array2<f32>) -> Result<()> {
        let images_data: Vec<f32> = images.iter().copied().collect();
        let latents_data: Vec<f32> = latents.iter().copied().collect();

        let entries = [
            Entry {
                name: "images".into(),
                shape: images.shape().to_vec(),
                data: &images_data,
            },
            Entry {
                name: "latents".into(),
                shape: latents.shape().to_vec(),
                data: &latents_data,
            },
        ];

        let metadata = HashMap::from([("slot".to_string(), slot.to_string())]);
        let path = self.path(slot);
        tensor_io::write(&path, &entries, metadata)
            .map_err(|e| OrchestratorError::Io(std::io::Error::other(e.to_string())))?;

        info!(slot = slot; "samples stored to {}", path.display());
        Ok(())
    }
}

/// Keeps every slot in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySampleStore {
    slots: BTreeMap<usize, (Array4<f32>, Array2<f32>)>,
}

impl MemorySampleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the images and latent vectors of a slot.
    pub fn get(&self, slot: usize) -> Option<(&Array4<f32>, &Array2<f32>)> {
        self.slots.get(&slot).map(|(images, latents)| (images, latents))
    }

    /// Returns the slots stored so far, in order.
    pub fn slots(&self) -> Vec<usize> {
        self.slots.keys().copied().collect()
    }
}

impl SampleStore for MemorySampleStore {
    fn store(&mut self, slot: usize, images: &Array4<f32>, latents: &Array2<f32>) -> Result<()> {
        self.slots.insert(slot, (images.clone(), latents.clone()));
        Ok(())
    }
}
