use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use log::{info, warn};
use machine_learning::{NamedTensor, RaSganGp};
use safetensors::SafeTensors;

use crate::{
    error::{OrchestratorError, Result},
    tensor_io::{self, Entry},
};

/// Persists the state of a model during training.
pub trait CheckpointWriter {
    /// Saves every parameter and normalization statistic of `model` as of `step`.
    fn save(&mut self, step: usize, model: &RaSganGp) -> Result<()>;
}

/// Writes one safetensors file per checkpoint.
///
/// Files live in `<out>/<model_name>/checkpoints/<model_name>-<step>.safetensors`, so a
/// checkpoint never overwrites an earlier step.
#[derive(Debug, Clone)]
pub struct SafetensorsCheckpointer {
    dir: PathBuf,
    model_name: String,
}

impl SafetensorsCheckpointer {
    /// Creates a new `SafetensorsCheckpointer`, creating its directory if needed.
    pub fn new<P: AsRef<Path>>(out: P, model_name: &str) -> Result<Self> {
        let dir = out.as_ref().join(model_name).join("checkpoints");
        fs::create_dir_all(&dir)?;

        Ok(Self {
            dir,
            model_name: model_name.to_string(),
        })
    }

    /// Returns the file the checkpoint of `step` is written to.
    pub fn path(&self, step: usize) -> PathBuf {
        self.dir
            .join(format!("{}-{step}.safetensors", self.model_name))
    }
}

impl CheckpointWriter for SafetensorsCheckpointer {
    fn save(&mut self, step: usize, model: &RaSganGp) -> Result<()> {
        let state = model.state();
        let entries: Vec<_> = state
            .iter()
            .map(|tensor| Entry {
                name: tensor.name.clone(),
                shape: tensor.shape.clone(),
                data: &tensor.data,
            })
            .collect();

        let metadata = HashMap::from([
            ("model_name".to_string(), model.spec().model_name.clone()),
            ("step".to_string(), step.to_string()),
        ]);

        let path = self.path(step);
        tensor_io::write(&path, &entries, metadata)
            .map_err(|e| OrchestratorError::Checkpoint(format!("{}: {e}", path.display())))?;

        info!(step = step, tensors = entries.len(); "checkpoint saved to {}", path.display());
        Ok(())
    }
}

/// Restores a model from a checkpoint file.
///
/// Every tensor of the model must be present with its exact shape. The model is left
/// untouched on error.
///
/// # Returns
/// The step the checkpoint was taken at.
pub fn load_checkpoint<P: AsRef<Path>>(path: P, model: &mut RaSganGp) -> Result<usize> {
    let path = path.as_ref();
    let err = |e: String| OrchestratorError::Checkpoint(format!("{}: {e}", path.display()));

    let buffer = fs::read(path)?;
    let metadata = tensor_io::metadata(&buffer).map_err(|e| err(e.to_string()))?;
    let tensors = SafeTensors::deserialize(&buffer).map_err(|e| err(e.to_string()))?;

    let step = metadata
        .get("step")
        .and_then(|step| step.parse().ok())
        .ok_or_else(|| err("missing step".into()))?;

    if let Some(name) = metadata.get("model_name") {
        if *name != model.spec().model_name {
            warn!("loading a checkpoint of {name} into {}", model.spec().model_name);
        }
    }

    let state = tensors
        .tensors()
        .into_iter()
        .map(|(name, view)| {
            let data = tensor_io::read_f32(&name, &view).map_err(&err)?;
            let shape = view.shape().to_vec();
            Ok(NamedTensor { name, shape, data })
        })
        .collect::<Result<Vec<_>>>()?;

    model.load_state(&state)?;
    info!(step = step; "checkpoint restored from {}", path.display());
    Ok(step)
}
