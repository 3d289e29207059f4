use log::info;
use machine_learning::RaSganGp;

use crate::{
    configs::{Adapter, Config},
    data::DataSource,
    error::Result,
    storage::{CheckpointWriter, SafetensorsCheckpointer, SafetensorsSampleStore, SampleStore},
    trainer::{TrainReport, Trainer},
};

/// A training run together with everything it needs.
///
/// It owns the model and its collaborators for the whole run, nothing else touches them.
pub struct Session {
    model: RaSganGp,
    trainer: Trainer,
    data: Box<dyn DataSource>,
    checkpoints: Box<dyn CheckpointWriter>,
    samples: Box<dyn SampleStore>,
}

impl Session {
    /// Creates a new `Session` that writes checkpoints and samples under the configured
    /// output directory.
    ///
    /// # Arguments
    /// * `config` - The model and training configuration.
    /// * `data` - The source of real images, which also sets the image size.
    pub fn new(config: Config, data: Box<dyn DataSource>) -> Result<Self> {
        let out = &config.training.out_dir;
        let name = &config.model.model_name;
        let checkpoints = SafetensorsCheckpointer::new(out, name)?;
        let samples = SafetensorsSampleStore::new(out, name)?;

        Self::with_storage(config, data, Box::new(checkpoints), Box::new(samples))
    }

    /// Creates a new `Session` with the given checkpoint writer and sample store.
    pub fn with_storage(
        config: Config,
        data: Box<dyn DataSource>,
        checkpoints: Box<dyn CheckpointWriter>,
        samples: Box<dyn SampleStore>,
    ) -> Result<Self> {
        let Config { model, training } = config;

        info!("adapting configs");
        let spec = Adapter::new().adapt_model(&model, data.as_ref())?;
        let trainer = Trainer::new(training, spec.n_critic)?;
        let model = RaSganGp::new(spec)?;

        info!(
            height = data.patch_h(),
            width = data.patch_w(),
            channels = data.n_channels();
            "session opened for {}", model.spec().model_name
        );

        Ok(Self {
            model,
            trainer,
            data,
            checkpoints,
            samples,
        })
    }

    pub fn model(&self) -> &RaSganGp {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut RaSganGp {
        &mut self.model
    }

    /// Runs the configured amount of epochs.
    ///
    /// Calling it again keeps training the same model, continuing from the step the previous
    /// call stopped at.
    pub fn train(&mut self) -> Result<TrainReport> {
        self.trainer.train(
            &mut self.model,
            self.data.as_mut(),
            self.checkpoints.as_mut(),
            self.samples.as_mut(),
        )
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        info!(
            discriminator_updates = self.model.discriminator_updates(),
            generator_updates = self.model.generator_updates();
            "session for {} closed", self.model.spec().model_name
        );
    }
}
