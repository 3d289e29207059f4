use log::{debug, info};
use machine_learning::{RaSganGp, StepLosses};

use crate::{
    configs::TrainingConfig,
    data::{Batch, DataSource},
    error::{OrchestratorError, Result},
    schedule::NCritic,
    storage::{CheckpointWriter, SampleStore},
};

/// The losses recomputed at one step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossEntry {
    pub step: usize,
    pub losses: StepLosses,
}

/// The `(discriminator, generator)` losses recorded along a run, in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LossRecord {
    entries: Vec<LossEntry>,
}

impl LossRecord {
    pub fn push(&mut self, step: usize, losses: StepLosses) {
        self.entries.push(LossEntry { step, losses });
    }

    pub fn entries(&self) -> &[LossEntry] {
        &self.entries
    }

    /// The recorded pairs of discriminator and generator losses.
    pub fn pairs(&self) -> Vec<(f32, f32)> {
        self.entries
            .iter()
            .map(|e| (e.losses.discriminator, e.losses.generator))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// What a training run did.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainReport {
    pub losses: LossRecord,
    /// The global step the run started at.
    pub first_step: usize,
    /// The amount of steps taken by the run.
    pub steps: usize,
    pub discriminator_updates: usize,
    pub generator_updates: usize,
}

/// Drives the alternating updates of a model over a data source.
#[derive(Debug, Clone)]
pub struct Trainer {
    config: TrainingConfig,
    schedule: NCritic,
    next_step: usize,
}

impl Trainer {
    /// Creates a new `Trainer`.
    ///
    /// # Returns
    /// An `InvalidConfig` error if a stride or count in `config` is zero.
    pub fn new(config: TrainingConfig, n_critic: usize) -> Result<Self> {
        config.validate()?;
        let schedule = NCritic::new(n_critic)?;
        Ok(Self {
            config,
            schedule,
            next_step: 0,
        })
    }

    /// Makes the next run continue from the global step `step`, as after loading the
    /// checkpoint written at that step.
    pub fn resume_at(mut self, step: usize) -> Self {
        self.next_step = step;
        self
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// The global step the next run starts at.
    pub fn next_step(&self) -> usize {
        self.next_step
    }

    /// Trains `model` for the configured amount of epochs.
    ///
    /// The step counter is global across epochs and across runs: the first run starts at
    /// 0 and every later one continues where the previous stopped, so checkpoints and sample
    /// slots of earlier runs are never written again. Every `print_epochs` steps the losses
    /// of the current batch are recorded, and every `show_epochs` steps samples are
    /// generated and a checkpoint is written.
    ///
    /// # Returns
    /// The report of the run, or the first error wrapped with the step it happened at.
    pub fn train(
        &mut self,
        model: &mut RaSganGp,
        data: &mut dyn DataSource,
        checkpoints: &mut dyn CheckpointWriter,
        samples: &mut dyn SampleStore,
    ) -> Result<TrainReport> {
        let epochs = self.config.epochs;
        let mut losses = LossRecord::default();
        let first_step = self.next_step;
        let mut step = first_step;
        let updates = (model.discriminator_updates(), model.generator_updates());

        info!(
            epochs = epochs,
            first_step = first_step,
            batch_size = data.batch_size();
            "training {}", model.spec().model_name
        );

        for epoch in 1..=epochs {
            loop {
                let batch = data.next_batch().map_err(|e| Self::at(epoch, step, e))?;
                let Some(batch) = batch else {
                    break;
                };

                self.step(model, &batch, step, checkpoints, samples, &mut losses)
                    .map_err(|e| Self::at(epoch, step, e))?;

                if let Some(entry) = losses.entries().last().filter(|e| e.step == step) {
                    info!(
                        "epoch {epoch}/{epochs}: generator loss {:.4}, discriminator loss {:.4}",
                        entry.losses.generator, entry.losses.discriminator
                    );
                }

                step += 1;
                self.next_step = step;
            }

            data.reset();
            debug!(epoch = epoch, steps = step; "epoch finished");
        }

        let report = TrainReport {
            losses,
            first_step,
            steps: step - first_step,
            discriminator_updates: model.discriminator_updates() - updates.0,
            generator_updates: model.generator_updates() - updates.1,
        };

        info!(
            steps = report.steps,
            discriminator_updates = report.discriminator_updates,
            generator_updates = report.generator_updates;
            "training finished"
        );

        Ok(report)
    }

    fn step(
        &self,
        model: &mut RaSganGp,
        batch: &Batch,
        step: usize,
        checkpoints: &mut dyn CheckpointWriter,
        samples: &mut dyn SampleStore,
        losses: &mut LossRecord,
    ) -> Result<()> {
        let TrainingConfig {
            show_epochs,
            print_epochs,
            n_images,
            ..
        } = self.config;

        let real = &batch.images;
        let z = model.sample_latent(real.shape()[0])?;

        model.update_discriminator(real, &z)?;
        if self.schedule.updates_generator(step) {
            model.update_generator(real, &z)?;
        }

        if step % print_epochs == 0 {
            losses.push(step, model.losses(real, &z)?);
        }

        if step % show_epochs == 0 {
            let latents = model.sample_latent(n_images)?;
            let images = model.generate(&latents, false)?;
            samples.store(step / show_epochs, &images, &latents)?;
            checkpoints.save(step, model)?;
        }

        Ok(())
    }

    fn at(epoch: usize, step: usize, source: OrchestratorError) -> OrchestratorError {
        OrchestratorError::Step {
            epoch,
            step,
            source: Box::new(source),
        }
    }
}
