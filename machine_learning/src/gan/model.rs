use std::{cell::RefCell, rc::Rc};

use log::debug;
use ndarray::{Array1, Array2, Array4};
use ndarray_rand::RandomExt;
use rand::{SeedableRng, rngs::StdRng};
use rand_distr::Uniform;

use super::{GanSpec, NamedTensor, StepLosses};
use crate::{
    MlErr, Result,
    arch::{
        Discriminator, Generator, Mode,
        loss::{self, interpolate},
    },
    autodiff::{Tape, Var},
    optimization::{ADAM_EPSILON, Adam, Optimizer},
    params::{BoundParams, NormState, ParamSet},
};

/// The variables of one forward pass through both networks.
struct Pass<'t> {
    generator: BoundParams<'t>,
    discriminator: BoundParams<'t>,
    discriminator_loss: Var<'t>,
    generator_loss: Var<'t>,
    gradient_penalty: Option<Var<'t>>,
}

/// A relativistic average GAN trained with a gradient penalty.
///
/// It owns both networks, one Adam optimizer for each and the random source used for latent
/// vectors and interpolation factors.
pub struct RaSganGp {
    spec: GanSpec,
    generator: Generator,
    discriminator: Discriminator,
    generator_optimizer: Adam,
    discriminator_optimizer: Adam,
    rng: Rc<RefCell<StdRng>>,
}

impl RaSganGp {
    /// Creates a new `RaSganGp`, initializing both networks.
    ///
    /// When `spec` has no seed the random source is seeded from the operating system.
    ///
    /// # Returns
    /// An error if `spec` is invalid.
    pub fn new(spec: GanSpec) -> Result<Self> {
        spec.validate()?;

        let rng = match spec.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let rng = Rc::new(RefCell::new(rng));

        let generator = Generator::new(spec.generator(), Rc::clone(&rng))?;
        let discriminator = Discriminator::new(spec.discriminator(), Rc::clone(&rng))?;

        let adam = |len| {
            Adam::new(
                len,
                spec.learning_rate,
                spec.beta_1,
                spec.beta_2,
                ADAM_EPSILON,
            )
        };
        let generator_optimizer = adam(generator.params().len());
        let discriminator_optimizer = adam(discriminator.params().len());

        debug!(
            generator_params = generator.params().len(),
            discriminator_params = discriminator.params().len();
            "built {}", spec.model_name
        );

        Ok(Self {
            spec,
            generator,
            discriminator,
            generator_optimizer,
            discriminator_optimizer,
            rng,
        })
    }

    pub fn spec(&self) -> &GanSpec {
        &self.spec
    }

    pub fn generator(&self) -> &Generator {
        &self.generator
    }

    pub fn discriminator(&self) -> &Discriminator {
        &self.discriminator
    }

    /// The amount of updates applied to the generator so far.
    pub fn generator_updates(&self) -> usize {
        self.generator_optimizer.steps()
    }

    /// The amount of updates applied to the discriminator so far.
    pub fn discriminator_updates(&self) -> usize {
        self.discriminator_optimizer.steps()
    }

    /// Draws `n` latent vectors uniformly from `[-1, 1)`.
    pub fn sample_latent(&self, n: usize) -> Result<Array2<f32>> {
        let uniform = Uniform::<f32>::new(-1., 1.)?;
        let mut rng = self.rng.borrow_mut();
        Ok(Array2::random_using((n, self.spec.z_dim), uniform, &mut *rng))
    }

    /// Draws one interpolation factor per sample from `[0, 1)`.
    fn sample_epsilon(&self, n: usize) -> Result<Array4<f32>> {
        let uniform = Uniform::<f32>::new(0., 1.)?;
        let mut rng = self.rng.borrow_mut();
        Ok(Array4::random_using((n, 1, 1, 1), uniform, &mut *rng))
    }

    /// Runs `update`, putting the normalization statistics of both networks back if it fails.
    fn guarded<T>(&mut self, update: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let norms = (self.generator.norms().clone(), self.discriminator.norms().clone());
        let result = update(self);
        if result.is_err() {
            *self.generator.norms_mut() = norms.0;
            *self.discriminator.norms_mut() = norms.1;
        }

        result
    }

    /// Records a forward pass through both networks on `tape`.
    ///
    /// The discriminator sees the generated batch first and the real one second. With
    /// `penalize` it also sees the interpolated batch and the penalty joins its loss.
    fn pass<'t>(
        &mut self,
        tape: &'t Tape,
        real: &Array4<f32>,
        z: &Array2<f32>,
        mode: Mode,
        penalize: bool,
    ) -> Result<Pass<'t>> {
        let n = real.shape()[0];
        if z.nrows() != n {
            return Err(MlErr::shape("latent batch", z.shape(), &[n, self.spec.z_dim]));
        }

        let generator = tape.bind(self.generator.params())?;
        let discriminator = tape.bind(self.discriminator.params())?;

        let real = tape.leaf(real.clone().into_dyn());
        let z = tape.leaf(z.clone().into_dyn());

        let fake = self.generator.forward(z, &generator, mode)?;
        let (_, logits_fake) = self.discriminator.forward(fake, &discriminator, mode)?;
        let (_, logits_real) = self.discriminator.forward(real, &discriminator, mode)?;

        let adversarial = loss::discriminator_loss(logits_real, logits_fake)?;
        let generator_loss = loss::generator_loss(logits_real, logits_fake)?;

        let (discriminator_loss, gradient_penalty) = if penalize {
            let epsilon = tape.leaf(self.sample_epsilon(n)?.into_dyn());
            let x_gp = interpolate(real, fake, epsilon)?;
            let (_, logits_gp) = self.discriminator.forward(x_gp, &discriminator, mode)?;

            let penalty = loss::gradient_penalty(logits_gp, x_gp)?;
            let total = adversarial.add(penalty.scale(self.spec.gp_coeff))?;
            (total, Some(penalty))
        } else {
            (adversarial, None)
        };

        Ok(Pass {
            generator,
            discriminator,
            discriminator_loss,
            generator_loss,
            gradient_penalty,
        })
    }

    /// Applies one Adam step to the discriminator.
    ///
    /// The forward pass runs in training mode, so both networks commit their normalization
    /// statistics before any gradient is computed.
    ///
    /// # Arguments
    /// * `real` - A batch of real images.
    /// * `z` - One latent vector per real image.
    ///
    /// # Returns
    /// The discriminator loss before the update, or an error if it is not finite, in which
    /// case neither parameters nor normalization statistics are touched.
    pub fn update_discriminator(&mut self, real: &Array4<f32>, z: &Array2<f32>) -> Result<f32> {
        self.guarded(|model| model.step_discriminator(real, z))
    }

    fn step_discriminator(&mut self, real: &Array4<f32>, z: &Array2<f32>) -> Result<f32> {
        let tape = Tape::new();
        let pass = self.pass(&tape, real, z, Mode::Train, true)?;

        let loss = finite(pass.discriminator_loss, "discriminator loss")?;
        if let Some(penalty) = pass.gradient_penalty {
            finite(penalty, "gradient penalty")?;
        }

        let grad = pass.discriminator.flat_gradient(pass.discriminator_loss)?;
        if grad.iter().any(|g| !g.is_finite()) {
            return Err(MlErr::NonFinite {
                what: "discriminator gradient",
            });
        }

        let params = self.discriminator.params_mut().values_mut();
        self.discriminator_optimizer.update_params(&grad, params)?;
        debug!(loss = loss, nodes = tape.len(); "discriminator updated");

        Ok(loss)
    }

    /// Applies one Adam step to the generator.
    ///
    /// The interpolated batch plays no part in the generator loss, so it is not run.
    ///
    /// # Returns
    /// The generator loss before the update, or an error if it is not finite, in which case
    /// neither parameters nor normalization statistics are touched.
    pub fn update_generator(&mut self, real: &Array4<f32>, z: &Array2<f32>) -> Result<f32> {
        self.guarded(|model| model.step_generator(real, z))
    }

    fn step_generator(&mut self, real: &Array4<f32>, z: &Array2<f32>) -> Result<f32> {
        let tape = Tape::new();
        let pass = self.pass(&tape, real, z, Mode::Train, false)?;

        let loss = finite(pass.generator_loss, "generator loss")?;
        let grad = pass.generator.flat_gradient(pass.generator_loss)?;
        if grad.iter().any(|g| !g.is_finite()) {
            return Err(MlErr::NonFinite {
                what: "generator gradient",
            });
        }

        let params = self.generator.params_mut().values_mut();
        self.generator_optimizer.update_params(&grad, params)?;
        debug!(loss = loss, nodes = tape.len(); "generator updated");

        Ok(loss)
    }

    /// Computes both losses and the penalty without changing any state but the random source.
    ///
    /// Normalization layers use the statistics of this batch, as they do while training, but
    /// commit nothing.
    pub fn losses(&mut self, real: &Array4<f32>, z: &Array2<f32>) -> Result<StepLosses> {
        let tape = Tape::new();
        let pass = self.pass(&tape, real, z, Mode::Observe, true)?;

        let gradient_penalty = match pass.gradient_penalty {
            Some(penalty) => finite(penalty, "gradient penalty")?,
            None => 0.,
        };

        Ok(StepLosses {
            discriminator: finite(pass.discriminator_loss, "discriminator loss")?,
            generator: finite(pass.generator_loss, "generator loss")?,
            gradient_penalty,
        })
    }

    /// Generates images from latent vectors.
    ///
    /// With `training` the generator normalizes with batch statistics and commits them,
    /// otherwise it uses the stored ones and nothing changes.
    pub fn generate(&mut self, z: &Array2<f32>, training: bool) -> Result<Array4<f32>> {
        self.generator.generate(z, training)
    }

    /// Scores images, returning `(probabilities, logits)`.
    pub fn discriminate(
        &mut self,
        x: &Array4<f32>,
        mode: Mode,
    ) -> Result<(Array2<f32>, Array2<f32>)> {
        self.discriminator.discriminate(x, mode)
    }

    /// Every parameter and normalization statistic of both networks.
    pub fn state(&self) -> Vec<NamedTensor> {
        let mut state = Vec::new();

        for params in [self.generator.params(), self.discriminator.params()] {
            for (name, shape, data) in params.iter() {
                state.push(NamedTensor::new(name, shape, data));
            }
        }

        for norms in [self.generator.norms(), self.discriminator.norms()] {
            for (name, stats) in norms.iter() {
                let len = stats.mean.len();
                let mean: Vec<f32> = stats.mean.iter().copied().collect();
                let var: Vec<f32> = stats.var.iter().copied().collect();

                state.push(NamedTensor::new(&format!("{name}/moving_mean"), &[len], &mean));
                state.push(NamedTensor::new(&format!("{name}/moving_variance"), &[len], &var));
            }
        }

        state
    }

    /// Restores a state produced by [`RaSganGp::state`].
    ///
    /// Either every tensor is restored or, on error, nothing is.
    ///
    /// # Returns
    /// An error if a tensor is unknown, has the wrong shape or is missing.
    pub fn load_state(&mut self, tensors: &[NamedTensor]) -> Result<()> {
        let mut generator = self.generator.clone();
        let mut discriminator = self.discriminator.clone();

        for expected in self.state() {
            if !tensors.iter().any(|t| t.name == expected.name) {
                return Err(MlErr::MissingParam(expected.name));
            }
        }

        for tensor in tensors {
            let network = tensor.name.split('/').next().unwrap_or_default();
            let (params, norms) = match network {
                Generator::NAME => generator.state_mut(),
                Discriminator::NAME => discriminator.state_mut(),
                _ => return Err(MlErr::UnknownParam(tensor.name.clone())),
            };

            restore(params, norms, tensor)?;
        }

        self.generator = generator;
        self.discriminator = discriminator;
        Ok(())
    }
}

fn restore(params: &mut ParamSet, norms: &mut NormState, tensor: &NamedTensor) -> Result<()> {
    let NamedTensor { name, shape, data } = tensor;

    let (layer, is_mean) = if let Some(layer) = name.strip_suffix("/moving_mean") {
        (layer, true)
    } else if let Some(layer) = name.strip_suffix("/moving_variance") {
        (layer, false)
    } else {
        return params.assign(name, shape, data);
    };

    let stats = norms.by_name_mut(layer)?;
    let expected = [stats.mean.len()];
    if shape.as_slice() != expected || data.len() != expected[0] {
        return Err(MlErr::shape("running statistics", shape, &expected));
    }

    let values = Array1::from(data.clone());
    if is_mean {
        stats.mean = values;
    } else {
        stats.var = values;
    }

    Ok(())
}

/// Reads a scalar variable, refusing non finite values.
fn finite(var: Var<'_>, what: &'static str) -> Result<f32> {
    match var.item() {
        Some(value) if value.is_finite() => Ok(value),
        _ => Err(MlErr::NonFinite { what }),
    }
}
