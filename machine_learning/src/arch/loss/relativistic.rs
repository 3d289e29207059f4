use super::sigmoid_cross_entropy;
use crate::{Result, autodiff::Var};

/// Compares every logit against the batch average of the opposite class.
///
/// # Arguments
/// * `real` - The logits of the real images, of shape `[batch, 1]`.
/// * `fake` - The logits of the generated images, of shape `[batch, 1]`.
///
/// # Returns
/// `(real - mean(fake), fake - mean(real))`, the means taken over the batch axis.
pub fn relativistic_logits<'t>(real: Var<'t>, fake: Var<'t>) -> Result<(Var<'t>, Var<'t>)> {
    let real_fake = real.sub(fake.mean_axis(0)?)?;
    let fake_real = fake.sub(real.mean_axis(0)?)?;
    Ok((real_fake, fake_real))
}

/// The adversarial part of the discriminator loss: real images should look more realistic
/// than the average fake one and vice versa.
pub fn discriminator_loss<'t>(real: Var<'t>, fake: Var<'t>) -> Result<Var<'t>> {
    let (real_fake, fake_real) = relativistic_logits(real, fake)?;
    sigmoid_cross_entropy(real_fake, 1.)?.add(sigmoid_cross_entropy(fake_real, 0.)?)
}

/// The generator loss: the discriminator's objective with the roles exchanged.
pub fn generator_loss<'t>(real: Var<'t>, fake: Var<'t>) -> Result<Var<'t>> {
    let (real_fake, fake_real) = relativistic_logits(real, fake)?;
    sigmoid_cross_entropy(fake_real, 1.)?.add(sigmoid_cross_entropy(real_fake, 0.)?)
}
