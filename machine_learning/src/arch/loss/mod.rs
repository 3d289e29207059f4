mod bce;
mod gradient_penalty;
mod relativistic;

pub use bce::sigmoid_cross_entropy;
pub use gradient_penalty::{GP_EPSILON, gradient_penalty, interpolate, penalty_from_gradients};
pub use relativistic::{discriminator_loss, generator_loss, relativistic_logits};
