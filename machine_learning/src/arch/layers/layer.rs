use super::{BatchNorm, Conv2d, ConvTranspose2d, Dense, Forward};
use crate::{MlErr, Result, autodiff::Var};

/// A single step of a [`Sequential`](crate::arch::Sequential) network.
#[derive(Debug, Clone)]
pub enum Layer {
    Dense(Dense),
    Conv2d(Conv2d),
    ConvTranspose2d(ConvTranspose2d),
    BatchNorm(BatchNorm),
    LeakyRelu(f32),
    Sigmoid,
    /// Reshapes every sample, keeping the batch axis.
    Reshape(Vec<usize>),
    /// Flattens every sample into a vector, keeping the batch axis.
    Flatten,
}

impl Layer {
    pub fn forward<'t>(&self, x: Var<'t>, fwd: &mut Forward<'_, 't>) -> Result<Var<'t>> {
        match self {
            Layer::Dense(l) => l.forward(x, fwd),
            Layer::Conv2d(l) => l.forward(x, fwd),
            Layer::ConvTranspose2d(l) => l.forward(x, fwd),
            Layer::BatchNorm(l) => l.forward(x, fwd),
            Layer::LeakyRelu(alpha) => Ok(x.leaky_relu(*alpha)),
            Layer::Sigmoid => Ok(x.sigmoid()),
            Layer::Reshape(sample) => {
                let n = batch_len(x)?;
                let shape: Vec<usize> = std::iter::once(n).chain(sample.iter().copied()).collect();
                x.reshape(&shape)
            }
            Layer::Flatten => {
                let n = batch_len(x)?;
                let len = x.value().len() / n.max(1);
                x.reshape(&[n, len])
            }
        }
    }
}

fn batch_len(x: Var<'_>) -> Result<usize> {
    x.shape()
        .first()
        .copied()
        .ok_or_else(|| MlErr::shape("batch", &[], &[0]))
}
