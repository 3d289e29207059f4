use std::collections::HashMap;

use rand::Rng;

use super::layers::{BatchNorm, Conv2d, ConvSpec, ConvTranspose2d, Dense, Forward, Init, Layer};
use crate::{Result, autodiff::Var};

/// A sequential network: information flows through its layers in order.
#[derive(Debug, Clone)]
pub struct Sequential {
    layers: Vec<Layer>,
}

impl Sequential {
    /// Creates a new `Sequential`.
    ///
    /// # Arguments
    /// * `layers` - The layers the sequential is composed of.
    pub fn new<I>(layers: I) -> Self
    where
        I: IntoIterator<Item = Layer>,
    {
        Self {
            layers: layers.into_iter().collect(),
        }
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Makes a forward pass through the network.
    ///
    /// # Arguments
    /// * `x` - The input batch.
    /// * `fwd` - The bound parameters, normalization state and mode of this pass.
    ///
    /// # Returns
    /// The output of the last layer or the first error found.
    pub fn forward<'t>(&self, mut x: Var<'t>, fwd: &mut Forward<'_, 't>) -> Result<Var<'t>> {
        for layer in &self.layers {
            x = layer.forward(x, fwd)?;
        }

        Ok(x)
    }
}

/// Builds a [`Sequential`], naming every layer after its kind and position.
///
/// Parameters end up named like `"dense_1/kernel"` relative to the network. When
/// normalization is disabled, [`SequentialBuilder::batch_norm`] adds nothing.
pub struct SequentialBuilder<'a, R: Rng> {
    init: Init<'a, R>,
    use_bn: bool,
    layers: Vec<Layer>,
    counts: HashMap<&'static str, usize>,
}

impl<'a, R: Rng> SequentialBuilder<'a, R> {
    pub fn new(init: Init<'a, R>, use_bn: bool) -> Self {
        Self {
            init,
            use_bn,
            layers: Vec::new(),
            counts: HashMap::new(),
        }
    }

    fn name(&mut self, kind: &'static str) -> String {
        let count = self.counts.entry(kind).or_default();
        let name = format!("{kind}_{count}");
        *count += 1;
        name
    }

    pub fn dense(mut self, dim: (usize, usize)) -> Result<Self> {
        let name = self.name("dense");
        let layer = Dense::new(&name, dim, &mut self.init)?;
        self.layers.push(Layer::Dense(layer));
        Ok(self)
    }

    pub fn conv2d(mut self, spec: ConvSpec) -> Result<Self> {
        let name = self.name("conv2d");
        let layer = Conv2d::new(&name, spec, &mut self.init)?;
        self.layers.push(Layer::Conv2d(layer));
        Ok(self)
    }

    pub fn conv2d_transpose(mut self, spec: ConvSpec) -> Result<Self> {
        let name = self.name("conv2d_transpose");
        let layer = ConvTranspose2d::new(&name, spec, &mut self.init)?;
        self.layers.push(Layer::ConvTranspose2d(layer));
        Ok(self)
    }

    pub fn batch_norm(mut self, channels: usize) -> Result<Self> {
        if !self.use_bn {
            return Ok(self);
        }

        let name = self.name("batch_norm");
        let layer = BatchNorm::new(&name, channels, &mut self.init)?;
        self.layers.push(Layer::BatchNorm(layer));
        Ok(self)
    }

    pub fn leaky_relu(mut self, alpha: f32) -> Self {
        self.layers.push(Layer::LeakyRelu(alpha));
        self
    }

    pub fn sigmoid(mut self) -> Self {
        self.layers.push(Layer::Sigmoid);
        self
    }

    pub fn reshape(mut self, sample: &[usize]) -> Self {
        self.layers.push(Layer::Reshape(sample.to_vec()));
        self
    }

    pub fn flatten(mut self) -> Self {
        self.layers.push(Layer::Flatten);
        self
    }

    pub fn build(self) -> Sequential {
        Sequential::new(self.layers)
    }
}
