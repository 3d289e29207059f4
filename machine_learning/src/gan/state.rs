/// A named, flattened tensor of a model's state.
///
/// Parameters are named `<network>/<layer>/<kernel|bias|gamma|beta>` and running
/// statistics `<network>/<layer>/<moving_mean|moving_variance>`.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedTensor {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl NamedTensor {
    pub fn new(name: &str, shape: &[usize], data: &[f32]) -> Self {
        Self {
            name: name.to_string(),
            shape: shape.to_vec(),
            data: data.to_vec(),
        }
    }
}

/// The losses of a batch, computed without updating anything.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepLosses {
    /// The relativistic discriminator loss plus the weighted penalty.
    pub discriminator: f32,
    pub generator: f32,
    /// The unweighted gradient penalty.
    pub gradient_penalty: f32,
}
