use ndarray::Array1;

use crate::{MlErr, Result};

/// Identifies a normalization layer registered in a [`NormState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NormKey(usize);

/// The running mean and variance of one normalization layer.
#[derive(Debug, Clone, PartialEq)]
pub struct RunningStats {
    pub mean: Array1<f32>,
    pub var: Array1<f32>,
}

impl RunningStats {
    fn new(channels: usize) -> Self {
        Self {
            mean: Array1::zeros(channels),
            var: Array1::ones(channels),
        }
    }
}

/// The normalization statistics of a single network.
///
/// They are not trainable: they only move when a forward pass in training mode commits the
/// statistics of its batch.
#[derive(Debug, Clone)]
pub struct NormState {
    network: String,
    momentum: f32,
    layers: Vec<(String, RunningStats)>,
}

impl NormState {
    /// Creates a new `NormState` without layers.
    ///
    /// # Arguments
    /// * `network` - The prefix of every identifier in this state.
    /// * `momentum` - The weight of the current running value when committing a batch.
    pub fn new(network: &str, momentum: f32) -> Self {
        Self {
            network: network.to_string(),
            momentum,
            layers: Vec::new(),
        }
    }

    /// Registers a new layer, starting with zero mean and unit variance.
    pub fn register(&mut self, name: &str, channels: usize) -> Result<NormKey> {
        let name = format!("{}/{name}", self.network);
        if self.layers.iter().any(|(other, _)| *other == name) {
            return Err(MlErr::DuplicateParam(name));
        }

        self.layers.push((name, RunningStats::new(channels)));
        Ok(NormKey(self.layers.len() - 1))
    }

    pub fn get(&self, key: NormKey) -> Result<&RunningStats> {
        self.layers
            .get(key.0)
            .map(|(_, stats)| stats)
            .ok_or_else(|| self.unknown(key))
    }

    /// Moves the running statistics of a layer towards the ones of a batch.
    ///
    /// # Arguments
    /// * `key` - The layer to update.
    /// * `mean` - The batch mean.
    /// * `var` - The unbiased batch variance.
    pub fn commit(&mut self, key: NormKey, mean: &Array1<f32>, var: &Array1<f32>) -> Result<()> {
        let momentum = self.momentum;
        let Some((_, stats)) = self.layers.get_mut(key.0) else {
            return Err(MlErr::UnknownParam(format!("{}/#{}", self.network, key.0)));
        };

        if mean.len() != stats.mean.len() || var.len() != stats.var.len() {
            return Err(MlErr::shape("commit", mean.shape(), stats.mean.shape()));
        }

        stats
            .mean
            .zip_mut_with(mean, |r, &b| *r = momentum * *r + (1. - momentum) * b);
        stats
            .var
            .zip_mut_with(var, |r, &b| *r = momentum * *r + (1. - momentum) * b);

        Ok(())
    }

    /// Returns the amount of layers registered.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Iterates over every layer as `(identifier, stats)` in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &RunningStats)> {
        self.layers.iter().map(|(name, stats)| (name.as_str(), stats))
    }

    /// Looks up the statistics of a layer by its full identifier.
    pub fn by_name_mut(&mut self, name: &str) -> Result<&mut RunningStats> {
        self.layers
            .iter_mut()
            .find(|(other, _)| other == name)
            .map(|(_, stats)| stats)
            .ok_or_else(|| MlErr::UnknownParam(name.to_string()))
    }

    fn unknown(&self, key: NormKey) -> MlErr {
        MlErr::UnknownParam(format!("{}/#{}", self.network, key.0))
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn commit_moves_towards_the_batch() {
        let mut state = NormState::new("net", 0.99);
        let key = state.register("bn_0", 2).unwrap();

        state.commit(key, &array![1., -1.], &array![3., 1.]).unwrap();
        let stats = state.get(key).unwrap();

        assert!((stats.mean[0] - 0.01).abs() < 1e-6);
        assert!((stats.mean[1] + 0.01).abs() < 1e-6);
        assert!((stats.var[0] - 1.02).abs() < 1e-6);
        assert!((stats.var[1] - 1.).abs() < 1e-6);
    }

    #[test]
    fn commit_rejects_wrong_channel_counts() {
        let mut state = NormState::new("net", 0.99);
        let key = state.register("bn_0", 2).unwrap();
        assert!(state.commit(key, &array![1.], &array![1.]).is_err());
    }

    #[test]
    fn names_are_unique() {
        let mut state = NormState::new("net", 0.99);
        state.register("bn_0", 2).unwrap();
        assert_eq!(
            state.register("bn_0", 4),
            Err(MlErr::DuplicateParam("net/bn_0".into()))
        );

        let names: Vec<_> = state.iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["net/bn_0"]);
    }
}
