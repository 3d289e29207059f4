use crate::error::{OrchestratorError, Result};

/// Decides on which steps the generator is updated.
///
/// The discriminator is updated on every step, the generator on every step whose index is
/// not a multiple of `n_critic`. With `n_critic == 1` the generator never trains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NCritic {
    n_critic: usize,
}

impl NCritic {
    pub fn new(n_critic: usize) -> Result<Self> {
        if n_critic == 0 {
            return Err(OrchestratorError::InvalidConfig(
                "n_critic must be greater than 0".into(),
            ));
        }

        Ok(Self { n_critic })
    }

    /// Whether the generator is updated on the global step `step`.
    pub fn updates_generator(&self, step: usize) -> bool {
        step % self.n_critic != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skipped(n_critic: usize, steps: usize) -> Vec<usize> {
        let schedule = NCritic::new(n_critic).unwrap();
        (0..steps).filter(|&s| !schedule.updates_generator(s)).collect()
    }

    #[test]
    fn n_critic_five_skips_multiples_of_five() {
        assert_eq!(skipped(5, 10), [0, 5]);
    }

    #[test]
    fn n_critic_one_never_updates_the_generator() {
        assert_eq!(skipped(1, 6), [0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn zero_is_rejected() {
        assert!(NCritic::new(0).is_err());
    }
}
