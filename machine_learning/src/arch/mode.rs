/// How a forward pass treats normalization layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Normalize with the batch statistics and commit them to the running statistics.
    Train,
    /// Normalize with the batch statistics without committing anything.
    Observe,
    /// Normalize with the running statistics.
    Infer,
}

impl Mode {
    /// Whether normalization layers use the statistics of the current batch.
    pub fn uses_batch_stats(self) -> bool {
        matches!(self, Mode::Train | Mode::Observe)
    }

    /// Whether normalization layers update their running statistics.
    pub fn commits(self) -> bool {
        self == Mode::Train
    }
}
