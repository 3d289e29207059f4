pub mod configs;
pub mod data;
pub mod error;
mod schedule;
mod session;
pub mod storage;
mod tensor_io;
mod trainer;

pub use error::{OrchestratorError, Result};
pub use schedule::NCritic;
pub use session::Session;
pub use trainer::{LossEntry, LossRecord, TrainReport, Trainer};

use configs::Config;
use data::DataSource;

/// Opens a session over `data` and runs it to completion.
///
/// # Errors
/// Returns an `OrchestratorError` if the configuration is invalid or a step fails.
pub fn train(config: Config, data: Box<dyn DataSource>) -> Result<TrainReport> {
    let mut session = Session::new(config, data)?;
    session.train()
}
