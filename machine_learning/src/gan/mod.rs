mod model;
pub(crate) mod spec;
mod state;

pub use model::RaSganGp;
pub use spec::GanSpec;
pub use state::{NamedTensor, StepLosses};
