pub mod arch;
pub mod autodiff;
pub mod error;
pub mod gan;
pub mod initialization;
pub mod optimization;
pub mod params;

pub use error::{MlErr, Result};
pub use gan::{GanSpec, NamedTensor, RaSganGp, StepLosses};
