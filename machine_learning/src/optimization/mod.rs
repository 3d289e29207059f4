mod adam;
mod optimizer;

pub use adam::{ADAM_EPSILON, Adam};
pub use optimizer::Optimizer;
