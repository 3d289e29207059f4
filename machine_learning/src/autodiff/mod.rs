//! Reverse mode automatic differentiation over `ndarray` tensors.

mod backward;
mod conv;
mod ops;
mod tape;

pub use conv::ConvGeometry;
pub use ops::{sigmoid, softplus};
pub use tape::{Tape, Var};
