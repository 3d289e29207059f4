mod batch_norm;
mod context;
mod conv;
mod dense;
mod layer;

pub use batch_norm::{BatchNorm, EPSILON as BN_EPSILON, MOMENTUM as BN_MOMENTUM};
pub use context::{Forward, Init};
pub use conv::{Conv2d, ConvSpec, ConvTranspose2d};
pub use dense::Dense;
pub use layer::Layer;
