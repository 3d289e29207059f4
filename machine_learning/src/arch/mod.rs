mod discriminator;
mod generator;
pub mod layers;
pub mod loss;
mod mode;
mod sequential;

pub use discriminator::{Discriminator, DiscriminatorSpec};
pub use generator::{Generator, GeneratorSpec};
pub use mode::Mode;
pub use sequential::{Sequential, SequentialBuilder};
