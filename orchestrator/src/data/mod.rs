mod memory;
mod source;

pub use memory::InMemoryDataset;
pub use source::{Batch, DataSource};
