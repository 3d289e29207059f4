mod checkpoint;
mod samples;

pub use checkpoint::{CheckpointWriter, SafetensorsCheckpointer, load_checkpoint};
pub use samples::{MemorySampleStore, SafetensorsSampleStore, SampleStore};
