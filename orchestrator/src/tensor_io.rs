use std::{collections::HashMap, path::Path};

use safetensors::{
    Dtype, SafeTensorError, serialize_to_file,
    tensor::{Metadata, SafeTensors, TensorView},
};

/// A tensor ready to be written, borrowing its values.
pub(crate) struct Entry<'a> {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: &'a [f32],
}

/// Writes `f32` tensors to a safetensors file, replacing it if it exists.
pub(crate) fn write(
    path: &Path,
    entries: &[Entry<'_>],
    metadata: HashMap<String, String>,
) -> Result<(), SafeTensorError> {
    let views = entries
        .iter()
        .map(|entry| {
            let bytes: &[u8] = bytemuck::cast_slice(entry.data);
            let view = TensorView::new(Dtype::F32, entry.shape.clone(), bytes)?;
            Ok((entry.name.as_str(), view))
        })
        .collect::<Result<Vec<_>, SafeTensorError>>()?;

    serialize_to_file(views, &Some(metadata), path)
}

/// Reads the values of an `f32` tensor, whatever the alignment of the buffer.
pub(crate) fn read_f32(name: &str, view: &TensorView<'_>) -> Result<Vec<f32>, String> {
    if view.dtype() != Dtype::F32 {
        return Err(format!("tensor {name} is {:?}, expected F32", view.dtype()));
    }

    Ok(view
        .data()
        .chunks_exact(size_of::<f32>())
        .map(bytemuck::pod_read_unaligned)
        .collect())
}

/// Reads the free form metadata of a safetensors buffer.
pub(crate) fn metadata(buffer: &[u8]) -> Result<HashMap<String, String>, SafeTensorError> {
    let (_, metadata): (usize, Metadata) = SafeTensors::read_metadata(buffer)?;
    Ok(metadata.metadata().clone().unwrap_or_default())
}
