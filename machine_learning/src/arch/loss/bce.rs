use crate::{Result, autodiff::Var};

/// Sigmoid cross entropy between `logits` and a constant `target`, averaged over every
/// element.
///
/// Computed as `softplus(x) - x * target`, which is stable for large `|x|`.
pub fn sigmoid_cross_entropy<'t>(logits: Var<'t>, target: f32) -> Result<Var<'t>> {
    Ok(logits.softplus().sub(logits.scale(target))?.mean())
}
