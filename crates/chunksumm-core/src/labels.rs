//! Two-class label encoding: `true -> [1, 0]`, `false -> [0, 1]`.
//!
//! The "in summary" class comes first.

use candle_core::{DType, Tensor};

use crate::error::{ChunkSummError, Result};

/// Index of the "in summary" class.
pub const IN_SUMMARY: usize = 0;
/// Index of the "not in summary" class.
pub const OUT_OF_SUMMARY: usize = 1;

pub fn expand_label(label: bool) -> [f32; 2] {
    if label { [1.0, 0.0] } else { [0.0, 1.0] }
}

/// Recover the label from an expanded (or predicted) pair by argmax.
pub fn collapse_label(pair: &[f32; 2]) -> bool {
    pair[IN_SUMMARY] >= pair[OUT_OF_SUMMARY]
}

/// Expand per-token targets of any shape into `(n_tokens, 2)`. Any nonzero
/// target counts as "in summary".
pub fn expand_targets(targets: &Tensor) -> Result<Tensor> {
    let flat = targets.flatten_all()?;
    let positive = flat.ne(0f32)?.to_dtype(DType::F32)?;
    let negative = positive.affine(-1.0, 1.0)?;
    Ok(Tensor::stack(&[positive, negative], 1)?)
}

/// Reshape `labels` to exactly the shape of `outputs`. Fails when the element
/// counts differ instead of broadcasting, padding or truncating.
pub fn align_labels(labels: &Tensor, outputs: &Tensor) -> Result<Tensor> {
    if labels.elem_count() != outputs.elem_count() {
        return Err(ChunkSummError::ShapeMismatch {
            outputs: outputs.dims().to_vec(),
            labels: labels.dims().to_vec(),
        });
    }
    Ok(labels.reshape(outputs.shape())?)
}
