//! Binary cross-entropy on raw logits.
//!
//! Computed as
//!
//! ```text
//! L_i = max(x_i, 0) - x_i * t_i + log(1 + exp(-|x_i|))
//! L   = mean(L_i)
//! ```
//!
//! which never evaluates `log(0)`, so saturated logits give a finite loss
//! and finite gradients.

use candle_core::Tensor;

use crate::error::{ChunkSummError, Result};

/// Mean binary cross-entropy of `logits` against `targets` of the same shape.
pub fn binary_cross_entropy_with_logits(logits: &Tensor, targets: &Tensor) -> Result<Tensor> {
    if logits.dims() != targets.dims() {
        return Err(ChunkSummError::ShapeMismatch {
            outputs: logits.dims().to_vec(),
            labels: targets.dims().to_vec(),
        });
    }

    let targets = targets.to_dtype(logits.dtype())?;
    let positive_part = logits.relu()?;
    let softplus_tail = logits.abs()?.neg()?.exp()?.affine(1.0, 1.0)?.log()?;
    let per_element = ((positive_part - logits.mul(&targets)?)? + softplus_tail)?;
    Ok(per_element.mean_all()?)
}
