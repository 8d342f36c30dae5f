//! Batch collation: right-pad examples to the longest one and stack them.

use candle_core::{Device, Tensor};

use crate::dataset::TokenizedExample;
use crate::error::{ChunkSummError, Result};

/// A rectangular batch, every field shaped `(batch_size, max_len)`.
///
/// Padded positions hold 0 in every field. For `targets` that 0 is the same
/// value as the negative class.
#[derive(Debug, Clone)]
pub struct Batch {
    /// `U32` token ids.
    pub input_ids: Tensor,
    /// `U32` 0/1 mask.
    pub attention_mask: Tensor,
    /// `U32` segment ids, all zero.
    pub token_type_ids: Tensor,
    /// `F32` per-token labels.
    pub targets: Tensor,
}

impl Batch {
    pub fn batch_size(&self) -> usize {
        self.input_ids.dims().first().copied().unwrap_or(0)
    }

    pub fn seq_len(&self) -> usize {
        self.input_ids.dims().get(1).copied().unwrap_or(0)
    }
}

fn pad<T: Copy + Default>(values: &[T], maximum: usize, out: &mut Vec<T>) {
    let start = out.len();
    out.resize(start + maximum, T::default());
    out[start..start + values.len()].copy_from_slice(values);
}

/// Collate examples into one batch on `device`.
pub fn collate(examples: &[TokenizedExample], device: &Device) -> Result<Batch> {
    if examples.is_empty() {
        return Err(ChunkSummError::EmptyBatch);
    }

    let batch_size = examples.len();
    let maximum = examples.iter().map(TokenizedExample::len).max().unwrap_or(0);

    let mut input_ids = Vec::with_capacity(batch_size * maximum);
    let mut attention_mask = Vec::with_capacity(batch_size * maximum);
    let mut targets = Vec::with_capacity(batch_size * maximum);

    for example in examples {
        example.validate()?;
        pad(&example.input_ids, maximum, &mut input_ids);
        pad(&example.attention_mask, maximum, &mut attention_mask);
        pad(&example.targets, maximum, &mut targets);
    }

    let shape = (batch_size, maximum);
    Ok(Batch {
        input_ids: Tensor::from_vec(input_ids, shape, device)?,
        attention_mask: Tensor::from_vec(attention_mask, shape, device)?,
        token_type_ids: Tensor::zeros(shape, candle_core::DType::U32, device)?,
        targets: Tensor::from_vec(targets, shape, device)?,
    })
}
