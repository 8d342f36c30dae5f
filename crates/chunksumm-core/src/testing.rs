//! Deterministic stand-ins used by unit tests.

use candle_core::{DType, Tensor};

use crate::encoder::{EncoderOutput, LayeredEncoder};
use crate::error::Result;

/// Encoder whose layer `k` at `(b, t, d)` is
/// `id * 0.001 + t + k + 0.1 * d`, with `t` the position inside the call.
///
/// Outputs depend only on the tokens passed in one call, which makes chunk
/// boundaries observable.
pub struct PositionalEncoder {
    pub hidden_size: usize,
    pub num_layers: usize,
}

impl PositionalEncoder {
    pub fn new(hidden_size: usize, num_layers: usize) -> Self {
        Self {
            hidden_size,
            num_layers,
        }
    }
}

impl LayeredEncoder for PositionalEncoder {
    fn encode(
        &self,
        input_ids: &Tensor,
        _attention_mask: &Tensor,
        _token_type_ids: &Tensor,
        output_hidden_states: bool,
    ) -> Result<EncoderOutput> {
        let (batch, seq_len) = input_ids.dims2()?;
        let device = input_ids.device();
        let shape = (batch, seq_len, self.hidden_size);

        let ids = input_ids
            .to_dtype(DType::F32)?
            .affine(0.001, 0.0)?
            .unsqueeze(2)?
            .broadcast_as(shape)?;
        let positions = Tensor::arange(0u32, seq_len as u32, device)?
            .to_dtype(DType::F32)?
            .reshape((1, seq_len, 1))?
            .broadcast_as(shape)?;
        let dims = Tensor::arange(0u32, self.hidden_size as u32, device)?
            .to_dtype(DType::F32)?
            .affine(0.1, 0.0)?
            .reshape((1, 1, self.hidden_size))?
            .broadcast_as(shape)?;
        let base = ((ids + positions)? + dims)?;

        let layers = (0..self.num_layers)
            .map(|k| base.affine(1.0, k as f64))
            .collect::<candle_core::Result<Vec<_>>>()?;
        let last_hidden_state = layers
            .last()
            .cloned()
            .unwrap_or_else(|| base.clone());

        Ok(EncoderOutput {
            last_hidden_state,
            hidden_states: output_hidden_states.then_some(layers),
        })
    }

    fn hidden_size(&self) -> usize {
        self.hidden_size
    }
}
