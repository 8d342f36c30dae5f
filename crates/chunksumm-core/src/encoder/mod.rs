//! # Encoder Capability
//!
//! The model consumes a pretrained transformer through [`LayeredEncoder`]:
//! token ids, attention mask and segment ids in, every hidden layer out.
//! [`BertEncoder`] is the candle-backed implementation for BERT-family
//! checkpoints.

pub mod bert;

use candle_core::{Tensor, Var};

use crate::error::Result;

pub use bert::{BertConfig, BertEncoder};

/// Hidden states produced by one encoder call.
#[derive(Debug, Clone)]
pub struct EncoderOutput {
    /// `(batch, seq_len, hidden)` output of the final layer.
    pub last_hidden_state: Tensor,
    /// Embedding output followed by every layer output, oldest first.
    /// Present only when requested.
    pub hidden_states: Option<Vec<Tensor>>,
}

/// A transformer encoder exposing its intermediate layers.
pub trait LayeredEncoder: Send + Sync {
    /// Encode `(batch, seq_len)` `U32` inputs.
    fn encode(
        &self,
        input_ids: &Tensor,
        attention_mask: &Tensor,
        token_type_ids: &Tensor,
        output_hidden_states: bool,
    ) -> Result<EncoderOutput>;

    /// Width of every hidden state.
    fn hidden_size(&self) -> usize;

    /// Parameters that an optimizer may update. Empty for fixed encoders.
    fn trainable_vars(&self) -> Vec<Var> {
        Vec::new()
    }
}
