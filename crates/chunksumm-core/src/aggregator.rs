//! # Chunked Embedding Aggregator
//!
//! Produces one embedding per token for sequences of any length on top of an
//! encoder with a fixed positional limit.
//!
//! Without chunking, inputs are truncated to the first `window` positions and
//! encoded once. With chunking, inputs are cut into consecutive,
//! non-overlapping windows (the last one possibly shorter), each window is
//! encoded on its own, and the results are concatenated back in order. A
//! token's embedding therefore only sees the tokens of its own window.
//!
//! Either way a token embedding is the element-wise mean of the encoder's
//! last `pooled_layers` hidden states.

use std::ops::Range;

use candle_core::Tensor;

use crate::config::ModelConfig;
use crate::encoder::LayeredEncoder;
use crate::error::{ChunkSummError, Result};

/// Consecutive `window`-sized spans covering `0..len`.
pub fn chunk_spans(len: usize, window: usize) -> Vec<Range<usize>> {
    if window == 0 {
        return Vec::new();
    }
    (0..len)
        .step_by(window)
        .map(|start| start..(start + window).min(len))
        .collect()
}

/// Mean of the last `count` layers.
pub fn pool_last_layers(hidden_states: &[Tensor], count: usize) -> Result<Tensor> {
    if hidden_states.len() < count || count == 0 {
        return Err(ChunkSummError::NotEnoughLayers {
            required: count,
            available: hidden_states.len(),
        });
    }
    let tail = &hidden_states[hidden_states.len() - count..];
    Ok(Tensor::stack(tail, 0)?.mean(0)?)
}

/// Embedding strategy over an encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkedAggregator {
    pub enable_chunk: bool,
    pub window: usize,
    pub pooled_layers: usize,
}

impl ChunkedAggregator {
    pub fn new(enable_chunk: bool, window: usize, pooled_layers: usize) -> Self {
        Self {
            enable_chunk,
            window,
            pooled_layers,
        }
    }

    pub fn from_config(config: &ModelConfig) -> Self {
        Self::new(config.enable_chunk, config.chunk_size, config.pooled_layers)
    }

    fn encode_window<E: LayeredEncoder + ?Sized>(
        &self,
        encoder: &E,
        input_ids: &Tensor,
        attention_mask: &Tensor,
        token_type_ids: &Tensor,
    ) -> Result<Tensor> {
        let output = encoder.encode(input_ids, attention_mask, token_type_ids, true)?;
        let hidden_states = output.hidden_states.unwrap_or_default();
        pool_last_layers(&hidden_states, self.pooled_layers)
    }

    /// Embed `(batch, seq_len)` inputs into `(batch, tokens, hidden)`.
    ///
    /// `tokens` is `seq_len` with chunking and `min(seq_len, window)` without.
    pub fn embed<E: LayeredEncoder + ?Sized>(
        &self,
        encoder: &E,
        input_ids: &Tensor,
        attention_mask: &Tensor,
        token_type_ids: &Tensor,
    ) -> Result<Tensor> {
        let seq_len = input_ids.dim(1)?;

        if !self.enable_chunk {
            if seq_len == 0 {
                return Err(ChunkSummError::EmptyChunkList);
            }
            // Positions past the window are dropped.
            let take = seq_len.min(self.window);
            return self.encode_window(
                encoder,
                &input_ids.narrow(1, 0, take)?,
                &attention_mask.narrow(1, 0, take)?,
                &token_type_ids.narrow(1, 0, take)?,
            );
        }

        let spans = chunk_spans(seq_len, self.window);
        if spans.is_empty() {
            return Err(ChunkSummError::EmptyChunkList);
        }

        let chunks = spans
            .iter()
            .map(|span| {
                let len = span.end - span.start;
                self.encode_window(
                    encoder,
                    &input_ids.narrow(1, span.start, len)?,
                    &attention_mask.narrow(1, span.start, len)?,
                    &token_type_ids.narrow(1, span.start, len)?,
                )
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::trace!(seq_len, chunks = chunks.len(), "embedded chunked sequence");
        Ok(Tensor::cat(&chunks, 1)?)
    }
}

impl Default for ChunkedAggregator {
    fn default() -> Self {
        Self::from_config(&ModelConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::PositionalEncoder;
    use candle_core::{DType, Device};

    fn inputs(len: usize) -> (Tensor, Tensor, Tensor) {
        let ids: Vec<u32> = (0..len as u32).map(|i| 1000 + (i * 7) % 500).collect();
        (
            Tensor::from_vec(ids, (1, len), &Device::Cpu).unwrap(),
            Tensor::ones((1, len), DType::U32, &Device::Cpu).unwrap(),
            Tensor::zeros((1, len), DType::U32, &Device::Cpu).unwrap(),
        )
    }

    fn rows(t: &Tensor) -> Vec<Vec<f32>> {
        t.squeeze(0).unwrap().to_vec2().unwrap()
    }

    #[test]
    fn test_chunk_spans() {
        assert_eq!(chunk_spans(1000, 512), vec![0..512, 512..1000]);
        assert_eq!(chunk_spans(512, 512), vec![0..512]);
        assert_eq!(chunk_spans(513, 512), vec![0..512, 512..513]);
        assert_eq!(chunk_spans(3, 512), vec![0..3]);
        assert!(chunk_spans(0, 512).is_empty());
    }

    #[test]
    fn test_chunk_spans_cover_without_gaps() {
        for len in [1usize, 7, 511, 1024, 1500] {
            let spans = chunk_spans(len, 512);
            assert_eq!(spans.first().unwrap().start, 0);
            assert_eq!(spans.last().unwrap().end, len);
            for pair in spans.windows(2) {
                assert_eq!(pair[0].end, pair[1].start);
            }
        }
    }

    #[test]
    fn test_short_sequences_match_between_modes() {
        let encoder = PositionalEncoder::new(8, 13);
        let plain = ChunkedAggregator::new(false, 512, 5);
        let chunked = ChunkedAggregator::new(true, 512, 5);

        for len in [1usize, 100, 512] {
            let (ids, mask, types) = inputs(len);
            let a = plain.embed(&encoder, &ids, &mask, &types).unwrap();
            let b = chunked.embed(&encoder, &ids, &mask, &types).unwrap();
            assert_eq!(a.dims(), &[1, len, 8]);
            assert_eq!(rows(&a), rows(&b));
        }
    }

    #[test]
    fn test_long_sequence_row_counts() {
        let encoder = PositionalEncoder::new(4, 6);
        let (ids, mask, types) = inputs(1000);

        let chunked = ChunkedAggregator::new(true, 512, 5)
            .embed(&encoder, &ids, &mask, &types)
            .unwrap();
        assert_eq!(chunked.dims(), &[1, 1000, 4]);

        let truncated = ChunkedAggregator::new(false, 512, 5)
            .embed(&encoder, &ids, &mask, &types)
            .unwrap();
        assert_eq!(truncated.dims(), &[1, 512, 4]);
    }

    #[test]
    fn test_chunks_are_encoded_independently() {
        let encoder = PositionalEncoder::new(4, 6);
        let aggregator = ChunkedAggregator::new(true, 512, 5);
        let (ids, mask, types) = inputs(1000);

        let whole = rows(&aggregator.embed(&encoder, &ids, &mask, &types).unwrap());

        let plain = ChunkedAggregator::new(false, 512, 5);
        let head = rows(&plain.embed(&encoder, &ids, &mask, &types).unwrap());
        let tail = rows(
            &plain
                .embed(
                    &encoder,
                    &ids.narrow(1, 512, 488).unwrap(),
                    &mask.narrow(1, 512, 488).unwrap(),
                    &types.narrow(1, 512, 488).unwrap(),
                )
                .unwrap(),
        );

        assert_eq!(&whole[..512], &head[..]);
        assert_eq!(&whole[512..], &tail[..]);
        // Position restarts at the chunk boundary.
        assert!(whole[512][0] < whole[511][0]);
    }

    #[test]
    fn test_pools_mean_of_last_layers() {
        let encoder = PositionalEncoder::new(2, 10);
        let (ids, mask, types) = inputs(1);
        let out = rows(
            &ChunkedAggregator::new(false, 512, 5)
                .embed(&encoder, &ids, &mask, &types)
                .unwrap(),
        );
        // Layers 5..=9 -> mean offset 7; token 0 has id 1000, position 0.
        assert!((out[0][0] - (1.0 + 7.0)).abs() < 1e-5);
        assert!((out[0][1] - (1.0 + 7.0 + 0.1)).abs() < 1e-5);
    }

    #[test]
    fn test_not_enough_layers() {
        let encoder = PositionalEncoder::new(2, 3);
        let (ids, mask, types) = inputs(4);
        let err = ChunkedAggregator::new(true, 512, 5)
            .embed(&encoder, &ids, &mask, &types)
            .unwrap_err();
        assert!(matches!(
            err,
            ChunkSummError::NotEnoughLayers {
                required: 5,
                available: 3
            }
        ));
    }

    #[test]
    fn test_empty_sequence_is_rejected() {
        let encoder = PositionalEncoder::new(2, 6);
        let (ids, mask, types) = inputs(0);
        for enable_chunk in [true, false] {
            let err = ChunkedAggregator::new(enable_chunk, 512, 5)
                .embed(&encoder, &ids, &mask, &types)
                .unwrap_err();
            assert!(matches!(err, ChunkSummError::EmptyChunkList));
        }
    }
}
