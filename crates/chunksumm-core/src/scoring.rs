//! Per-token summary probabilities for free text.

use candle_core::{DType, Tensor};
use serde::Serialize;

use crate::encoder::LayeredEncoder;
use crate::error::{ChunkSummError, Result};
use crate::labels::{IN_SUMMARY, OUT_OF_SUMMARY};
use crate::model::ChunkSumm;
use crate::tokenizer::{TextTokenizer, TokenizeOptions};

/// Class probabilities for one token.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TokenScore {
    pub token_id: u32,
    pub in_summary: f32,
    pub out_of_summary: f32,
}

/// Tokenize `text` as a single sentence and score every token.
///
/// Without chunking only the first `chunk_size` tokens are scored.
pub fn get_token_scores<E: LayeredEncoder>(
    model: &ChunkSumm<E>,
    tokenizer: &dyn TextTokenizer,
    text: &str,
) -> Result<Vec<TokenScore>> {
    let tokens = tokenizer.tokenize(text, TokenizeOptions::SENTENCE)?;
    if tokens.is_empty() {
        return Err(ChunkSummError::EmptyChunkList);
    }

    let len = tokens.len();
    let device = model.device();
    let attention_mask = tokens.attention_mask.unwrap_or_else(|| vec![1; len]);
    let input_ids = Tensor::from_vec(tokens.input_ids.clone(), (1, len), device)?;
    let attention_mask = Tensor::from_vec(attention_mask, (1, len), device)?;
    let token_type_ids = Tensor::zeros((1, len), DType::U32, device)?;

    let probabilities = model
        .forward(&input_ids, &attention_mask, &token_type_ids, false)?
        .squeeze(0)?
        .to_dtype(DType::F32)?
        .to_vec2::<f32>()?;

    Ok(tokens
        .input_ids
        .iter()
        .zip(probabilities)
        .map(|(&token_id, row)| TokenScore {
            token_id,
            in_summary: row[IN_SUMMARY],
            out_of_summary: row[OUT_OF_SUMMARY],
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::testing::PositionalEncoder;
    use crate::tokenizer::{WhitespaceTokenizer, CLS_TOKEN_ID, SEP_TOKEN_ID};
    use candle_core::Device;

    fn model(config: ModelConfig) -> ChunkSumm<PositionalEncoder> {
        ChunkSumm::new(
            PositionalEncoder::new(4, 6),
            config.with_hidden_size(4),
            &Device::Cpu,
        )
        .unwrap()
    }

    #[test]
    fn test_scores_every_token() {
        let m = model(ModelConfig::new());
        let tokenizer = WhitespaceTokenizer::default();
        let scores = get_token_scores(&m, &tokenizer, "chunked long document models").unwrap();

        assert_eq!(scores.len(), 6);
        assert_eq!(scores[0].token_id, CLS_TOKEN_ID);
        assert_eq!(scores[5].token_id, SEP_TOKEN_ID);
        for score in &scores {
            assert!((score.in_summary + score.out_of_summary - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_unchunked_scoring_truncates() {
        let tokenizer = WhitespaceTokenizer::default();
        let text = "one two three four five six seven eight";

        let truncated = get_token_scores(&model(ModelConfig::new().with_chunk_size(4)), &tokenizer, text)
            .unwrap();
        assert_eq!(truncated.len(), 4);

        let chunked = get_token_scores(
            &model(ModelConfig::new().with_chunk_size(4).with_chunking(true)),
            &tokenizer,
            text,
        )
        .unwrap();
        assert_eq!(chunked.len(), 10);
    }
}
