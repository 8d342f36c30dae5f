//! # ChunkSumm Core
//!
//! Extractive summarization of long scientific papers. Each token of a paper
//! is classified as belonging to the ground-truth summary or not, using a
//! pretrained transformer encoder and a linear two-class head.
//!
//! Papers routinely exceed the encoder's 512-position limit, so the
//! [`aggregator`] splits long sequences into windows, encodes each window on
//! its own and stitches the per-token embeddings back together.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use chunksumm_core::{Granularity, Record, SummDataset, WhitespaceTokenizer};
//!
//! let records = Arc::new(vec![
//!     Record::new("p1", "Transformers read tokens", true),
//!     Record::new("p1", "Papers are long", false),
//! ]);
//! let dataset = SummDataset::new(
//!     records,
//!     Arc::new(WhitespaceTokenizer::default()),
//!     Granularity::Paper,
//! );
//!
//! let paper = dataset.get(0).unwrap();
//! assert_eq!(paper.len(), 6);
//! assert_eq!(paper.targets, vec![1.0, 1.0, 1.0, 0.0, 0.0, 0.0]);
//! ```
pub mod aggregator;
pub mod collate;
pub mod config;
pub mod datamodule;
pub mod dataset;
pub mod encoder;
pub mod error;
pub mod labels;
pub mod loss;
pub mod metrics;
pub mod model;
pub mod record;
pub mod scoring;
pub mod tokenizer;

#[cfg(test)]
mod testing;

// Re-export primary API
pub use aggregator::ChunkedAggregator;
pub use collate::{collate, Batch};
pub use config::{DataConfig, ModelConfig, PipelineConfig};
pub use datamodule::{BatchLoader, Split, SummDataModule, TrainSize};
pub use dataset::{Granularity, SummDataset, TokenizedExample};
pub use encoder::{BertConfig, BertEncoder, EncoderOutput, LayeredEncoder};
pub use error::{ChunkSummError, Result};
pub use model::{ChunkSumm, Stage, StepOutput};
pub use record::{load_jsonl_records, Record};
pub use scoring::{get_token_scores, TokenScore};
pub use tokenizer::{load_tokenizer, TextTokenizer, TokenizeOptions, WhitespaceTokenizer};
