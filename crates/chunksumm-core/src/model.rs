//! # Classification Head and Step Logic
//!
//! [`ChunkSumm`] couples an encoder, the chunked aggregator and a linear
//! two-class head. The training orchestrator drives it one batch at a time
//! through [`ChunkSumm::training_step`], [`ChunkSumm::validation_step`],
//! [`ChunkSumm::test_step`] and [`ChunkSumm::predict_step`], and updates
//! parameters with the optimizer from [`ChunkSumm::configure_optimizers`].

use std::path::Path;

use candle_core::{DType, Device, Module, Tensor, D};
use candle_nn::{linear, AdamW, Linear, Optimizer, ParamsAdamW, VarBuilder, VarMap};

use crate::aggregator::ChunkedAggregator;
use crate::collate::Batch;
use crate::config::ModelConfig;
use crate::encoder::LayeredEncoder;
use crate::error::{ChunkSummError, Result};
use crate::labels::{align_labels, expand_targets};
use crate::loss::binary_cross_entropy_with_logits;
use crate::metrics::auroc;

/// Which step produced a [`StepOutput`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Train,
    Validate,
    Test,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Train => "train",
            Stage::Validate => "val",
            Stage::Test => "test",
        };
        f.write_str(name)
    }
}

/// Loss and metric of one step, with the tensors they were computed from.
#[derive(Debug, Clone)]
pub struct StepOutput {
    /// Scalar loss. Attached to the graph for training steps.
    pub loss: Tensor,
    /// `None` when the batch holds a single class only.
    pub auc: Option<f32>,
    /// Logits, `(batch, tokens, n_classes)`.
    pub predictions: Tensor,
    /// Expanded labels, same shape as `predictions`.
    pub labels: Tensor,
}

impl StepOutput {
    pub fn loss_value(&self) -> Result<f32> {
        Ok(self.loss.to_dtype(DType::F32)?.to_scalar::<f32>()?)
    }
}

/// Encoder + chunked aggregation + linear head.
pub struct ChunkSumm<E: LayeredEncoder> {
    encoder: E,
    aggregator: ChunkedAggregator,
    head: Linear,
    head_vars: VarMap,
    config: ModelConfig,
    device: Device,
}

impl<E: LayeredEncoder> ChunkSumm<E> {
    /// Create the model with a freshly initialised head.
    pub fn new(encoder: E, config: ModelConfig, device: &Device) -> Result<Self> {
        config.validate()?;
        if encoder.hidden_size() != config.hidden_size {
            return Err(ChunkSummError::InvalidConfig(format!(
                "encoder hidden size {} differs from configured {}",
                encoder.hidden_size(),
                config.hidden_size
            )));
        }

        let head_vars = VarMap::new();
        let vb = VarBuilder::from_varmap(&head_vars, DType::F32, device);
        let head = linear(config.hidden_size, config.n_classes, vb.pp("l1"))?;

        Ok(Self {
            encoder,
            aggregator: ChunkedAggregator::from_config(&config),
            head,
            head_vars,
            config,
            device: device.clone(),
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    /// Per-token embeddings, `(batch, tokens, hidden)`.
    pub fn get_embedding(
        &self,
        input_ids: &Tensor,
        attention_mask: &Tensor,
        token_type_ids: &Tensor,
    ) -> Result<Tensor> {
        let embedding =
            self.aggregator
                .embed(&self.encoder, input_ids, attention_mask, token_type_ids)?;
        if self.config.freeze_encoder {
            return Ok(embedding.detach());
        }
        Ok(embedding)
    }

    /// Logits when `train` is set, class probabilities otherwise.
    pub fn forward(
        &self,
        input_ids: &Tensor,
        attention_mask: &Tensor,
        token_type_ids: &Tensor,
        train: bool,
    ) -> Result<Tensor> {
        let embedding = self.get_embedding(input_ids, attention_mask, token_type_ids)?;
        let logits = self.head.forward(&embedding)?;
        if train {
            Ok(logits)
        } else {
            Ok(candle_nn::ops::softmax(&logits, D::Minus1)?)
        }
    }

    fn shared_step(&self, batch: &Batch, stage: Stage) -> Result<StepOutput> {
        let logits = self.forward(
            &batch.input_ids,
            &batch.attention_mask,
            &batch.token_type_ids,
            true,
        )?;
        let labels = align_labels(&expand_targets(&batch.targets)?, &logits)?;

        let loss = binary_cross_entropy_with_logits(&logits, &labels)?;
        let auc = auroc(&logits, &labels)?;

        let output = match stage {
            Stage::Train => StepOutput {
                loss,
                auc,
                predictions: logits,
                labels,
            },
            Stage::Validate | Stage::Test => StepOutput {
                loss: loss.detach(),
                auc,
                predictions: logits.detach(),
                labels,
            },
        };

        tracing::debug!(
            stage = %stage,
            loss = output.loss_value()?,
            auc = ?output.auc,
            tokens = batch.seq_len(),
            "step"
        );
        Ok(output)
    }

    pub fn training_step(&self, batch: &Batch) -> Result<StepOutput> {
        self.shared_step(batch, Stage::Train)
    }

    pub fn validation_step(&self, batch: &Batch) -> Result<StepOutput> {
        self.shared_step(batch, Stage::Validate)
    }

    pub fn test_step(&self, batch: &Batch) -> Result<StepOutput> {
        self.shared_step(batch, Stage::Test)
    }

    /// Class probabilities `(batch, tokens, n_classes)`, detached.
    pub fn predict_step(&self, batch: &Batch) -> Result<Tensor> {
        let probabilities = self.forward(
            &batch.input_ids,
            &batch.attention_mask,
            &batch.token_type_ids,
            false,
        )?;
        Ok(probabilities.detach())
    }

    /// One AdamW optimizer (no weight decay) over the head and, unless frozen,
    /// the encoder.
    pub fn configure_optimizers(&self) -> Result<AdamW> {
        let mut vars = self.head_vars.all_vars();
        if !self.config.freeze_encoder {
            vars.extend(self.encoder.trainable_vars());
        }
        tracing::debug!(
            params = vars.len(),
            lr = self.config.learning_rate,
            "configured optimizer"
        );

        let params = ParamsAdamW {
            lr: self.config.learning_rate,
            weight_decay: 0.0,
            ..ParamsAdamW::default()
        };
        Ok(AdamW::new(vars, params)?)
    }

    /// Save the head weights as safetensors.
    pub fn save_head<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.head_vars.save(path.as_ref())?;
        tracing::info!(path = %path.as_ref().display(), "saved classification head");
        Ok(())
    }

    /// Load head weights written by [`ChunkSumm::save_head`].
    pub fn load_head<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.head_vars
            .load(path.as_ref())
            .map_err(|e| ChunkSummError::ModelLoadError(e.to_string()))?;
        Ok(())
    }
}
