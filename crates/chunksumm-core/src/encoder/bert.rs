//! BERT encoder built from candle-nn layers.
//!
//! Parameter names follow the Hugging Face checkpoint layout, so a
//! `model.safetensors` exported from `transformers` loads directly. Weights
//! live in a [`VarMap`], which keeps them trainable.

use std::collections::HashMap;
use std::path::Path;

use candle_core::{DType, Device, Module, Tensor, Var, D};
use candle_nn::{embedding, layer_norm, linear, Embedding, LayerNorm, Linear, VarBuilder, VarMap};
use serde::Deserialize;

use super::{EncoderOutput, LayeredEncoder};
use crate::error::{ChunkSummError, Result};

/// Bias added to attention scores of padded keys.
const MASKED_SCORE: f64 = -10000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HiddenAct {
    #[default]
    Gelu,
    #[serde(alias = "gelu_new", alias = "gelu_pytorch_tanh")]
    GeluApproximate,
    Relu,
}

impl HiddenAct {
    fn apply(self, xs: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            HiddenAct::Gelu => xs.gelu_erf(),
            HiddenAct::GeluApproximate => xs.gelu(),
            HiddenAct::Relu => xs.relu(),
        }
    }
}

fn default_type_vocab_size() -> usize {
    2
}

fn default_layer_norm_eps() -> f64 {
    1e-12
}

/// The subset of a Hugging Face BERT `config.json` the encoder needs.
#[derive(Debug, Clone, Deserialize)]
pub struct BertConfig {
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub intermediate_size: usize,
    #[serde(default)]
    pub hidden_act: HiddenAct,
    pub max_position_embeddings: usize,
    #[serde(default = "default_type_vocab_size")]
    pub type_vocab_size: usize,
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,
}

impl BertConfig {
    /// BERT-base (uncased) dimensions.
    pub fn base() -> Self {
        Self {
            vocab_size: 30522,
            hidden_size: 768,
            num_hidden_layers: 12,
            num_attention_heads: 12,
            intermediate_size: 3072,
            hidden_act: HiddenAct::Gelu,
            max_position_embeddings: 512,
            type_vocab_size: 2,
            layer_norm_eps: 1e-12,
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ChunkSummError::ModelLoadError(format!("Failed to read config: {}", e))
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            ChunkSummError::ModelLoadError(format!("Failed to parse config: {}", e))
        })?;
        if config.num_attention_heads == 0 || config.hidden_size % config.num_attention_heads != 0
        {
            return Err(ChunkSummError::ModelLoadError(format!(
                "hidden_size {} is not divisible by {} attention heads",
                config.hidden_size, config.num_attention_heads
            )));
        }
        Ok(config)
    }
}

struct BertEmbeddings {
    word_embeddings: Embedding,
    position_embeddings: Embedding,
    token_type_embeddings: Embedding,
    layer_norm: LayerNorm,
}

impl BertEmbeddings {
    fn load(vb: VarBuilder, config: &BertConfig) -> candle_core::Result<Self> {
        Ok(Self {
            word_embeddings: embedding(
                config.vocab_size,
                config.hidden_size,
                vb.pp("word_embeddings"),
            )?,
            position_embeddings: embedding(
                config.max_position_embeddings,
                config.hidden_size,
                vb.pp("position_embeddings"),
            )?,
            token_type_embeddings: embedding(
                config.type_vocab_size,
                config.hidden_size,
                vb.pp("token_type_embeddings"),
            )?,
            layer_norm: layer_norm(config.hidden_size, config.layer_norm_eps, vb.pp("LayerNorm"))?,
        })
    }

    fn forward(&self, input_ids: &Tensor, token_type_ids: &Tensor) -> candle_core::Result<Tensor> {
        let seq_len = input_ids.dim(1)?;
        let position_ids = Tensor::arange(0u32, seq_len as u32, input_ids.device())?;

        let embeddings = (self.word_embeddings.forward(input_ids)?
            + self.token_type_embeddings.forward(token_type_ids)?)?
            .broadcast_add(&self.position_embeddings.forward(&position_ids)?)?;
        self.layer_norm.forward(&embeddings)
    }
}

struct BertSelfAttention {
    query: Linear,
    key: Linear,
    value: Linear,
    num_heads: usize,
    head_dim: usize,
}

impl BertSelfAttention {
    fn load(vb: VarBuilder, config: &BertConfig) -> candle_core::Result<Self> {
        let hidden = config.hidden_size;
        Ok(Self {
            query: linear(hidden, hidden, vb.pp("query"))?,
            key: linear(hidden, hidden, vb.pp("key"))?,
            value: linear(hidden, hidden, vb.pp("value"))?,
            num_heads: config.num_attention_heads,
            head_dim: hidden / config.num_attention_heads,
        })
    }

    fn split_heads(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let (batch, seq_len, _) = xs.dims3()?;
        xs.reshape((batch, seq_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()
    }

    fn forward(&self, hidden_states: &Tensor, mask_bias: &Tensor) -> candle_core::Result<Tensor> {
        let (batch, seq_len, hidden) = hidden_states.dims3()?;

        let query = self.split_heads(&self.query.forward(hidden_states)?)?;
        let key = self.split_heads(&self.key.forward(hidden_states)?)?;
        let value = self.split_heads(&self.value.forward(hidden_states)?)?;

        let scores = (query.matmul(&key.t()?.contiguous()?)? / (self.head_dim as f64).sqrt())?;
        let scores = scores.broadcast_add(mask_bias)?;
        let probs = candle_nn::ops::softmax_last_dim(&scores)?;

        probs
            .matmul(&value)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((batch, seq_len, hidden))
    }
}

/// Dense projection, residual add, layer norm.
struct ResidualOutput {
    dense: Linear,
    layer_norm: LayerNorm,
}

impl ResidualOutput {
    fn load(vb: VarBuilder, in_dim: usize, config: &BertConfig) -> candle_core::Result<Self> {
        Ok(Self {
            dense: linear(in_dim, config.hidden_size, vb.pp("dense"))?,
            layer_norm: layer_norm(config.hidden_size, config.layer_norm_eps, vb.pp("LayerNorm"))?,
        })
    }

    fn forward(&self, xs: &Tensor, residual: &Tensor) -> candle_core::Result<Tensor> {
        self.layer_norm.forward(&(self.dense.forward(xs)? + residual)?)
    }
}

struct BertLayer {
    attention: BertSelfAttention,
    attention_output: ResidualOutput,
    intermediate: Linear,
    activation: HiddenAct,
    output: ResidualOutput,
}

impl BertLayer {
    fn load(vb: VarBuilder, config: &BertConfig) -> candle_core::Result<Self> {
        Ok(Self {
            attention: BertSelfAttention::load(vb.pp("attention").pp("self"), config)?,
            attention_output: ResidualOutput::load(
                vb.pp("attention").pp("output"),
                config.hidden_size,
                config,
            )?,
            intermediate: linear(
                config.hidden_size,
                config.intermediate_size,
                vb.pp("intermediate").pp("dense"),
            )?,
            activation: config.hidden_act,
            output: ResidualOutput::load(vb.pp("output"), config.intermediate_size, config)?,
        })
    }

    fn forward(&self, hidden_states: &Tensor, mask_bias: &Tensor) -> candle_core::Result<Tensor> {
        let attended = self.attention.forward(hidden_states, mask_bias)?;
        let attended = self.attention_output.forward(&attended, hidden_states)?;
        let intermediate = self
            .activation
            .apply(&self.intermediate.forward(&attended)?)?;
        self.output.forward(&intermediate, &attended)
    }
}

/// Older checkpoints name layer norm parameters `gamma`/`beta`.
fn legacy_layer_norm_name(name: &str) -> Option<String> {
    if let Some(base) = name.strip_suffix(".LayerNorm.weight") {
        return Some(format!("{base}.LayerNorm.gamma"));
    }
    name.strip_suffix(".LayerNorm.bias")
        .map(|base| format!("{base}.LayerNorm.beta"))
}

/// Copy checkpoint tensors into every variable of `varmap`.
fn restore_vars(varmap: &VarMap, tensors: &HashMap<String, Tensor>) -> Result<()> {
    let vars = varmap
        .data()
        .lock()
        .map_err(|_| ChunkSummError::ModelLoadError("variable map lock poisoned".into()))?;

    for (name, var) in vars.iter() {
        let tensor = tensors
            .get(name)
            .or_else(|| legacy_layer_norm_name(name).and_then(|legacy| tensors.get(&legacy)))
            .ok_or_else(|| ChunkSummError::ModelLoadError(format!("tensor {name} not found")))?;
        var.set(&tensor.to_dtype(var.dtype())?)
            .map_err(|e| ChunkSummError::ModelLoadError(format!("{name}: {e}")))?;
    }
    Ok(())
}

/// BERT encoder returning every hidden layer.
pub struct BertEncoder {
    embeddings: BertEmbeddings,
    layers: Vec<BertLayer>,
    config: BertConfig,
    varmap: Option<VarMap>,
}

impl BertEncoder {
    /// Build the encoder from an arbitrary variable source.
    pub fn load(vb: VarBuilder, config: &BertConfig) -> Result<Self> {
        let embeddings = BertEmbeddings::load(vb.pp("embeddings"), config)?;
        let layers = (0..config.num_hidden_layers)
            .map(|i| BertLayer::load(vb.pp("encoder").pp("layer").pp(i), config))
            .collect::<candle_core::Result<Vec<_>>>()?;

        Ok(Self {
            embeddings,
            layers,
            config: config.clone(),
            varmap: None,
        })
    }

    /// Freshly initialised, trainable weights.
    pub fn random(config: &BertConfig, device: &Device) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let mut encoder = Self::load(vb, config)?;
        encoder.varmap = Some(varmap);
        Ok(encoder)
    }

    /// Load `config.json` and `model.safetensors` from a model directory into
    /// trainable variables.
    pub fn from_pretrained<P: AsRef<Path>>(model_dir: P, device: &Device) -> Result<Self> {
        let model_dir = model_dir.as_ref();
        let config = BertConfig::from_file(model_dir.join("config.json"))?;

        let weights = model_dir.join("model.safetensors");
        if !weights.exists() {
            return Err(ChunkSummError::ModelLoadError(format!(
                "Model not found at {}",
                weights.display()
            )));
        }

        let tensors = candle_core::safetensors::load(&weights, device)
            .map_err(|e| ChunkSummError::ModelLoadError(e.to_string()))?;
        // Checkpoints saved from a task head nest the encoder under `bert.`.
        let nested = !tensors.contains_key("embeddings.word_embeddings.weight")
            && tensors.contains_key("bert.embeddings.word_embeddings.weight");

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let vb = if nested { vb.pp("bert") } else { vb };
        let mut encoder = Self::load(vb, &config)?;
        restore_vars(&varmap, &tensors)?;
        encoder.varmap = Some(varmap);

        tracing::info!(
            path = %model_dir.display(),
            hidden = config.hidden_size,
            layers = config.num_hidden_layers,
            "loaded BERT encoder"
        );
        Ok(encoder)
    }

    pub fn config(&self) -> &BertConfig {
        &self.config
    }

    fn mask_bias(attention_mask: &Tensor) -> candle_core::Result<Tensor> {
        let (batch, seq_len) = attention_mask.dims2()?;
        // 1 -> 0.0, 0 -> MASKED_SCORE
        attention_mask
            .to_dtype(DType::F32)?
            .affine(-MASKED_SCORE, MASKED_SCORE)?
            .reshape((batch, 1, 1, seq_len))
    }

    fn forward(
        &self,
        input_ids: &Tensor,
        attention_mask: &Tensor,
        token_type_ids: &Tensor,
        keep_all: bool,
    ) -> candle_core::Result<(Tensor, Vec<Tensor>)> {
        let seq_len = input_ids.dim(D::Minus1)?;
        if seq_len > self.config.max_position_embeddings {
            candle_core::bail!(
                "sequence of {} tokens exceeds {} positions",
                seq_len,
                self.config.max_position_embeddings
            );
        }

        let mask_bias = Self::mask_bias(attention_mask)?;
        let mut hidden = self.embeddings.forward(input_ids, token_type_ids)?;
        let mut all = Vec::with_capacity(if keep_all { self.layers.len() + 1 } else { 0 });

        for layer in &self.layers {
            if keep_all {
                all.push(hidden.clone());
            }
            hidden = layer.forward(&hidden, &mask_bias)?;
        }
        if keep_all {
            all.push(hidden.clone());
        }

        Ok((hidden, all))
    }
}

impl LayeredEncoder for BertEncoder {
    fn encode(
        &self,
        input_ids: &Tensor,
        attention_mask: &Tensor,
        token_type_ids: &Tensor,
        output_hidden_states: bool,
    ) -> Result<EncoderOutput> {
        let (last_hidden_state, all) =
            self.forward(input_ids, attention_mask, token_type_ids, output_hidden_states)?;

        Ok(EncoderOutput {
            last_hidden_state,
            hidden_states: output_hidden_states.then_some(all),
        })
    }

    fn hidden_size(&self) -> usize {
        self.config.hidden_size
    }

    fn trainable_vars(&self) -> Vec<Var> {
        self.varmap
            .as_ref()
            .map(VarMap::all_vars)
            .unwrap_or_default()
    }
}
