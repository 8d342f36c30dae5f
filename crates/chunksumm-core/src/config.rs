//! # Pipeline Configuration
//!
//! Explicit, serializable configuration for the data and model halves of the
//! pipeline. Every field has a documented default so a partial JSON file (or
//! none at all) yields a usable configuration.

use std::path::{Path, PathBuf};

use candle_core::Device;
use serde::{Deserialize, Serialize};

use crate::datamodule::TrainSize;
use crate::dataset::Granularity;
use crate::error::{ChunkSummError, Result};

/// Positional limit of the encoder, and the default chunk window.
pub const DEFAULT_CHUNK_SIZE: usize = 512;
/// Number of trailing hidden layers averaged into a token embedding.
pub const DEFAULT_POOLED_LAYERS: usize = 5;
/// Hidden width of BERT-base encoders.
pub const DEFAULT_HIDDEN_SIZE: usize = 768;
pub const DEFAULT_LEARNING_RATE: f64 = 6e-5;
pub const DEFAULT_SEED: u64 = 42;

/// Top-level configuration passed at initialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Seed for every random decision (train subsampling, train shuffling).
    pub seed: u64,
    /// When set, remote model locations are rejected before any loading.
    pub offline: bool,
    /// Compute device: `cpu`, `cuda:N` or `metal`.
    pub device: String,
    pub model: ModelConfig,
    pub data: DataConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            seed: DEFAULT_SEED,
            offline: true,
            device: "cpu".to_string(),
            model: ModelConfig::default(),
            data: DataConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration from a JSON file. Missing keys take defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = device.into();
        self
    }

    pub fn with_offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    pub fn with_model(mut self, model: ModelConfig) -> Self {
        self.model = model;
        self
    }

    pub fn with_data(mut self, data: DataConfig) -> Self {
        self.data = data;
        self
    }

    /// Reject values no component can work with.
    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;
        self.data.validate()?;
        self.device()?;
        Ok(())
    }

    /// Resolve a model location into a local directory.
    ///
    /// Locations with a URL scheme (`https://`, `hf://`, ...) are remote. With
    /// `offline` set they fail as [`ChunkSummError::InvalidConfig`]; otherwise
    /// they fail as [`ChunkSummError::ModelLoadError`], since nothing is
    /// downloaded. Local locations must be existing directories.
    pub fn resolve_model_dir(&self, location: &str) -> Result<PathBuf> {
        if location.contains("://") {
            if self.offline {
                return Err(ChunkSummError::InvalidConfig(format!(
                    "offline mode forbids remote model location {location:?}"
                )));
            }
            return Err(ChunkSummError::ModelLoadError(format!(
                "remote model location {location:?} must be downloaded to a local directory first"
            )));
        }

        let dir = PathBuf::from(location);
        if !dir.is_dir() {
            return Err(ChunkSummError::ModelLoadError(format!(
                "model directory not found at {}",
                dir.display()
            )));
        }
        Ok(dir)
    }

    /// Resolve the configured device string into a candle device.
    pub fn device(&self) -> Result<Device> {
        let spec = self.device.trim().to_lowercase();
        match spec.as_str() {
            "cpu" => Ok(Device::Cpu),
            "metal" => Ok(Device::new_metal(0)?),
            "cuda" => Ok(Device::new_cuda(0)?),
            other => match other.strip_prefix("cuda:") {
                Some(ordinal) => {
                    let ordinal = ordinal.parse::<usize>().map_err(|_| {
                        ChunkSummError::InvalidConfig(format!("bad cuda ordinal in {other:?}"))
                    })?;
                    Ok(Device::new_cuda(ordinal)?)
                }
                None => Err(ChunkSummError::InvalidConfig(format!(
                    "unknown device {other:?}"
                ))),
            },
        }
    }
}

/// Configuration of the aggregator and classification head.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub learning_rate: f64,
    pub n_classes: usize,
    /// Embed sequences window by window instead of truncating at `chunk_size`.
    pub enable_chunk: bool,
    pub chunk_size: usize,
    pub pooled_layers: usize,
    pub hidden_size: usize,
    /// Leave encoder parameters out of the optimizer.
    pub freeze_encoder: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            learning_rate: DEFAULT_LEARNING_RATE,
            n_classes: 2,
            enable_chunk: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
            pooled_layers: DEFAULT_POOLED_LAYERS,
            hidden_size: DEFAULT_HIDDEN_SIZE,
            freeze_encoder: false,
        }
    }
}

impl ModelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunking(mut self, enabled: bool) -> Self {
        self.enable_chunk = enabled;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_hidden_size(mut self, hidden_size: usize) -> Self {
        self.hidden_size = hidden_size;
        self
    }

    pub fn with_pooled_layers(mut self, pooled_layers: usize) -> Self {
        self.pooled_layers = pooled_layers;
        self
    }

    pub fn with_frozen_encoder(mut self, frozen: bool) -> Self {
        self.freeze_encoder = frozen;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(ChunkSummError::InvalidConfig("chunk_size must be > 0".into()));
        }
        if self.pooled_layers == 0 {
            return Err(ChunkSummError::InvalidConfig(
                "pooled_layers must be > 0".into(),
            ));
        }
        if self.n_classes != 2 {
            // The label encoding is defined for exactly two classes.
            return Err(ChunkSummError::InvalidConfig(format!(
                "n_classes must be 2, got {}",
                self.n_classes
            )));
        }
        if self.learning_rate.is_nan() || self.learning_rate <= 0.0 {
            return Err(ChunkSummError::InvalidConfig(
                "learning_rate must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration of dataset construction and batching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub batch_size: usize,
    /// Threads used to build batches; 0 builds them on the calling thread.
    pub workers: usize,
    pub train_size: TrainSize,
    pub granularity: Granularity,
    pub shuffle_train: bool,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            batch_size: 8,
            workers: 4,
            train_size: TrainSize::Full,
            granularity: Granularity::Sentence,
            shuffle_train: false,
        }
    }
}

impl DataConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_train_size(mut self, train_size: TrainSize) -> Self {
        self.train_size = train_size;
        self
    }

    pub fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle_train = shuffle;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(ChunkSummError::InvalidConfig("batch_size must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.seed, DEFAULT_SEED);
        assert_eq!(config.model.chunk_size, 512);
        assert_eq!(config.model.pooled_layers, 5);
        assert_eq!(config.model.hidden_size, 768);
        assert!(!config.model.enable_chunk);
        assert_eq!(config.data.batch_size, 8);
        assert_eq!(config.data.workers, 4);
        assert_eq!(config.data.train_size, TrainSize::Full);
        assert_eq!(config.data.granularity, Granularity::Sentence);
        assert!(!config.data.shuffle_train);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let json = r#"{"seed": 7, "data": {"granularity": "paper", "train_size": {"count": 10}}}"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.data.granularity, Granularity::Paper);
        assert_eq!(config.data.train_size, TrainSize::Count(10));
        assert_eq!(config.data.batch_size, 8);
        assert_eq!(config.model.learning_rate, DEFAULT_LEARNING_RATE);
    }

    #[test]
    fn test_builders() {
        let model = ModelConfig::new().with_chunking(true).with_chunk_size(128);
        assert!(model.enable_chunk);
        assert_eq!(model.chunk_size, 128);

        let data = DataConfig::new().with_batch_size(2).with_workers(0).with_shuffle(true);
        assert_eq!(data.batch_size, 2);
        assert_eq!(data.workers, 0);
        assert!(data.shuffle_train);
    }

    #[test]
    fn test_validation_rejects_zero_sizes() {
        assert!(ModelConfig::new().with_chunk_size(0).validate().is_err());
        assert!(ModelConfig::new().with_pooled_layers(0).validate().is_err());
        assert!(DataConfig::new().with_batch_size(0).validate().is_err());
    }

    #[test]
    fn test_offline_rejects_remote_model_locations() {
        let config = PipelineConfig::new();
        assert!(config.offline);
        let err = config
            .resolve_model_dir("https://huggingface.co/bert-base-uncased")
            .unwrap_err();
        assert!(matches!(err, ChunkSummError::InvalidConfig(ref m) if m.contains("offline")));

        let online = PipelineConfig::new().with_offline(false);
        let err = online.resolve_model_dir("hf://bert-base-uncased").unwrap_err();
        assert!(matches!(err, ChunkSummError::ModelLoadError(_)));
    }

    #[test]
    fn test_local_model_locations_must_exist() {
        let config = PipelineConfig::new();
        let here = std::env::temp_dir();
        assert_eq!(config.resolve_model_dir(here.to_str().unwrap()).unwrap(), here);

        let missing = here.join("chunksumm-no-such-model-dir");
        let err = config
            .resolve_model_dir(missing.to_str().unwrap())
            .unwrap_err();
        assert!(matches!(err, ChunkSummError::ModelLoadError(_)));
    }

    #[test]
    fn test_device_parsing() {
        assert!(matches!(PipelineConfig::new().device(), Ok(Device::Cpu)));
        let bad = PipelineConfig::new().with_device("tpu");
        assert!(matches!(bad.device(), Err(ChunkSummError::InvalidConfig(_))));
    }
}
