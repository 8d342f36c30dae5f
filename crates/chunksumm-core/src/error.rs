use thiserror::Error;

/// Errors that can occur during ChunkSumm core operations.
#[derive(Debug, Error)]
pub enum ChunkSummError {
    /// A source row is missing a required field or carries an unusable value.
    #[error("malformed record at row {row}: {reason}")]
    MalformedRecord {
        /// 1-based row (line) number in the source table.
        row: usize,
        /// What was wrong with the row.
        reason: String,
    },

    /// A dataset index was outside `0..len`.
    #[error("index {index} out of range for dataset of length {len}")]
    IndexOutOfRange {
        /// The requested index.
        index: usize,
        /// The dataset length.
        len: usize,
    },

    /// The sequences of one tokenized example do not share a length.
    #[error("tokenized example fields differ in length: {0}")]
    LengthMismatch(String),

    /// Collation was asked to build a batch from zero examples.
    #[error("cannot collate an empty batch")]
    EmptyBatch,

    /// A token sequence produced no chunks to encode.
    #[error("cannot embed an empty token sequence")]
    EmptyChunkList,

    /// The encoder returned fewer hidden layers than the aggregator pools.
    #[error("encoder returned {available} hidden layers, {required} required")]
    NotEnoughLayers {
        /// Layers the aggregator needs.
        required: usize,
        /// Layers the encoder produced.
        available: usize,
    },

    /// Model outputs and expanded labels cannot be aligned element for element.
    #[error("shape mismatch: outputs {outputs:?} vs labels {labels:?}")]
    ShapeMismatch {
        /// Shape of the model outputs.
        outputs: Vec<usize>,
        /// Shape of the expanded labels.
        labels: Vec<usize>,
    },

    /// The data module was used before `setup`.
    #[error("data module is not set up; call setup() first")]
    NotSetUp,

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The model weights file could not be loaded.
    #[error("failed to load model: {0}")]
    ModelLoadError(String),

    /// Tokenizer failure.
    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    /// Candle ML framework error.
    #[error("ML inference error: {0}")]
    CandleError(String),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<candle_core::Error> for ChunkSummError {
    fn from(err: candle_core::Error) -> Self {
        ChunkSummError::CandleError(err.to_string())
    }
}

/// Result type alias for ChunkSumm operations.
pub type Result<T> = std::result::Result<T, ChunkSummError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = ChunkSummError::EmptyBatch;
        assert_eq!(err.to_string(), "cannot collate an empty batch");

        let err = ChunkSummError::MalformedRecord {
            row: 3,
            reason: "missing field `text`".into(),
        };
        assert!(err.to_string().contains("row 3"));
        assert!(err.to_string().contains("text"));

        let err = ChunkSummError::ShapeMismatch {
            outputs: vec![1, 512, 2],
            labels: vec![1, 600, 2],
        };
        assert!(err.to_string().contains("512"));
    }

    #[test]
    fn candle_errors_convert() {
        let err: ChunkSummError = candle_core::Error::Msg("boom".into()).into();
        assert!(matches!(err, ChunkSummError::CandleError(ref m) if m.contains("boom")));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ChunkSummError>();
    }
}
