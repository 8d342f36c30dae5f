//! # Tokenizer Capability
//!
//! The dataset consumes tokenization through [`TextTokenizer`]. The trait is
//! implemented for Hugging Face [`tokenizers::Tokenizer`] (the production
//! path) and for [`WhitespaceTokenizer`], a deterministic word-level
//! tokenizer used for dry runs, benchmarks and tests.

use std::path::Path;

use tokenizers::Tokenizer as HfTokenizer;

use crate::error::{ChunkSummError, Result};

/// `[CLS]` id in BERT vocabularies.
pub const CLS_TOKEN_ID: u32 = 101;
/// `[SEP]` id in BERT vocabularies.
pub const SEP_TOKEN_ID: u32 = 102;

/// Options forwarded to the tokenizer for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenizeOptions {
    /// Wrap the text in boundary tokens (`[CLS] ... [SEP]`).
    pub add_special_tokens: bool,
    pub return_attention_mask: bool,
    pub return_token_type_ids: bool,
}

impl TokenizeOptions {
    /// A stand-alone sentence: boundary tokens and both masks.
    pub const SENTENCE: Self = Self {
        add_special_tokens: true,
        return_attention_mask: true,
        return_token_type_ids: true,
    };

    /// A sentence that will be concatenated into a longer paper sequence.
    pub const FRAGMENT: Self = Self {
        add_special_tokens: false,
        return_attention_mask: true,
        return_token_type_ids: true,
    };
}

/// Output of one tokenizer call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TokenizedText {
    pub input_ids: Vec<u32>,
    pub attention_mask: Option<Vec<u32>>,
    pub token_type_ids: Option<Vec<u32>>,
}

impl TokenizedText {
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }
}

/// Text to token ids.
pub trait TextTokenizer: Send + Sync {
    fn tokenize(&self, text: &str, options: TokenizeOptions) -> Result<TokenizedText>;
}

impl TextTokenizer for HfTokenizer {
    fn tokenize(&self, text: &str, options: TokenizeOptions) -> Result<TokenizedText> {
        let encoding = self
            .encode(text, options.add_special_tokens)
            .map_err(|e| ChunkSummError::Tokenizer(format!("Tokenize error: {}", e)))?;

        Ok(TokenizedText {
            input_ids: encoding.get_ids().to_vec(),
            attention_mask: options
                .return_attention_mask
                .then(|| encoding.get_attention_mask().to_vec()),
            token_type_ids: options
                .return_token_type_ids
                .then(|| encoding.get_type_ids().to_vec()),
        })
    }
}

/// Load a Hugging Face `tokenizer.json`.
pub fn load_tokenizer<P: AsRef<Path>>(path: P) -> Result<HfTokenizer> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ChunkSummError::Tokenizer(format!(
            "Tokenizer not found at {}",
            path.display()
        )));
    }
    HfTokenizer::from_file(path).map_err(|e| ChunkSummError::Tokenizer(e.to_string()))
}

/// Word-level tokenizer: one token per whitespace-separated word, ids hashed
/// into `[first_word_id, vocab_size)`.
#[derive(Debug, Clone)]
pub struct WhitespaceTokenizer {
    vocab_size: u32,
}

impl WhitespaceTokenizer {
    /// Ids below this are reserved for special tokens.
    const FIRST_WORD_ID: u32 = 1000;

    pub fn new(vocab_size: u32) -> Self {
        Self {
            vocab_size: vocab_size.max(Self::FIRST_WORD_ID + 1),
        }
    }

    fn word_id(&self, word: &str) -> u32 {
        // FNV-1a
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in word.to_lowercase().bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x100000001b3);
        }
        let span = u64::from(self.vocab_size - Self::FIRST_WORD_ID);
        Self::FIRST_WORD_ID + (hash % span) as u32
    }
}

impl Default for WhitespaceTokenizer {
    fn default() -> Self {
        Self::new(30522)
    }
}

impl TextTokenizer for WhitespaceTokenizer {
    fn tokenize(&self, text: &str, options: TokenizeOptions) -> Result<TokenizedText> {
        let mut input_ids = Vec::new();
        if options.add_special_tokens {
            input_ids.push(CLS_TOKEN_ID);
        }
        input_ids.extend(text.split_whitespace().map(|w| self.word_id(w)));
        if options.add_special_tokens {
            input_ids.push(SEP_TOKEN_ID);
        }

        let len = input_ids.len();
        Ok(TokenizedText {
            input_ids,
            attention_mask: options.return_attention_mask.then(|| vec![1; len]),
            token_type_ids: options.return_token_type_ids.then(|| vec![0; len]),
        })
    }
}
