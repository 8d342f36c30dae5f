//! # Tokenized Example Provider
//!
//! Turns records into token sequences carrying one label per token. A dataset
//! works at one of two granularities: every record is an example
//! ([`Granularity::Sentence`]), or every paper is one example made of all its
//! sentences in source order ([`Granularity::Paper`]).

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{ChunkSummError, Result};
use crate::record::Record;
use crate::tokenizer::{TextTokenizer, TokenizeOptions, TokenizedText};

/// What one example of a dataset stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// One record (sentence) per example.
    #[default]
    Sentence,
    /// One paper per example.
    Paper,
}

/// Token ids with a label for every position.
///
/// All four sequences have the same length.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TokenizedExample {
    pub input_ids: Vec<u32>,
    pub attention_mask: Vec<u32>,
    pub token_type_ids: Vec<u32>,
    pub targets: Vec<f32>,
}

impl TokenizedExample {
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }

    /// Check the equal-length invariant.
    pub fn validate(&self) -> Result<()> {
        let len = self.input_ids.len();
        if self.attention_mask.len() != len
            || self.token_type_ids.len() != len
            || self.targets.len() != len
        {
            return Err(ChunkSummError::LengthMismatch(format!(
                "input_ids={}, attention_mask={}, token_type_ids={}, targets={}",
                len,
                self.attention_mask.len(),
                self.token_type_ids.len(),
                self.targets.len()
            )));
        }
        Ok(())
    }
}

/// Attach `label` to every token of `tokens`.
///
/// A tokenizer that omitted the masks gets an all-ones attention mask and
/// all-zero segment ids.
pub fn propagate_label(tokens: TokenizedText, label: bool) -> TokenizedExample {
    let len = tokens.input_ids.len();
    let target = if label { 1.0 } else { 0.0 };

    TokenizedExample {
        attention_mask: tokens.attention_mask.unwrap_or_else(|| vec![1; len]),
        token_type_ids: tokens.token_type_ids.unwrap_or_else(|| vec![0; len]),
        targets: vec![target; len],
        input_ids: tokens.input_ids,
    }
}

/// Concatenate labeled examples end to end, preserving order.
pub fn concat_examples<I>(parts: I) -> TokenizedExample
where
    I: IntoIterator<Item = TokenizedExample>,
{
    parts
        .into_iter()
        .fold(TokenizedExample::default(), |mut acc, part| {
            acc.input_ids.extend(part.input_ids);
            acc.attention_mask.extend(part.attention_mask);
            acc.token_type_ids.extend(part.token_type_ids);
            acc.targets.extend(part.targets);
            acc
        })
}

/// The rows of one paper, in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaperGroup {
    pub paper_id: String,
    pub rows: Vec<usize>,
}

/// Group record indices by `paper_id`.
///
/// Papers are ordered by first appearance in `records`, not sorted by
/// `paper_id`, so paper-level batches follow the source table. Rows inside a
/// paper keep source order.
pub fn group_papers(records: &[Record]) -> Vec<PaperGroup> {
    let mut slots: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<PaperGroup> = Vec::new();

    for (row, record) in records.iter().enumerate() {
        match slots.get(record.paper_id.as_str()) {
            Some(&slot) => groups[slot].rows.push(row),
            None => {
                slots.insert(record.paper_id.as_str(), groups.len());
                groups.push(PaperGroup {
                    paper_id: record.paper_id.clone(),
                    rows: vec![row],
                });
            }
        }
    }

    groups
}

enum Layout {
    Sentences,
    Papers(Vec<PaperGroup>),
}

/// Map-style dataset over one split.
pub struct SummDataset {
    records: Arc<Vec<Record>>,
    tokenizer: Arc<dyn TextTokenizer>,
    layout: Layout,
}

impl SummDataset {
    pub fn new(
        records: Arc<Vec<Record>>,
        tokenizer: Arc<dyn TextTokenizer>,
        granularity: Granularity,
    ) -> Self {
        let layout = match granularity {
            Granularity::Sentence => Layout::Sentences,
            Granularity::Paper => Layout::Papers(group_papers(&records)),
        };

        Self {
            records,
            tokenizer,
            layout,
        }
    }

    pub fn granularity(&self) -> Granularity {
        match self.layout {
            Layout::Sentences => Granularity::Sentence,
            Layout::Papers(_) => Granularity::Paper,
        }
    }

    /// Number of sentences, or number of distinct papers.
    pub fn len(&self) -> usize {
        match &self.layout {
            Layout::Sentences => self.records.len(),
            Layout::Papers(papers) => papers.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The raw records backing this dataset.
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Build the example at `index`.
    pub fn get(&self, index: usize) -> Result<TokenizedExample> {
        let len = self.len();
        if index >= len {
            return Err(ChunkSummError::IndexOutOfRange { index, len });
        }

        let example = match &self.layout {
            Layout::Sentences => {
                let record = &self.records[index];
                let tokens = self
                    .tokenizer
                    .tokenize(&record.text, TokenizeOptions::SENTENCE)?;
                propagate_label(tokens, record.in_summary)
            }
            Layout::Papers(papers) => {
                let parts = papers[index]
                    .rows
                    .iter()
                    .map(|&row| {
                        let record = &self.records[row];
                        self.tokenizer
                            .tokenize(&record.text, TokenizeOptions::FRAGMENT)
                            .map(|tokens| propagate_label(tokens, record.in_summary))
                    })
                    .collect::<Result<Vec<_>>>()?;
                concat_examples(parts)
            }
        };

        example.validate()?;
        Ok(example)
    }
}
