//! Source records and the JSON-lines loader that validates them.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ChunkSummError, Result};

/// One row of source data: a sentence of a paper and whether it belongs to
/// the paper's ground-truth summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
    pub paper_id: String,
    pub text: String,
    pub in_summary: bool,
}

impl Record {
    pub fn new(paper_id: impl Into<String>, text: impl Into<String>, in_summary: bool) -> Self {
        Self {
            paper_id: paper_id.into(),
            text: text.into(),
            in_summary,
        }
    }
}

/// Paper ids appear both as strings and as integers in exported tables.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PaperKey {
    Text(String),
    Number(i64),
}

/// Labels appear both as booleans and as 0/1 integers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LabelValue {
    Flag(bool),
    Number(i64),
}

/// A row as it sits in the file, before validation.
#[derive(Debug, Deserialize)]
struct RawRecord {
    paper_id: Option<PaperKey>,
    text: Option<String>,
    in_summary: Option<LabelValue>,
}

impl RawRecord {
    fn validate(self, row: usize) -> Result<Record> {
        let malformed = |reason: &str| ChunkSummError::MalformedRecord {
            row,
            reason: reason.to_string(),
        };

        let paper_id = match self.paper_id.ok_or_else(|| malformed("missing field `paper_id`"))? {
            PaperKey::Text(id) => id,
            PaperKey::Number(id) => id.to_string(),
        };
        let text = self.text.ok_or_else(|| malformed("missing field `text`"))?;
        let in_summary = match self
            .in_summary
            .ok_or_else(|| malformed("missing field `in_summary`"))?
        {
            LabelValue::Flag(flag) => flag,
            LabelValue::Number(0) => false,
            LabelValue::Number(1) => true,
            LabelValue::Number(other) => {
                return Err(malformed(&format!("`in_summary` must be 0 or 1, got {other}")));
            }
        };

        Ok(Record {
            paper_id,
            text,
            in_summary,
        })
    }
}

/// Parse JSON-lines records from a reader. Blank lines are skipped; any
/// malformed row rejects the whole input.
pub fn parse_jsonl_records<R: BufRead>(reader: R) -> Result<Vec<Record>> {
    let mut records = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let row = idx + 1;
        let raw: RawRecord =
            serde_json::from_str(line).map_err(|e| ChunkSummError::MalformedRecord {
                row,
                reason: e.to_string(),
            })?;
        records.push(raw.validate(row)?);
    }

    Ok(records)
}

/// Load a JSON-lines record file.
pub fn load_jsonl_records<P: AsRef<Path>>(path: P) -> Result<Vec<Record>> {
    let file = File::open(path.as_ref())?;
    let records = parse_jsonl_records(BufReader::new(file))?;
    tracing::debug!(
        path = %path.as_ref().display(),
        records = records.len(),
        "loaded records"
    );
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_valid_rows() {
        let input = r#"{"paper_id": "p1", "text": "First sentence.", "in_summary": true}

{"paper_id": 7, "text": "Second sentence.", "in_summary": 0}
"#;
        let records = parse_jsonl_records(Cursor::new(input)).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], Record::new("p1", "First sentence.", true));
        assert_eq!(records[1].paper_id, "7");
        assert!(!records[1].in_summary);
    }

    #[test]
    fn test_missing_text_is_rejected() {
        let input = r#"{"paper_id": "p1", "text": "ok", "in_summary": true}
{"paper_id": "p1", "in_summary": true}"#;
        let err = parse_jsonl_records(Cursor::new(input)).unwrap_err();
        match err {
            ChunkSummError::MalformedRecord { row, reason } => {
                assert_eq!(row, 2);
                assert!(reason.contains("text"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_label_is_rejected() {
        let input = r#"{"paper_id": "p1", "text": "no label"}"#;
        let err = parse_jsonl_records(Cursor::new(input)).unwrap_err();
        assert!(err.to_string().contains("in_summary"));
    }

    #[test]
    fn test_label_out_of_range_is_rejected() {
        let input = r#"{"paper_id": "p1", "text": "x", "in_summary": 2}"#;
        assert!(matches!(
            parse_jsonl_records(Cursor::new(input)),
            Err(ChunkSummError::MalformedRecord { row: 1, .. })
        ));
    }

    #[test]
    fn test_invalid_json_is_rejected() {
        let input = "{not json}";
        assert!(parse_jsonl_records(Cursor::new(input)).is_err());
    }
}
