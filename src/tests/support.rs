//! Test doubles and fixtures: an in-memory word-level tokenizer, a
//! checkpoint loader whose classifiers replay fixed probabilities, and
//! helpers that lay out model and data directories on disk.

use std::{cell::RefCell, collections::HashMap, fmt::Write as _, fs, io, path::Path, str::FromStr};

use ndarray::{Array2, ShapeError};
use thiserror::Error;
use tokenizers::Tokenizer;

use crate::{
    encoding::EncodedBatch,
    ensemble::{Checkpoint, CheckpointLoader, DEFAULT_MODEL_FILE, SequenceClassifier},
};

/// Vocabulary covering the words used across the test suite.
pub const BASIC_VOCAB: &[(&str, u32)] = &[
    ("[PAD]", 0),
    ("[UNK]", 1),
    ("[CLS]", 2),
    ("[SEP]", 3),
    ("good", 4),
    ("product", 5),
    ("bad", 6),
    ("service", 7),
    ("ok", 8),
];

#[expect(clippy::float_arithmetic, reason = "tolerance comparison")]
#[must_use]
pub fn approx_eq(a: f32, b: f32, tol: f32) -> bool {
    (a - b).abs() < tol
}

/// Builds a whitespace-split word-level tokenizer that wraps every sequence
/// in `[CLS] ... [SEP]`.
///
/// `vocab` must contain `[UNK]`, `[CLS]` and `[SEP]`.
///
/// # Panics
///
/// Panics if the generated definition is rejected by `tokenizers`.
#[must_use]
pub fn word_level_tokenizer(vocab: &[(&str, u32)]) -> Tokenizer {
    let id_of = |token: &str| {
        vocab
            .iter()
            .find(|(t, _)| *t == token)
            .map_or(1, |(_, id)| *id)
    };
    let entries = vocab.iter().fold(String::new(), |mut out, (token, id)| {
        if !out.is_empty() {
            out.push(',');
        }
        let _ = write!(out, "\"{token}\":{id}");
        out
    });
    let special = |token: &str, type_id: u32| {
        format!(r#"{{"SpecialToken":{{"id":"{token}","type_id":{type_id}}}}}"#)
    };
    let sequence =
        |id: &str, type_id: u32| format!(r#"{{"Sequence":{{"id":"{id}","type_id":{type_id}}}}}"#);
    let single = [special("[CLS]", 0), sequence("A", 0), special("[SEP]", 0)].join(",");
    let pair = [
        special("[CLS]", 0),
        sequence("A", 0),
        special("[SEP]", 0),
        sequence("B", 1),
        special("[SEP]", 1),
    ]
    .join(",");
    let cls = id_of("[CLS]");
    let sep = id_of("[SEP]");
    let definition = format!(
        r#"{{
  "version": "1.0",
  "truncation": null,
  "padding": null,
  "added_tokens": [],
  "normalizer": null,
  "pre_tokenizer": {{"type": "Whitespace"}},
  "post_processor": {{
    "type": "TemplateProcessing",
    "single": [{single}],
    "pair": [{pair}],
    "special_tokens": {{
      "[CLS]": {{"id": "[CLS]", "ids": [{cls}], "tokens": ["[CLS]"]}},
      "[SEP]": {{"id": "[SEP]", "ids": [{sep}], "tokens": ["[SEP]"]}}
    }}
  }},
  "decoder": null,
  "model": {{"type": "WordLevel", "vocab": {{{entries}}}, "unk_token": "[UNK]"}}
}}"#
    );
    Tokenizer::from_str(&definition).unwrap_or_else(|e| panic!("test tokenizer: {e}"))
}

/// Errors raised by the fixed-output doubles.
#[derive(Debug, Error)]
pub enum FixedOutputError {
    #[error("no outputs registered for checkpoint \"{0}\"")]
    UnknownCheckpoint(String),
    #[error("fixed outputs exhausted at row {0}")]
    Exhausted(usize),
    #[error("fixed outputs are ragged: {0}")]
    Shape(#[from] ShapeError),
}

/// Loader whose classifiers replay preset probability rows.
///
/// Each checkpoint name maps to one probability vector per record. The
/// classifier returns their natural logarithms as logits so softmax recovers
/// the preset values.
#[derive(Debug, Default)]
pub struct FixedLoader {
    outputs: HashMap<String, Vec<Vec<f32>>>,
    loads: RefCell<Vec<String>>,
}

impl FixedLoader {
    #[must_use]
    pub fn with_checkpoint(mut self, name: &str, probabilities: Vec<Vec<f32>>) -> Self {
        self.outputs.insert(name.to_owned(), probabilities);
        self
    }

    /// Names passed to `load`, in call order.
    #[must_use]
    pub fn loads(&self) -> Vec<String> {
        self.loads.borrow().clone()
    }
}

impl CheckpointLoader for FixedLoader {
    type Classifier = FixedClassifier;
    type Error = FixedOutputError;

    fn load(&self, checkpoint: &Checkpoint) -> Result<Self::Classifier, Self::Error> {
        self.loads.borrow_mut().push(checkpoint.name.clone());
        let rows = self
            .outputs
            .get(&checkpoint.name)
            .ok_or_else(|| FixedOutputError::UnknownCheckpoint(checkpoint.name.clone()))?;
        Ok(FixedClassifier {
            rows: rows.clone(),
            cursor: 0,
        })
    }
}

/// Classifier replaying preset probability rows in order.
#[derive(Debug)]
pub struct FixedClassifier {
    rows: Vec<Vec<f32>>,
    cursor: usize,
}

impl SequenceClassifier for FixedClassifier {
    type Error = FixedOutputError;

    fn classify(&mut self, batch: &EncodedBatch<'_>) -> Result<Array2<f32>, Self::Error> {
        let end = self.cursor + batch.rows();
        let rows = self
            .rows
            .get(self.cursor..end)
            .ok_or(FixedOutputError::Exhausted(self.cursor))?;
        let classes = rows.first().map_or(0, Vec::len);
        let logits: Vec<f32> = rows.iter().flatten().map(|p| p.ln()).collect();
        self.cursor = end;
        Ok(Array2::from_shape_vec((rows.len(), classes), logits)?)
    }
}

/// Creates `<root>/<name>/model.onnx` placeholders for each name.
///
/// # Errors
///
/// Propagates filesystem errors.
pub fn write_checkpoint_dirs(root: &Path, names: &[&str]) -> io::Result<()> {
    for name in names {
        let dir = root.join(name);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(DEFAULT_MODEL_FILE), format!("weights for {name}"))?;
    }
    Ok(())
}

/// Writes a tab-separated `id`/`text` file.
///
/// # Errors
///
/// Propagates filesystem errors.
pub fn write_records(path: &Path, rows: &[(&str, &str)]) -> io::Result<()> {
    let mut contents = String::from("id\ttext\n");
    for (id, text) in rows {
        contents.push_str(id);
        contents.push('\t');
        contents.push_str(text);
        contents.push('\n');
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)
}
