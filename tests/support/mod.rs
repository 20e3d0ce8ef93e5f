//! Scratch workspaces for integration tests.
#![allow(dead_code, reason = "each test crate uses a subset of the helpers")]

use std::path::{Path, PathBuf};

use ensemble_predict::{
    EncoderConfig, PipelineConfig, TextEncoder,
    ensemble::DEFAULT_MODEL_FILE,
    tests::support::{BASIC_VOCAB, word_level_tokenizer, write_checkpoint_dirs, write_records},
};
use tempfile::TempDir;

/// Temporary directory laid out like a competition working directory.
pub struct Workspace {
    pub dir: TempDir,
    pub config: PipelineConfig,
}

impl Workspace {
    /// Creates `data/test.csv` from `rows` and one checkpoint directory per
    /// name under `model_save/`.
    pub fn new(rows: &[(&str, &str)], checkpoints: &[&str]) -> Self {
        let dir = TempDir::new().unwrap_or_else(|e| panic!("create temp dir: {e}"));
        let root = dir.path();
        let config = PipelineConfig {
            data_path: root.join("data/test.csv"),
            model_path: root.join("model_save"),
            output_path: root.join("submission.csv"),
            batch_size: 2,
            encoder: EncoderConfig {
                max_len: 10,
                ..EncoderConfig::default()
            },
            ..PipelineConfig::default()
        };
        write_records(&config.data_path, rows)
            .unwrap_or_else(|e| panic!("write records: {e}"));
        std::fs::create_dir_all(&config.model_path)
            .unwrap_or_else(|e| panic!("create model dir: {e}"));
        write_checkpoint_dirs(&config.model_path, checkpoints)
            .unwrap_or_else(|e| panic!("write checkpoints: {e}"));
        Self { dir, config }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn model_dir(&self) -> PathBuf {
        self.config.model_path.clone()
    }

    pub fn encoder(&self) -> TextEncoder {
        TextEncoder::from_tokenizer(word_level_tokenizer(BASIC_VOCAB), &self.config.encoder)
            .unwrap_or_else(|e| panic!("build encoder: {e}"))
    }

    /// Replaces the placeholder model of `checkpoint` with a graph from
    /// `tests/fixtures`.
    pub fn install_model(&self, checkpoint: &str, fixture: &str) {
        let target = self.model_dir().join(checkpoint).join(DEFAULT_MODEL_FILE);
        std::fs::copy(fixture_path(fixture), &target)
            .unwrap_or_else(|e| panic!("install {fixture} into {checkpoint}: {e}"));
    }

    /// Saves the test tokenizer as `tokenizer.json` and points the config
    /// at it.
    pub fn write_tokenizer(&mut self) -> PathBuf {
        let path = self.root().join("tokenizer.json");
        word_level_tokenizer(BASIC_VOCAB)
            .save(&path, false)
            .unwrap_or_else(|e| panic!("save tokenizer: {e}"));
        self.config.tokenizer_path.clone_from(&path);
        path
    }

    pub fn submission(&self) -> String {
        std::fs::read_to_string(&self.config.output_path)
            .unwrap_or_else(|e| panic!("read submission: {e}"))
    }
}

/// Path of a checked-in fixture file.
pub fn fixture_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Two-input graph whose logits are `[15.5 - s, s - 15.5]`, where `s` is the
/// sum of the attended token ids of a row.
pub const TOKEN_SUM_MODEL: &str = "token_sum_classifier.onnx";

/// [`TOKEN_SUM_MODEL`] with an extra `token_type_ids` input added to the ids.
pub const TOKEN_SUM_TYPED_MODEL: &str = "token_sum_classifier_token_types.onnx";

/// Rows used by most end-to-end tests.
pub const REVIEWS: &[(&str, &str)] = &[
    ("a", "good product"),
    ("b", "bad service"),
    ("c", "ok"),
];
