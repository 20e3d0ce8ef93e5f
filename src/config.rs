//! Validated runtime configuration for a prediction run.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{encoding::EncoderConfig, ensemble::DEFAULT_MODEL_FILE};

/// Errors returned by [`PipelineConfig::validate`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_len must be greater than 0")]
    ZeroMaxLen,
    #[error("batch_size must be greater than 0")]
    ZeroBatchSize,
    #[error("num_labels must be greater than 0")]
    ZeroLabels,
    #[error("model_file must not be empty")]
    EmptyModelFile,
}

/// Everything a prediction run needs, after defaults and overrides have been
/// merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Tab-separated test set.
    pub data_path: PathBuf,
    /// Directory holding the checkpoints.
    pub model_path: PathBuf,
    /// Model file name inside each checkpoint directory.
    pub model_file: String,
    /// `tokenizer.json` shared by every checkpoint.
    pub tokenizer_path: PathBuf,
    /// Submission destination; overwritten.
    pub output_path: PathBuf,
    pub batch_size: usize,
    pub num_labels: usize,
    pub encoder: EncoderConfig,
    /// Graph input names: token ids, attention mask, optional token types.
    pub input_names: Vec<String>,
    /// Graph output holding the logits.
    pub output_name: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("data/test.csv"),
            model_path: PathBuf::from("./model_save"),
            model_file: DEFAULT_MODEL_FILE.into(),
            tokenizer_path: PathBuf::from("../local/bert_vi/bert4news.pytorch/tokenizer.json"),
            output_path: PathBuf::from("submission.csv"),
            batch_size: 16,
            num_labels: 2,
            encoder: EncoderConfig::default(),
            input_names: vec!["input_ids".into(), "attention_mask".into()],
            output_name: "logits".into(),
        }
    }
}

impl PipelineConfig {
    /// Ensure the configuration values are within acceptable bounds.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    #[must_use = "Validation should not be ignored"]
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.encoder.max_len == 0 {
            Err(ConfigError::ZeroMaxLen)
        } else if self.batch_size == 0 {
            Err(ConfigError::ZeroBatchSize)
        } else if self.num_labels == 0 {
            Err(ConfigError::ZeroLabels)
        } else if self.model_file.trim().is_empty() {
            Err(ConfigError::EmptyModelFile)
        } else {
            Ok(self)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn defaults_are_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[rstest]
    fn serialise_round_trips_through_json() {
        let cfg = PipelineConfig::default();
        let json = serde_json::to_string(&cfg).unwrap_or_else(|e| panic!("serialise: {e}"));
        let back: PipelineConfig =
            serde_json::from_str(&json).unwrap_or_else(|e| panic!("deserialise: {e}"));
        assert_eq!(back, cfg);
    }

    #[rstest]
    fn deserialise_rejects_unknown_fields() {
        let mut value = serde_json::to_value(PipelineConfig::default())
            .unwrap_or_else(|e| panic!("serialise: {e}"));
        if let Some(map) = value.as_object_mut() {
            map.insert("shuffle".into(), serde_json::Value::Bool(true));
        }
        assert!(serde_json::from_value::<PipelineConfig>(value).is_err());
    }

    #[rstest]
    #[case(|c: &mut PipelineConfig| c.encoder.max_len = 0, ConfigError::ZeroMaxLen)]
    #[case(|c: &mut PipelineConfig| c.batch_size = 0, ConfigError::ZeroBatchSize)]
    #[case(|c: &mut PipelineConfig| c.num_labels = 0, ConfigError::ZeroLabels)]
    #[case(|c: &mut PipelineConfig| c.model_file = " ".into(), ConfigError::EmptyModelFile)]
    fn validate_rejects(#[case] mutate: fn(&mut PipelineConfig), #[case] expected: ConfigError) {
        let mut cfg = PipelineConfig::default();
        mutate(&mut cfg);
        assert_eq!(cfg.validate(), Err(expected));
    }
}
