//! CLI argument types and layered configuration for the `ensemble-predict`
//! binary. Loads from CLI args, environment (prefix `ENSEMBLE_PREDICT_`), and
//! optional config files.

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::{ffi::OsString, path::PathBuf};
use thiserror::Error;

use crate::{
    config::{ConfigError, PipelineConfig},
    encoding::{EncoderConfig, MaskPolicy},
};

const ENV_PREFIX: &str = "ENSEMBLE_PREDICT_";

mod defaults {
    pub fn model_path() -> String {
        "./model_save".into()
    }

    pub fn max_len() -> usize {
        200
    }

    pub fn batch_size() -> usize {
        16
    }

    pub fn data_path() -> String {
        "data/test.csv".into()
    }

    pub fn output_path() -> String {
        "submission.csv".into()
    }

    pub fn tokenizer_path() -> String {
        "../local/bert_vi/bert4news.pytorch/tokenizer.json".into()
    }

    pub fn num_labels() -> usize {
        2
    }

    pub fn model_file() -> String {
        crate::ensemble::DEFAULT_MODEL_FILE.into()
    }
}

/// Errors raised while gathering arguments from the command line,
/// environment and config file.
#[derive(Debug, Error)]
pub enum ArgsError {
    #[error(transparent)]
    Cli(#[from] clap::Error),
    #[error("config file {path} does not exist")]
    MissingConfig { path: PathBuf },
    #[error("failed to merge configuration: {0}")]
    Merge(#[source] Box<figment::Error>),
}

impl From<figment::Error> for ArgsError {
    fn from(error: figment::Error) -> Self {
        Self::Merge(Box::new(error))
    }
}

/// Flags given on the command line. Only flags that were actually passed
/// are serialised, so unset flags leave the lower layers untouched.
#[derive(Debug, Default, Parser, Serialize)]
#[command(name = "ensemble-predict")]
#[command(version, about = "Average an ensemble of text classifiers into a submission", long_about = None)]
struct Flags {
    /// Directory whose subdirectories (or `ensemble.toml`) name the checkpoints
    #[arg(long = "model_path")]
    #[serde(skip_serializing_if = "Option::is_none")]
    model_path: Option<String>,

    /// Fixed token width of every encoded text [default: 200]
    #[arg(long = "max_len")]
    #[serde(skip_serializing_if = "Option::is_none")]
    max_len: Option<usize>,

    /// Rows per forward pass [default: 16]
    #[arg(long = "batch_size")]
    #[serde(skip_serializing_if = "Option::is_none")]
    batch_size: Option<usize>,

    /// Tab-separated test set with `id` and `text` columns
    #[arg(long = "data_path")]
    #[serde(skip_serializing_if = "Option::is_none")]
    data_path: Option<String>,

    /// Submission file, overwritten on success
    #[arg(long = "output_path")]
    #[serde(skip_serializing_if = "Option::is_none")]
    output_path: Option<String>,

    /// `tokenizer.json` shared by all checkpoints
    #[arg(long = "tokenizer_path")]
    #[serde(skip_serializing_if = "Option::is_none")]
    tokenizer_path: Option<String>,

    /// Number of classes produced by each checkpoint [default: 2]
    #[arg(long = "num_labels")]
    #[serde(skip_serializing_if = "Option::is_none")]
    num_labels: Option<usize>,

    /// Model file inside each checkpoint directory [default: model.onnx]
    #[arg(long = "model_file")]
    #[serde(skip_serializing_if = "Option::is_none")]
    model_file: Option<String>,

    /// Derive attention masks from nonzero token ids
    #[arg(long = "legacy_mask", num_args = 0..=1, default_missing_value = "true")]
    #[serde(skip_serializing_if = "Option::is_none")]
    legacy_mask: Option<bool>,

    /// Extra graph input fed with zero token type ids
    #[arg(long = "token_type_input")]
    #[serde(skip_serializing_if = "Option::is_none")]
    token_type_input: Option<String>,

    /// Optional TOML configuration file
    #[arg(long = "config-path")]
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

/// Command-line arguments for the `ensemble-predict` binary.
///
/// Flags are spelled with underscores
/// (`--model_path`, `--max_len`, `--batch_size`). CLI flags override
/// `ENSEMBLE_PREDICT_*` variables, which override the `--config-path` file.
///
/// # Examples
///
/// ```
/// use ensemble_predict::cli::PredictArgs;
///
/// let args = PredictArgs::load_from_iter(["ensemble-predict", "--max_len", "64"])
///     .expect("load args from CLI iterator");
/// assert_eq!(args.max_len, 64);
/// assert_eq!(args.batch_size, 16);
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct PredictArgs {
    /// Directory whose subdirectories (or `ensemble.toml`) name the checkpoints.
    #[serde(default = "defaults::model_path")]
    pub model_path: String,

    /// Fixed token width of every encoded text.
    #[serde(default = "defaults::max_len")]
    pub max_len: usize,

    /// Rows per forward pass.
    #[serde(default = "defaults::batch_size")]
    pub batch_size: usize,

    #[serde(default = "defaults::data_path")]
    pub data_path: String,

    /// Submission file, overwritten on success.
    #[serde(default = "defaults::output_path")]
    pub output_path: String,

    #[serde(default = "defaults::tokenizer_path")]
    pub tokenizer_path: String,

    #[serde(default = "defaults::num_labels")]
    pub num_labels: usize,

    /// Model file inside each checkpoint directory.
    #[serde(default = "defaults::model_file")]
    pub model_file: String,

    /// Derive attention masks from nonzero token ids instead of the
    /// tokenizer's real length.
    #[serde(default)]
    pub legacy_mask: bool,

    /// Extra graph input fed with zero token type ids.
    #[serde(default)]
    pub token_type_input: Option<String>,

    /// Optional path to a configuration file.
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

impl PredictArgs {
    /// Loads arguments from the process command line, environment and the
    /// optional `--config-path` file.
    ///
    /// # Errors
    ///
    /// See [`PredictArgs::load_from_iter`].
    pub fn load() -> Result<Self, ArgsError> {
        Self::load_from_iter(std::env::args_os())
    }

    /// Loads arguments from `args`, whose first item is the program name.
    ///
    /// # Errors
    ///
    /// Returns [`ArgsError::Cli`] for unknown flags or unparsable values
    /// (including `--help` and `--version` requests),
    /// [`ArgsError::MissingConfig`] when `--config-path` names no file and
    /// [`ArgsError::Merge`] when a layer holds a value of the wrong type.
    pub fn load_from_iter<I, T>(args: I) -> Result<Self, ArgsError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let flags = Flags::try_parse_from(args)?;
        let mut figment = Figment::new();
        if let Some(path) = &flags.config_path {
            if !path.is_file() {
                return Err(ArgsError::MissingConfig { path: path.clone() });
            }
            figment = figment.merge(Toml::file(path));
        }
        let mut loaded: Self = figment
            .merge(Env::prefixed(ENV_PREFIX))
            .merge(Serialized::defaults(&flags))
            .extract()?;
        loaded.config_path = flags.config_path;
        Ok(loaded)
    }

    /// Load configuration solely from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an [`ArgsError`] if any variable cannot be parsed.
    pub fn load_from_env() -> Result<Self, ArgsError> {
        Ok(Figment::new().merge(Env::prefixed(ENV_PREFIX)).extract()?)
    }

    /// Load configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an [`ArgsError`] if the file cannot be read or parsed.
    pub fn load_from_config(path: &str) -> Result<Self, ArgsError> {
        Ok(Figment::new().merge(Toml::file(path)).extract()?)
    }

    /// Load configuration from environment variables and a file path.
    ///
    /// # Errors
    ///
    /// Returns an [`ArgsError`] if either source contains invalid values.
    pub fn load_from_env_and_config(path: &str) -> Result<Self, ArgsError> {
        Ok(Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()?)
    }

    /// Converts the merged arguments into a validated [`PipelineConfig`].
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when a numeric setting is zero or the model
    /// file name is empty.
    pub fn into_config(self) -> Result<PipelineConfig, ConfigError> {
        let mask_policy = if self.legacy_mask {
            MaskPolicy::NonZeroTokenId
        } else {
            MaskPolicy::SequenceLength
        };
        let mut input_names = vec!["input_ids".to_owned(), "attention_mask".to_owned()];
        input_names.extend(self.token_type_input);

        PipelineConfig {
            data_path: self.data_path.into(),
            model_path: self.model_path.into(),
            model_file: self.model_file,
            tokenizer_path: self.tokenizer_path.into(),
            output_path: self.output_path.into(),
            batch_size: self.batch_size,
            num_labels: self.num_labels,
            encoder: EncoderConfig {
                max_len: self.max_len,
                mask_policy,
                ..EncoderConfig::default()
            },
            input_names,
            output_name: PipelineConfig::default().output_name,
        }
        .validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use rstest::rstest;

    #[rstest]
    fn flag_definitions_are_consistent() {
        Flags::command().debug_assert();
    }

    #[rstest]
    fn bare_legacy_mask_flag_enables_it() {
        let flags = Flags::try_parse_from(["ensemble-predict", "--legacy_mask"])
            .unwrap_or_else(|e| panic!("parse: {e}"));
        assert_eq!(flags.legacy_mask, Some(true));
    }

    #[rstest]
    fn unset_flags_are_not_serialised() {
        let flags = Flags::try_parse_from(["ensemble-predict", "--max_len", "12"])
            .unwrap_or_else(|e| panic!("parse: {e}"));
        let merged: PredictArgs = Figment::from(Serialized::defaults(&flags))
            .extract()
            .unwrap_or_else(|e| panic!("extract: {e}"));
        assert_eq!(merged.max_len, 12);
        assert_eq!(merged.batch_size, 16);
        assert_eq!(merged.model_path, "./model_save");
    }

    #[rstest]
    fn help_request_is_reported_as_cli_error() {
        let result = PredictArgs::load_from_iter(["ensemble-predict", "--help"]);
        assert!(matches!(
            result,
            Err(ArgsError::Cli(ref e)) if e.kind() == clap::error::ErrorKind::DisplayHelp
        ));
    }
}
