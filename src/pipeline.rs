//! End-to-end prediction run: load records, encode, run the ensemble,
//! average, and write the submission.

use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, info};

use crate::{
    aggregation::{AggregationError, argmax_rows, mean_probabilities},
    config::PipelineConfig,
    encoding::{EncodingError, TextEncoder},
    ensemble::{CheckpointError, CheckpointLoader, CheckpointSet, EnsembleError, EnsemblePredictor},
    records::{RecordsError, read_records},
    submission::{SubmissionError, write_submission},
};

/// Any failure that aborts a prediction run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Records(#[from] RecordsError),
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error(transparent)]
    Ensemble(#[from] EnsembleError),
    #[error(transparent)]
    Aggregation(#[from] AggregationError),
    #[error(transparent)]
    Submission(#[from] SubmissionError),
    #[cfg(feature = "onnx")]
    #[error(transparent)]
    Onnx(#[from] crate::ensemble::onnx::OnnxClassifierError),
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub records: usize,
    pub checkpoints: Vec<String>,
    pub output_path: PathBuf,
    /// Predicted label per record, in record order.
    pub labels: Vec<usize>,
}

/// Runs the pipeline with the ONNX backend and the tokenizer named in
/// `config`.
///
/// # Errors
///
/// Returns the first [`PipelineError`] raised by any stage.
#[cfg(feature = "onnx")]
pub fn run(config: &PipelineConfig) -> Result<RunSummary, PipelineError> {
    use crate::ensemble::onnx::{OnnxCheckpointLoader, OnnxConfig};

    let encoder = TextEncoder::from_file(&config.tokenizer_path, &config.encoder)?;
    let loader = OnnxCheckpointLoader::new(OnnxConfig {
        input_names: config.input_names.clone(),
        output_name: config.output_name.clone(),
        num_labels: config.num_labels,
    })?;
    run_with(config, &encoder, loader)
}

/// Runs the pipeline with an explicit encoder and checkpoint loader.
///
/// Checkpoints are discovered and verified before any text is encoded so a
/// broken ensemble fails fast.
///
/// # Errors
///
/// Returns the first [`PipelineError`] raised by any stage.
pub fn run_with<L: CheckpointLoader>(
    config: &PipelineConfig,
    encoder: &TextEncoder,
    loader: L,
) -> Result<RunSummary, PipelineError> {
    let checkpoints = CheckpointSet::discover(&config.model_path, &config.model_file)?;
    checkpoints.verify()?;
    let predictor = EnsemblePredictor::new(loader, config.batch_size, config.num_labels)?;

    let records = read_records(&config.data_path)?;
    if let Some(first) = records.first() {
        let sample = encoder.describe(&first.text)?;
        debug!(
            text = %first.text,
            tokens = ?sample.tokens,
            ids = ?sample.ids,
            "sample tokenization"
        );
    }
    let dataset = encoder.encode_all(records.iter().map(|record| record.text.as_str()))?;

    let matrices = predictor.predict(&dataset, &checkpoints)?;
    let averaged = mean_probabilities(&matrices)?;
    let labels = argmax_rows(&averaged);

    write_submission(&config.output_path, &records, &labels)?;
    info!(
        records = records.len(),
        checkpoints = checkpoints.len(),
        output = %config.output_path.display(),
        "prediction run complete"
    );

    Ok(RunSummary {
        records: records.len(),
        checkpoints: checkpoints.names().into_iter().map(str::to_owned).collect(),
        output_path: config.output_path.clone(),
        labels,
    })
}
