//! Core library entry point.
//! Batch text classification with an averaged ensemble of checkpoints.
//!
//! The pipeline reads `id`/`text` records ([`records`]), encodes them into
//! fixed-width token matrices ([`encoding`]), runs every checkpoint of the
//! ensemble over them ([`ensemble`]), averages the per-checkpoint softmax
//! outputs ([`aggregation`]) and writes `id,label` rows ([`submission`]).

pub mod aggregation;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod encoding;
pub mod ensemble;
pub mod pipeline;
pub mod records;
pub mod submission;

#[cfg(feature = "cli")]
pub use cli::{ArgsError, PredictArgs};
pub use config::{ConfigError, PipelineConfig};
pub use encoding::{EncodedDataset, EncodedExample, EncoderConfig, MaskPolicy, TextEncoder};
pub use ensemble::{
    Checkpoint, CheckpointLoader, CheckpointSet, EnsemblePredictor, SequenceClassifier,
};
pub use pipeline::{PipelineError, RunSummary, run_with};
#[cfg(feature = "onnx")]
pub use pipeline::run;
pub use records::Record;

pub mod tests;
