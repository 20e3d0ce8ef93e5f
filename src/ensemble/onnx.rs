//! ONNX Runtime backed checkpoints.
//!
//! Each checkpoint is an exported sequence-classification graph taking
//! `[batch, max_len]` int64 token ids and attention mask (and optionally
//! token type ids) and returning `[batch, num_labels]` float logits.

use std::fmt;

use ndarray::{Array2, ShapeError};
use ort::{session::Session, value::TensorRef};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use super::{Checkpoint, CheckpointLoader, SequenceClassifier};
use crate::encoding::EncodedBatch;

/// Execution target for a loaded checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cuda,
    Cpu,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cuda => f.write_str("cuda"),
            Self::Cpu => f.write_str("cpu"),
        }
    }
}

/// Picks the CUDA execution provider when it is compiled in and usable,
/// otherwise the CPU.
#[must_use]
pub fn select_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider};
        match CUDAExecutionProvider::default().is_available() {
            Ok(true) => return Device::Cuda,
            Ok(false) => {}
            Err(error) => tracing::warn!(%error, "could not query CUDA availability"),
        }
    }
    Device::Cpu
}

/// Graph input and output names plus the expected label count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OnnxConfig {
    /// Token ids and attention mask input names, optionally followed by a
    /// token type ids input that is fed zeros.
    pub input_names: Vec<String>,
    /// Logits output name.
    pub output_name: String,
    /// Number of classes in the logits output.
    pub num_labels: usize,
}

impl Default for OnnxConfig {
    fn default() -> Self {
        Self {
            input_names: vec!["input_ids".into(), "attention_mask".into()],
            output_name: "logits".into(),
            num_labels: 2,
        }
    }
}

/// Errors produced by the ONNX classifier.
#[derive(Debug, Error)]
pub enum OnnxClassifierError {
    #[error("classifier requires 2 or 3 input names but found {actual}")]
    InputNameCount { actual: usize },
    #[error("classifier requires an output name")]
    MissingOutputName,
    #[error("classifier requires num_labels > 0")]
    ZeroLabels,
    #[error("failed to construct ONNX session builder: {0}")]
    CreateSessionBuilder(#[source] ort::Error),
    #[error("failed to register {device} execution provider: {source}")]
    RegisterExecutionProvider {
        device: Device,
        #[source]
        source: ort::Error,
    },
    #[error("failed to create ONNX session: {0}")]
    CreateSession(#[source] ort::Error),
    #[error("failed to convert encoded batch into tensor: {0}")]
    EncodeTensor(#[source] ort::Error),
    #[error("failed to run inference: {0}")]
    Inference(#[source] ort::Error),
    #[error("ONNX output \"{name}\" missing from session results")]
    OutputMissing { name: String },
    #[error("ONNX output \"{name}\" has {actual} logits but expected {expected}")]
    UnexpectedLogitCount {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("failed to shape logits: {0}")]
    LogitShape(#[from] ShapeError),
}

/// Loads every checkpoint as a fresh ONNX session.
#[derive(Debug, Clone)]
pub struct OnnxCheckpointLoader {
    config: OnnxConfig,
}

impl OnnxCheckpointLoader {
    /// Validates the graph naming before any checkpoint is touched.
    ///
    /// # Errors
    ///
    /// Returns [`OnnxClassifierError::InputNameCount`],
    /// [`OnnxClassifierError::MissingOutputName`] or
    /// [`OnnxClassifierError::ZeroLabels`] for unusable configurations.
    pub fn new(config: OnnxConfig) -> Result<Self, OnnxClassifierError> {
        if !(2..=3).contains(&config.input_names.len()) {
            return Err(OnnxClassifierError::InputNameCount {
                actual: config.input_names.len(),
            });
        }
        if config.output_name.is_empty() {
            return Err(OnnxClassifierError::MissingOutputName);
        }
        if config.num_labels == 0 {
            return Err(OnnxClassifierError::ZeroLabels);
        }
        Ok(Self { config })
    }
}

impl CheckpointLoader for OnnxCheckpointLoader {
    type Classifier = OnnxClassifier;
    type Error = OnnxClassifierError;

    fn load(&self, checkpoint: &Checkpoint) -> Result<Self::Classifier, Self::Error> {
        let device = select_device();
        info!(checkpoint = %checkpoint.name, %device, "loading checkpoint");

        let builder = Session::builder().map_err(OnnxClassifierError::CreateSessionBuilder)?;
        let builder = match device {
            Device::Cpu => builder,
            Device::Cuda => register_cuda(builder)?,
        };
        let session = builder
            .commit_from_file(&checkpoint.model.path)
            .map_err(OnnxClassifierError::CreateSession)?;

        Ok(OnnxClassifier {
            session,
            input_names: self.config.input_names.clone(),
            output_name: self.config.output_name.clone(),
            num_labels: self.config.num_labels,
        })
    }
}

#[cfg(feature = "cuda")]
fn register_cuda(
    builder: ort::session::builder::SessionBuilder,
) -> Result<ort::session::builder::SessionBuilder, OnnxClassifierError> {
    use ort::execution_providers::CUDAExecutionProvider;
    builder
        .with_execution_providers([CUDAExecutionProvider::default().build().error_on_failure()])
        .map_err(|source| OnnxClassifierError::RegisterExecutionProvider {
            device: Device::Cuda,
            source: source.into(),
        })
}

#[cfg(not(feature = "cuda"))]
fn register_cuda(
    builder: ort::session::builder::SessionBuilder,
) -> Result<ort::session::builder::SessionBuilder, OnnxClassifierError> {
    Ok(builder)
}

/// A single checkpoint held in an ONNX Runtime session.
#[derive(Debug)]
pub struct OnnxClassifier {
    session: Session,
    input_names: Vec<String>,
    output_name: String,
    num_labels: usize,
}

impl SequenceClassifier for OnnxClassifier {
    type Error = OnnxClassifierError;

    fn classify(&mut self, batch: &EncodedBatch<'_>) -> Result<Array2<f32>, Self::Error> {
        let shape = [batch.rows(), batch.max_len()];
        let ids = TensorRef::from_array_view((shape, batch.token_ids()))
            .map_err(OnnxClassifierError::EncodeTensor)?;
        let mask = TensorRef::from_array_view((shape, batch.attention_mask()))
            .map_err(OnnxClassifierError::EncodeTensor)?;
        let zeros = if self.input_names.len() == 3 {
            vec![0_i64; batch.token_ids().len()]
        } else {
            Vec::new()
        };

        let outputs = match self.input_names.as_slice() {
            [ids_name, mask_name] => self.session.run(ort::inputs! {
                ids_name.as_str() => ids,
                mask_name.as_str() => mask,
            }),
            [ids_name, mask_name, type_name] => {
                let types = TensorRef::from_array_view((shape, zeros.as_slice()))
                    .map_err(OnnxClassifierError::EncodeTensor)?;
                self.session.run(ort::inputs! {
                    ids_name.as_str() => ids,
                    mask_name.as_str() => mask,
                    type_name.as_str() => types,
                })
            }
            other => {
                return Err(OnnxClassifierError::InputNameCount {
                    actual: other.len(),
                });
            }
        }
        .map_err(OnnxClassifierError::Inference)?;

        let logits_value = outputs.get(self.output_name.as_str()).ok_or_else(|| {
            OnnxClassifierError::OutputMissing {
                name: self.output_name.clone(),
            }
        })?;
        let (_, logits) = logits_value
            .try_extract_tensor::<f32>()
            .map_err(OnnxClassifierError::Inference)?;

        let expected = batch.rows() * self.num_labels;
        if logits.len() != expected {
            return Err(OnnxClassifierError::UnexpectedLogitCount {
                name: self.output_name.clone(),
                expected,
                actual: logits.len(),
            });
        }
        Ok(Array2::from_shape_vec(
            (batch.rows(), self.num_labels),
            logits.to_vec(),
        )?)
    }
}
