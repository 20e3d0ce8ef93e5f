//! Ensemble inference over a set of independently trained checkpoints.
//!
//! [`EnsemblePredictor`] loads each checkpoint in turn through a
//! [`CheckpointLoader`], runs every batch of the encoded dataset through the
//! resulting [`SequenceClassifier`], and keeps one probability matrix per
//! checkpoint. Checkpoints are evaluated strictly one after another and each
//! model is dropped before the next one is loaded.

mod artefact;
mod checkpoint;
#[cfg(feature = "onnx")]
pub mod onnx;

use std::{error::Error as StdError, num::NonZeroUsize};

use ndarray::{Array2, s};
use thiserror::Error;
use tracing::{debug, info};

pub use artefact::{ArtefactError, ModelArtefact, compute_sha256};
pub use checkpoint::{
    Checkpoint, CheckpointError, CheckpointSet, DEFAULT_MODEL_FILE, InvalidCheckpoint,
    MANIFEST_FILE,
};

use crate::{
    aggregation::softmax_rows,
    encoding::{EncodedBatch, EncodedDataset},
};

type BoxedError = Box<dyn StdError + Send + Sync + 'static>;

/// A loaded classifier that maps token batches to class logits.
pub trait SequenceClassifier {
    /// Error type returned when inference fails.
    type Error: StdError + Send + Sync + 'static;

    /// Runs a forward pass over `batch`.
    ///
    /// Returns raw logits shaped `[batch.rows(), classes]`.
    ///
    /// # Errors
    ///
    /// Returns an error if inference fails.
    fn classify(&mut self, batch: &EncodedBatch<'_>) -> Result<Array2<f32>, Self::Error>;
}

/// Turns a [`Checkpoint`] into a ready-to-run classifier.
pub trait CheckpointLoader {
    type Classifier: SequenceClassifier;
    /// Error type returned when loading fails.
    type Error: StdError + Send + Sync + 'static;

    /// Loads `checkpoint` from scratch.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint cannot be loaded.
    fn load(&self, checkpoint: &Checkpoint) -> Result<Self::Classifier, Self::Error>;
}

/// Errors produced while running the ensemble.
#[derive(Debug, Error)]
pub enum EnsembleError {
    #[error("batch size must be greater than zero")]
    ZeroBatchSize,
    #[error("number of labels must be greater than zero")]
    ZeroLabels,
    #[error("failed to load checkpoint \"{name}\": {source}")]
    Load {
        name: String,
        #[source]
        source: BoxedError,
    },
    #[error("checkpoint \"{name}\" failed on batch {batch}: {source}")]
    Inference {
        name: String,
        batch: usize,
        #[source]
        source: BoxedError,
    },
    #[error(
        "checkpoint \"{name}\" returned logits shaped {actual:?} for batch {batch}, expected {expected:?}"
    )]
    LogitShape {
        name: String,
        batch: usize,
        expected: (usize, usize),
        actual: (usize, usize),
    },
}

/// Runs every checkpoint of an ensemble over an encoded dataset.
#[derive(Debug)]
pub struct EnsemblePredictor<L> {
    loader: L,
    batch_size: NonZeroUsize,
    num_labels: usize,
}

impl<L: CheckpointLoader> EnsemblePredictor<L> {
    /// Creates a predictor producing `num_labels` probabilities per row.
    ///
    /// # Errors
    ///
    /// Returns [`EnsembleError::ZeroBatchSize`] or
    /// [`EnsembleError::ZeroLabels`] for zero arguments.
    pub fn new(loader: L, batch_size: usize, num_labels: usize) -> Result<Self, EnsembleError> {
        let batch_size = NonZeroUsize::new(batch_size).ok_or(EnsembleError::ZeroBatchSize)?;
        if num_labels == 0 {
            return Err(EnsembleError::ZeroLabels);
        }
        Ok(Self {
            loader,
            batch_size,
            num_labels,
        })
    }

    /// Returns one `[dataset.len(), num_labels]` probability matrix per
    /// checkpoint, in checkpoint order.
    ///
    /// # Errors
    ///
    /// Stops at the first checkpoint that fails to load or run.
    pub fn predict(
        &self,
        dataset: &EncodedDataset,
        checkpoints: &CheckpointSet,
    ) -> Result<Vec<Array2<f32>>, EnsembleError> {
        info!(
            records = dataset.len(),
            checkpoints = checkpoints.len(),
            batch_size = self.batch_size.get(),
            "predicting labels"
        );
        checkpoints
            .iter()
            .map(|checkpoint| self.predict_checkpoint(dataset, checkpoint))
            .collect()
    }

    fn predict_checkpoint(
        &self,
        dataset: &EncodedDataset,
        checkpoint: &Checkpoint,
    ) -> Result<Array2<f32>, EnsembleError> {
        let mut classifier =
            self.loader
                .load(checkpoint)
                .map_err(|source| EnsembleError::Load {
                    name: checkpoint.name.clone(),
                    source: Box::new(source),
                })?;

        let mut probabilities = Array2::<f32>::zeros((dataset.len(), self.num_labels));
        let mut offset = 0;
        for (index, batch) in dataset.batches(self.batch_size).enumerate() {
            let logits = classifier
                .classify(&batch)
                .map_err(|source| EnsembleError::Inference {
                    name: checkpoint.name.clone(),
                    batch: index,
                    source: Box::new(source),
                })?;
            let expected = (batch.rows(), self.num_labels);
            if logits.dim() != expected {
                return Err(EnsembleError::LogitShape {
                    name: checkpoint.name.clone(),
                    batch: index,
                    expected,
                    actual: logits.dim(),
                });
            }
            let end = offset + batch.rows();
            probabilities
                .slice_mut(s![offset..end, ..])
                .assign(&softmax_rows(&logits));
            offset = end;
        }
        drop(classifier);

        debug!(checkpoint = %checkpoint.name, rows = offset, "checkpoint finished");
        Ok(probabilities)
    }
}
