//! Probability arithmetic: per-row softmax, ensemble averaging and arg-max.

use ndarray::{Array2, ArrayView2, Axis, ShapeError};
use thiserror::Error;

/// Errors produced while combining prediction matrices.
#[derive(Debug, Error)]
pub enum AggregationError {
    #[error("at least one prediction matrix is required to average")]
    Empty,
    #[error("prediction matrix {index} has shape {actual:?} but expected {expected:?}")]
    ShapeMismatch {
        index: usize,
        expected: (usize, usize),
        actual: (usize, usize),
    },
    #[error("failed to stack prediction matrices: {0}")]
    Stack(#[from] ShapeError),
}

/// Applies a numerically stable softmax across each row of `logits`.
///
/// # Examples
///
/// ```
/// use ensemble_predict::aggregation::softmax_rows;
/// use ndarray::array;
///
/// let probabilities = softmax_rows(&array![[0.0_f32, 0.0], [10.0, -10.0]]);
/// assert!((probabilities[[0, 0]] - 0.5).abs() < 1e-6);
/// assert!(probabilities[[1, 0]] > 0.99);
/// ```
#[must_use]
#[expect(clippy::float_arithmetic, reason = "softmax requires float operations")]
pub fn softmax_rows(logits: &Array2<f32>) -> Array2<f32> {
    let mut probabilities = logits.clone();
    for mut row in probabilities.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |acc, value| acc.max(*value));
        row.mapv_inplace(|value| (value - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|value| value / sum);
    }
    probabilities
}

/// Averages equally shaped prediction matrices element-wise.
///
/// The result does not depend on the order of `matrices` beyond
/// floating-point rounding.
///
/// # Errors
///
/// Returns [`AggregationError::Empty`] for an empty slice and
/// [`AggregationError::ShapeMismatch`] when the shapes differ.
pub fn mean_probabilities(matrices: &[Array2<f32>]) -> Result<Array2<f32>, AggregationError> {
    let first = matrices.first().ok_or(AggregationError::Empty)?;
    let expected = first.dim();
    if let Some((index, matrix)) = matrices
        .iter()
        .enumerate()
        .find(|(_, matrix)| matrix.dim() != expected)
    {
        return Err(AggregationError::ShapeMismatch {
            index,
            expected,
            actual: matrix.dim(),
        });
    }

    let views: Vec<ArrayView2<'_, f32>> = matrices.iter().map(Array2::view).collect();
    let stacked = ndarray::stack(Axis(0), &views)?;
    stacked.mean_axis(Axis(0)).ok_or(AggregationError::Empty)
}

/// Returns the index of the largest value in each row.
///
/// Ties resolve to the lowest index. A row with no columns yields `0`.
#[must_use]
pub fn argmax_rows(probabilities: &Array2<f32>) -> Vec<usize> {
    probabilities
        .rows()
        .into_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |(best, best_value), (index, value)| {
                    if *value > best_value {
                        (index, *value)
                    } else {
                        (best, best_value)
                    }
                })
                .0
        })
        .collect()
}
