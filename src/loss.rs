//! Loss functions over whole mini-batches.
//!
//! Predictions and targets are `[batch, k]` tensors. Every loss returns the
//! mean over the batch, and its gradient is the gradient of that mean, so
//! optimizers never rescale by the batch size.
//!
//! - `Mse`, `Mae`, `BinaryCrossEntropyWithLogits`: mean over all elements.
//! - `SoftmaxCrossEntropy`: cross-entropy of each row, mean over rows.

use crate::{Error, Result, Tensor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Loss {
    /// `0.5 · mean((pred − target)²)`.
    #[default]
    Mse,
    /// `mean(|pred − target|)`.
    Mae,
    /// Expects raw logits and targets in `[0, 1]`.
    BinaryCrossEntropyWithLogits,
    /// Expects raw logits and one-hot target rows.
    SoftmaxCrossEntropy,
}

impl Loss {
    /// Loss value only.
    pub fn value(self, pred: &Tensor, target: &Tensor) -> Result<f32> {
        check(pred, target)?;
        let (p, t) = (pred.data(), target.data());
        Ok(match self {
            Loss::Mse => mse(p, t),
            Loss::Mae => mae(p, t),
            Loss::BinaryCrossEntropyWithLogits => bce_with_logits(p, t),
            Loss::SoftmaxCrossEntropy => softmax_cross_entropy(p, t, pred.shape().sample_len()),
        })
    }

    /// Loss value, writing `dL/dpred` into `d_pred`.
    pub fn gradient(self, pred: &Tensor, target: &Tensor, d_pred: &mut Tensor) -> Result<f32> {
        check(pred, target)?;
        if d_pred.element_count() != pred.element_count() {
            return Err(Error::ShapeMismatch {
                expected: pred.shape().clone(),
                got: d_pred.shape().clone(),
            });
        }
        let (p, t, d) = (pred.data(), target.data(), d_pred.data_mut());
        Ok(match self {
            Loss::Mse => mse_backward(p, t, d),
            Loss::Mae => mae_backward(p, t, d),
            Loss::BinaryCrossEntropyWithLogits => bce_with_logits_backward(p, t, d),
            Loss::SoftmaxCrossEntropy => {
                softmax_cross_entropy_backward(p, t, d, pred.shape().sample_len())
            }
        })
    }
}

fn check(pred: &Tensor, target: &Tensor) -> Result<()> {
    if pred.element_count() != target.element_count()
        || pred.shape().batch_size() != target.shape().batch_size()
    {
        return Err(Error::ShapeMismatch {
            expected: pred.shape().clone(),
            got: target.shape().clone(),
        });
    }
    Ok(())
}

pub fn mse(pred: &[f32], target: &[f32]) -> f32 {
    debug_assert_eq!(pred.len(), target.len());
    let sum_sq = pred
        .iter()
        .zip(target)
        .fold(0.0_f32, |acc, (p, t)| (p - t).mul_add(p - t, acc));
    0.5 * sum_sq / pred.len() as f32
}

/// `d_pred[i] = (pred[i] − target[i]) / N`.
pub fn mse_backward(pred: &[f32], target: &[f32], d_pred: &mut [f32]) -> f32 {
    debug_assert_eq!(pred.len(), target.len());
    let inv_n = 1.0 / pred.len() as f32;
    let mut sum_sq = 0.0_f32;
    for ((d, &p), &t) in d_pred.iter_mut().zip(pred).zip(target) {
        let diff = p - t;
        sum_sq = diff.mul_add(diff, sum_sq);
        *d = diff * inv_n;
    }
    0.5 * sum_sq * inv_n
}

pub fn mae(pred: &[f32], target: &[f32]) -> f32 {
    debug_assert_eq!(pred.len(), target.len());
    let sum: f32 = pred.iter().zip(target).map(|(p, t)| (p - t).abs()).sum();
    sum / pred.len() as f32
}

/// Subgradient 0 where `pred == target`.
pub fn mae_backward(pred: &[f32], target: &[f32], d_pred: &mut [f32]) -> f32 {
    debug_assert_eq!(pred.len(), target.len());
    let inv_n = 1.0 / pred.len() as f32;
    let mut sum = 0.0_f32;
    for ((d, &p), &t) in d_pred.iter_mut().zip(pred).zip(target) {
        let diff = p - t;
        sum += diff.abs();
        *d = if diff > 0.0 {
            inv_n
        } else if diff < 0.0 {
            -inv_n
        } else {
            0.0
        };
    }
    sum * inv_n
}

#[inline]
fn bce_term(x: f32, t: f32) -> f32 {
    // max(x, 0) − x·t + ln(1 + e^−|x|), stable for large |x|.
    x.max(0.0) - x * t + (-x.abs()).exp().ln_1p()
}

pub fn bce_with_logits(logits: &[f32], target: &[f32]) -> f32 {
    debug_assert_eq!(logits.len(), target.len());
    let sum: f32 = logits.iter().zip(target).map(|(&x, &t)| bce_term(x, t)).sum();
    sum / logits.len() as f32
}

/// `d_logits[i] = (sigmoid(x) − t) / N`.
pub fn bce_with_logits_backward(logits: &[f32], target: &[f32], d_logits: &mut [f32]) -> f32 {
    debug_assert_eq!(logits.len(), target.len());
    let inv_n = 1.0 / logits.len() as f32;
    let mut sum = 0.0_f32;
    for ((d, &x), &t) in d_logits.iter_mut().zip(logits).zip(target) {
        sum += bce_term(x, t);
        *d = (crate::Activation::Sigmoid.apply(x) - t) * inv_n;
    }
    sum * inv_n
}

/// Mean over rows of `−Σ t · log softmax(x)`.
pub fn softmax_cross_entropy(logits: &[f32], target: &[f32], classes: usize) -> f32 {
    debug_assert_eq!(logits.len(), target.len());
    let rows = logits.len() / classes;
    let sum: f32 = logits
        .chunks_exact(classes)
        .zip(target.chunks_exact(classes))
        .map(|(x, t)| row_cross_entropy(x, t, log_sum_exp(x)))
        .sum();
    sum / rows as f32
}

/// Writes `(softmax(x) − t) / rows` per row.
pub fn softmax_cross_entropy_backward(
    logits: &[f32],
    target: &[f32],
    d_logits: &mut [f32],
    classes: usize,
) -> f32 {
    debug_assert_eq!(logits.len(), target.len());
    let rows = logits.len() / classes;
    let inv_rows = 1.0 / rows as f32;
    let mut sum = 0.0_f32;
    for ((x, t), d) in logits
        .chunks_exact(classes)
        .zip(target.chunks_exact(classes))
        .zip(d_logits.chunks_exact_mut(classes))
    {
        let lse = log_sum_exp(x);
        sum += row_cross_entropy(x, t, lse);
        for ((di, &xi), &ti) in d.iter_mut().zip(x).zip(t) {
            *di = ((xi - lse).exp() - ti) * inv_rows;
        }
    }
    sum * inv_rows
}

#[inline]
fn row_cross_entropy(x: &[f32], t: &[f32], lse: f32) -> f32 {
    x.iter()
        .zip(t)
        .filter(|(_, ti)| **ti != 0.0)
        .map(|(xi, ti)| -ti * (xi - lse))
        .sum()
}

#[inline]
fn log_sum_exp(xs: &[f32]) -> f32 {
    let max = xs.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let sum: f32 = xs.iter().map(|x| (x - max).exp()).sum();
    max + sum.ln()
}
