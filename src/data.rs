//! Supervised datasets.
//!
//! Observations are a tensor whose leading axis is the sample axis
//! (`[n, features]` or `[n, channels, h, w]`); targets are `[n, target_dim]`.

use crate::{Error, Result, Shape, Tensor};

#[derive(Debug, Clone)]
pub struct Dataset {
    observations: Tensor,
    targets: Tensor,
}

impl Dataset {
    /// Pair observations with targets, checking the sample counts agree.
    pub fn from_tensors(observations: Tensor, targets: Tensor) -> Result<Self> {
        if targets.shape().rank() != 2 {
            return Err(Error::InvalidData(format!(
                "targets must be [samples, target_dim], got {}",
                targets.shape()
            )));
        }
        let n = observations.shape().batch_size();
        if targets.shape().batch_size() != n {
            return Err(Error::InvalidData(format!(
                "observations have {n} samples but targets have {}",
                targets.shape().batch_size()
            )));
        }
        Ok(Self {
            observations,
            targets,
        })
    }

    /// Build from flat buffers with per-sample dims `sample_dims` and
    /// `target_dim` targets per sample.
    pub fn from_flat(
        observations: Vec<f32>,
        targets: Vec<f32>,
        sample_dims: &[usize],
        target_dim: usize,
    ) -> Result<Self> {
        let sample_len: usize = sample_dims.iter().product();
        if sample_dims.is_empty() || sample_len == 0 {
            return Err(Error::InvalidData(format!(
                "sample dims must be non-empty and positive, got {sample_dims:?}"
            )));
        }
        if target_dim == 0 {
            return Err(Error::InvalidData("target_dim must be > 0".to_owned()));
        }
        if observations.is_empty() || !observations.len().is_multiple_of(sample_len) {
            return Err(Error::InvalidData(format!(
                "observations length {} is not a positive multiple of sample length {sample_len}",
                observations.len()
            )));
        }
        let n = observations.len() / sample_len;
        if targets.len() != n * target_dim {
            return Err(Error::InvalidData(format!(
                "targets length {} does not match samples * target_dim ({n} * {target_dim})",
                targets.len()
            )));
        }
        let observations = Tensor::from_vec(observations, Shape::batched(n, sample_dims)?)?;
        let targets = Tensor::from_vec(targets, Shape::new(&[n, target_dim])?)?;
        Self::from_tensors(observations, targets)
    }

    /// Build from per-sample feature and target rows.
    pub fn from_rows(observations: &[Vec<f32>], targets: &[Vec<f32>]) -> Result<Self> {
        if observations.len() != targets.len() {
            return Err(Error::InvalidData(format!(
                "observations/targets length mismatch: {} vs {}",
                observations.len(),
                targets.len()
            )));
        }
        let features = flatten_rows("observation", observations)?;
        let target_dim = targets.first().map_or(0, Vec::len);
        let flat_targets = flatten_rows("target", targets)?;
        let feature_dim = observations.first().map_or(0, Vec::len);
        Self::from_flat(features, flat_targets, &[feature_dim], target_dim)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.observations.shape().batch_size()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn observations(&self) -> &Tensor {
        &self.observations
    }

    #[inline]
    pub fn targets(&self) -> &Tensor {
        &self.targets
    }

    /// Per-sample observation dims.
    #[inline]
    pub fn sample_dims(&self) -> &[usize] {
        self.observations.shape().sample_dims()
    }

    #[inline]
    pub fn target_dim(&self) -> usize {
        self.targets.shape().sample_len()
    }
}

fn flatten_rows(what: &str, rows: &[Vec<f32>]) -> Result<Vec<f32>> {
    let Some(first) = rows.first() else {
        return Err(Error::InvalidData(format!("{what} rows must not be empty")));
    };
    let dim = first.len();
    if dim == 0 {
        return Err(Error::InvalidData(format!("{what} rows must not be empty")));
    }
    let mut flat = Vec::with_capacity(rows.len() * dim);
    for (i, row) in rows.iter().enumerate() {
        if row.len() != dim {
            return Err(Error::InvalidData(format!(
                "{what} row {i} has len {}, expected {dim}",
                row.len()
            )));
        }
        flat.extend_from_slice(row);
    }
    Ok(flat)
}

/// One-hot encode class labels.
///
/// Classes are the distinct label values in ascending order. Returns the
/// `[n, classes]` target tensor and the class values (column `j` encodes
/// `classes[j]`).
pub fn one_of_n(labels: &[f32]) -> Result<(Tensor, Vec<f32>)> {
    if labels.is_empty() {
        return Err(Error::InvalidData("labels must not be empty".to_owned()));
    }
    if let Some(bad) = labels.iter().find(|v| !v.is_finite()) {
        return Err(Error::InvalidData(format!("label {bad} is not finite")));
    }
    let mut classes = labels.to_vec();
    classes.sort_by(f32::total_cmp);
    classes.dedup();

    let k = classes.len();
    let mut encoded = Tensor::zeros(Shape::new(&[labels.len(), k])?);
    for (i, label) in labels.iter().enumerate() {
        // Every label is present in `classes`, so the search cannot miss.
        let j = classes
            .binary_search_by(|c| c.total_cmp(label))
            .unwrap_or_default();
        encoded.row_mut(i)[j] = 1.0;
    }
    Ok((encoded, classes))
}
