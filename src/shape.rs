//! N-dimensional extents.
//!
//! A `Shape` is an ordered list of positive dimensions. Axis 0 is the batch
//! axis everywhere in this crate. Strides are derived once at construction:
//! `strides()[i]` is the number of elements spanned by one step along axis
//! `i` in a row-major buffer.

use std::fmt;

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: Vec<usize>,
    strides: Vec<usize>,
    element_count: usize,
}

impl Shape {
    /// Build a shape from its dimensions.
    ///
    /// Returns an error if `dims` is empty or contains a zero.
    pub fn new(dims: &[usize]) -> Result<Self> {
        if dims.is_empty() {
            return Err(Error::InvalidShape(
                "shape must have at least one dimension".to_owned(),
            ));
        }
        if dims.contains(&0) {
            return Err(Error::InvalidShape(format!(
                "all dimensions must be > 0, got {dims:?}"
            )));
        }
        Ok(Self::from_valid(dims.to_vec()))
    }

    fn from_valid(dims: Vec<usize>) -> Self {
        let mut strides = vec![1; dims.len()];
        for i in (0..dims.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * dims[i + 1];
        }
        let element_count = dims.iter().product();
        Self {
            dims,
            strides,
            element_count,
        }
    }

    #[inline]
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    #[inline]
    pub fn dim(&self, axis: usize) -> usize {
        self.dims[axis]
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Row-major stride offsets, one per axis (the last is always 1).
    #[inline]
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    #[inline]
    pub fn element_count(&self) -> usize {
        self.element_count
    }

    /// Leading (batch) dimension.
    #[inline]
    pub fn batch_size(&self) -> usize {
        self.dims[0]
    }

    /// Number of elements in one batch slice (product of all but axis 0).
    #[inline]
    pub fn sample_len(&self) -> usize {
        self.strides[0]
    }

    /// All dimensions except the leading one.
    #[inline]
    pub fn sample_dims(&self) -> &[usize] {
        &self.dims[1..]
    }

    /// Same shape with a different leading dimension.
    pub fn with_batch_size(&self, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::InvalidShape("batch size must be > 0".to_owned()));
        }
        let mut dims = self.dims.clone();
        dims[0] = batch_size;
        Ok(Self::from_valid(dims))
    }

    /// `[batch_size, sample_dims...]`.
    pub fn batched(batch_size: usize, sample_dims: &[usize]) -> Result<Self> {
        let mut dims = Vec::with_capacity(sample_dims.len() + 1);
        dims.push(batch_size);
        dims.extend_from_slice(sample_dims);
        Self::new(&dims)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}
