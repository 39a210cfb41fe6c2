//! Dense row-major tensors.
//!
//! A `Tensor` is a flat `f32` buffer paired with a [`Shape`]. All slicing
//! helpers operate on the leading (batch) axis, which is contiguous in a
//! row-major buffer.

use crate::{Error, Result, Shape};

/// Memory layout tag. Only row-major buffers exist in this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataLayout {
    #[default]
    RowMajor,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    data: Vec<f32>,
    shape: Shape,
    layout: DataLayout,
}

impl Tensor {
    pub fn zeros(shape: Shape) -> Self {
        Self::filled(0.0, shape)
    }

    pub fn filled(value: f32, shape: Shape) -> Self {
        Self {
            data: vec![value; shape.element_count()],
            shape,
            layout: DataLayout::RowMajor,
        }
    }

    /// Wrap an existing buffer.
    ///
    /// Returns an error if `data.len()` differs from the shape's element count.
    pub fn from_vec(data: Vec<f32>, shape: Shape) -> Result<Self> {
        if data.len() != shape.element_count() {
            return Err(Error::InvalidShape(format!(
                "buffer length {} does not match shape {shape} ({} elements)",
                data.len(),
                shape.element_count()
            )));
        }
        Ok(Self {
            data,
            shape,
            layout: DataLayout::RowMajor,
        })
    }

    /// Convenience: `from_vec` with dimensions instead of a `Shape`.
    pub fn from_dims(data: Vec<f32>, dims: &[usize]) -> Result<Self> {
        Self::from_vec(data, Shape::new(dims)?)
    }

    #[inline]
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    #[inline]
    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    #[inline]
    pub fn layout(&self) -> DataLayout {
        self.layout
    }

    #[inline]
    pub fn element_count(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    #[inline]
    pub fn fill(&mut self, value: f32) {
        self.data.fill(value);
    }

    pub fn map_inplace(&mut self, mut f: impl FnMut(f32) -> f32) {
        for v in &mut self.data {
            *v = f(*v);
        }
    }

    /// Replace the shape without touching the buffer.
    ///
    /// Returns an error if the element count would change.
    pub fn reshape(&mut self, shape: Shape) -> Result<()> {
        if shape.element_count() != self.shape.element_count() {
            return Err(Error::InvalidShape(format!(
                "cannot reshape {} ({} elements) into {shape} ({} elements)",
                self.shape,
                self.shape.element_count(),
                shape.element_count()
            )));
        }
        self.shape = shape;
        Ok(())
    }

    /// Copy values from a tensor of the same shape.
    pub fn copy_from(&mut self, other: &Tensor) -> Result<()> {
        if other.shape != self.shape {
            return Err(Error::ShapeMismatch {
                expected: self.shape.clone(),
                got: other.shape.clone(),
            });
        }
        self.data.copy_from_slice(&other.data);
        Ok(())
    }

    /// The `index`-th slice along the batch axis.
    ///
    /// Panics if `index` is out of range.
    #[inline]
    pub fn row(&self, index: usize) -> &[f32] {
        let len = self.shape.sample_len();
        &self.data[index * len..(index + 1) * len]
    }

    #[inline]
    pub fn row_mut(&mut self, index: usize) -> &mut [f32] {
        let len = self.shape.sample_len();
        &mut self.data[index * len..(index + 1) * len]
    }

    /// Copy `length` consecutive batch slices starting at `from` into a new tensor.
    pub fn slice_copy(&self, from: usize, length: usize) -> Result<Tensor> {
        let shape = self.shape.with_batch_size(length)?;
        let mut out = Tensor::zeros(shape);
        self.slice_copy_into(from, length, &mut out)?;
        Ok(out)
    }

    /// Copy `length` consecutive batch slices starting at `from` into `dst`.
    ///
    /// `dst` may have any shape with exactly `length * sample_len` elements.
    pub fn slice_copy_into(&self, from: usize, length: usize, dst: &mut Tensor) -> Result<()> {
        let sample_len = self.shape.sample_len();
        if from + length > self.shape.batch_size() {
            return Err(Error::InvalidShape(format!(
                "slice {from}..{} out of range for batch axis of {}",
                from + length,
                self.shape
            )));
        }
        let count = length * sample_len;
        if dst.element_count() != count {
            return Err(Error::InvalidShape(format!(
                "destination has {} elements, slice needs {count}",
                dst.element_count()
            )));
        }
        let start = from * sample_len;
        dst.data.copy_from_slice(&self.data[start..start + count]);
        Ok(())
    }

    /// Gather the batch slices named by `indices` (in order) into `dst`.
    pub fn gather_rows_into(&self, indices: &[usize], dst: &mut Tensor) -> Result<()> {
        let sample_len = self.shape.sample_len();
        if dst.element_count() != indices.len() * sample_len {
            return Err(Error::InvalidShape(format!(
                "destination has {} elements, {} rows of {sample_len} need {}",
                dst.element_count(),
                indices.len(),
                indices.len() * sample_len
            )));
        }
        let batch = self.shape.batch_size();
        for (i, &idx) in indices.iter().enumerate() {
            if idx >= batch {
                return Err(Error::InvalidShape(format!(
                    "row index {idx} out of range for {}",
                    self.shape
                )));
            }
            dst.row_mut_unchecked(i, sample_len)
                .copy_from_slice(self.row(idx));
        }
        Ok(())
    }

    #[inline]
    fn row_mut_unchecked(&mut self, index: usize, len: usize) -> &mut [f32] {
        &mut self.data[index * len..(index + 1) * len]
    }

    /// Overwrite batch slices starting at `index` with the contents of `values`.
    pub fn set_slice(&mut self, index: usize, values: &Tensor) -> Result<()> {
        let sample_len = self.shape.sample_len();
        if values.shape.sample_len() != sample_len {
            return Err(Error::InvalidShape(format!(
                "slice of {} does not fit the batch slices of {}",
                values.shape, self.shape
            )));
        }
        let length = values.shape.batch_size();
        if index + length > self.shape.batch_size() {
            return Err(Error::InvalidShape(format!(
                "slice {index}..{} out of range for batch axis of {}",
                index + length,
                self.shape
            )));
        }
        let start = index * sample_len;
        self.data[start..start + values.data.len()].copy_from_slice(&values.data);
        Ok(())
    }
}
