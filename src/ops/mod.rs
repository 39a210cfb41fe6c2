//! Layer operators.
//!
//! Each operator is a set of free functions over `(Storage, Variable...)`.
//! Forward reads input and parameter values and writes the output value;
//! backward reads the output gradient and writes parameter and input
//! gradients. Operators never own memory: layer objects keep whatever
//! per-call state (pooling switches, dropout rng) is not a tensor.

pub mod activation;
pub mod batch_norm;
pub mod convolution;
pub mod dense;
pub mod dropout;
pub mod max_pool;

use crate::{Error, Result, Shape, Storage, Tensor, Variable};

/// Spatial geometry of a sliding 2-D window over `[N, C, H, W]` inputs.
///
/// Shared by convolution and max-pooling. Output extents follow
/// `floor((in + 2·pad − kernel) / stride) + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window2d {
    pub channels: usize,
    pub in_h: usize,
    pub in_w: usize,
    pub kernel_h: usize,
    pub kernel_w: usize,
    pub stride_h: usize,
    pub stride_w: usize,
    pub pad_h: usize,
    pub pad_w: usize,
    pub out_h: usize,
    pub out_w: usize,
}

impl Window2d {
    /// Resolve output extents for an input of dims `[N, C, H, W]`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        input_dims: &[usize],
        kernel_h: usize,
        kernel_w: usize,
        stride_h: usize,
        stride_w: usize,
        pad_h: usize,
        pad_w: usize,
    ) -> Result<Self> {
        let [_, channels, in_h, in_w] = input_dims else {
            return Err(Error::InvalidShape(format!(
                "2-D window needs a [batch, channels, height, width] input, got {input_dims:?}"
            )));
        };
        let out_h = output_extent(*in_h, kernel_h, stride_h, pad_h)?;
        let out_w = output_extent(*in_w, kernel_w, stride_w, pad_w)?;
        Ok(Self {
            channels: *channels,
            in_h: *in_h,
            in_w: *in_w,
            kernel_h,
            kernel_w,
            stride_h,
            stride_w,
            pad_h,
            pad_w,
            out_h,
            out_w,
        })
    }

    /// Elements in one input channel plane.
    #[inline]
    pub fn in_plane(&self) -> usize {
        self.in_h * self.in_w
    }

    /// Elements in one input sample.
    #[inline]
    pub fn in_sample(&self) -> usize {
        self.channels * self.in_plane()
    }

    /// Output positions per channel.
    #[inline]
    pub fn positions(&self) -> usize {
        self.out_h * self.out_w
    }

    /// Length of one receptive field across all channels.
    #[inline]
    pub fn patch_len(&self) -> usize {
        self.channels * self.kernel_h * self.kernel_w
    }

    /// Clamped input row range covered by output row `oy`.
    #[inline]
    pub(crate) fn rows(&self, oy: usize) -> (usize, usize) {
        clamp_window(oy * self.stride_h, self.pad_h, self.kernel_h, self.in_h)
    }

    #[inline]
    pub(crate) fn cols(&self, ox: usize) -> (usize, usize) {
        clamp_window(ox * self.stride_w, self.pad_w, self.kernel_w, self.in_w)
    }
}

/// `floor((input + 2·pad − kernel) / stride) + 1`.
pub fn output_extent(input: usize, kernel: usize, stride: usize, pad: usize) -> Result<usize> {
    if kernel == 0 || stride == 0 {
        return Err(Error::InvalidConfig(format!(
            "kernel ({kernel}) and stride ({stride}) must be > 0"
        )));
    }
    let padded = input + 2 * pad;
    if padded < kernel {
        return Err(Error::InvalidShape(format!(
            "padded input extent {padded} is smaller than kernel extent {kernel}"
        )));
    }
    Ok((padded - kernel) / stride + 1)
}

fn clamp_window(start_padded: usize, pad: usize, kernel: usize, extent: usize) -> (usize, usize) {
    let start = start_padded.saturating_sub(pad);
    let end = (start_padded + kernel).saturating_sub(pad).min(extent);
    (start, end)
}

/// Check that `var` was given the expected shape.
pub(crate) fn expect_shape(var: &Variable, expected: &Shape) -> Result<()> {
    if var.shape() != expected {
        return Err(Error::ShapeMismatch {
            expected: expected.clone(),
            got: var.shape().clone(),
        });
    }
    Ok(())
}

/// Run `f` with the value of `target` moved out of storage, so `f` can read
/// every other slot through `&Storage`.
pub(crate) fn write_value<T>(
    storage: &mut Storage,
    target: &Variable,
    f: impl FnOnce(&Storage, &mut Tensor) -> Result<T>,
) -> Result<T> {
    let mut tensor = storage.take_value(target);
    let result = f(storage, &mut tensor);
    storage.restore_value(target, tensor);
    result
}

pub(crate) fn write_gradient<T>(
    storage: &mut Storage,
    target: &Variable,
    f: impl FnOnce(&Storage, &mut Tensor) -> Result<T>,
) -> Result<T> {
    let mut tensor = storage.take_gradient(target);
    let result = f(storage, &mut tensor);
    storage.restore_gradient(target, tensor);
    result
}
