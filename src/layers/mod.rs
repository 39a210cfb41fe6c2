//! Stateful layer objects.
//!
//! A [`LayerSpec`] is the validated, shape-free description of a layer. Given
//! the previous layer's output it [`LayerSpec::initialize`]s into a boxed
//! [`Layer`], which owns its parameter [`Variable`]s and drives the matching
//! operator in [`crate::ops`].

mod activation;
mod batch_norm;
mod conv2d;
mod dense;
mod dropout;
mod max_pool2d;

use std::fmt;

use rand::rngs::StdRng;

pub use activation::ActivationLayer;
pub use batch_norm::BatchNormLayer;
pub use conv2d::Conv2DLayer;
pub use dense::DenseLayer;
pub use dropout::DropoutLayer;
pub use max_pool2d::MaxPool2DLayer;

use crate::ops::Window2d;
use crate::{Activation, Error, Init, Result, Storage, Variable};

/// Default running-average momentum for batch normalization.
pub const BATCH_NORM_MOMENTUM: f32 = 0.99;
/// Added to the variance before taking its inverse square root.
pub const BATCH_NORM_EPS: f32 = 1e-6;

/// One link of the network chain.
pub trait Layer: fmt::Debug + Send {
    fn name(&self) -> &'static str;

    fn input(&self) -> &Variable;

    fn output(&self) -> &Variable;

    /// Compute the output value from the input value.
    fn forward(&mut self, storage: &mut Storage, training: bool) -> Result<()>;

    /// Compute parameter and input gradients from the output gradient.
    ///
    /// Must follow a training-mode `forward` on the same batch.
    fn backward(&mut self, storage: &mut Storage) -> Result<()>;

    /// Adopt a re-shaped input (same identity) and re-shape the output and
    /// every per-batch variable to match. Parameters are untouched.
    fn update_dimensions(&mut self, input: &Variable) -> Result<()>;

    /// Clone this layer onto `input`, copying parameter values from `src`
    /// into `dst` under fresh variables. `None` means the layer has no
    /// inference role and is left out of the copy.
    fn copy(
        &self,
        input: &Variable,
        src: &Storage,
        dst: &mut Storage,
    ) -> Result<Option<Box<dyn Layer>>>;

    /// Trainable variables, in a stable order.
    fn parameters(&self) -> Vec<&Variable> {
        Vec::new()
    }

    fn parameter_count(&self) -> usize {
        self.parameters().iter().map(|v| v.element_count()).sum()
    }
}

/// Named padding schemes for a window of extent `k`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BorderMode {
    /// No padding.
    #[default]
    Valid,
    /// `k / 2`; keeps the extent for odd `k` at stride 1.
    Same,
    /// `k - 1`; every partial overlap produces an output.
    Full,
}

impl BorderMode {
    pub fn padding(self, kernel: usize) -> usize {
        match self {
            BorderMode::Valid => 0,
            BorderMode::Same => kernel / 2,
            BorderMode::Full => kernel.saturating_sub(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Padding {
    Border(BorderMode),
    Explicit { h: usize, w: usize },
}

impl Default for Padding {
    fn default() -> Self {
        Padding::Border(BorderMode::Valid)
    }
}

impl Padding {
    pub fn resolve(self, kernel_h: usize, kernel_w: usize) -> (usize, usize) {
        match self {
            Padding::Border(mode) => (mode.padding(kernel_h), mode.padding(kernel_w)),
            Padding::Explicit { h, w } => (h, w),
        }
    }
}

/// 2-D convolution settings. Stride defaults to 1, padding to `Valid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conv2DConfig {
    pub filters: usize,
    pub filter_h: usize,
    pub filter_w: usize,
    pub stride_h: usize,
    pub stride_w: usize,
    pub padding: Padding,
}

impl Conv2DConfig {
    pub fn new(filters: usize, filter_h: usize, filter_w: usize) -> Self {
        Self {
            filters,
            filter_h,
            filter_w,
            stride_h: 1,
            stride_w: 1,
            padding: Padding::default(),
        }
    }

    pub fn with_stride(mut self, stride_h: usize, stride_w: usize) -> Self {
        self.stride_h = stride_h;
        self.stride_w = stride_w;
        self
    }

    pub fn with_border(mut self, mode: BorderMode) -> Self {
        self.padding = Padding::Border(mode);
        self
    }

    pub fn with_padding(mut self, pad_h: usize, pad_w: usize) -> Self {
        self.padding = Padding::Explicit { h: pad_h, w: pad_w };
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.filters == 0 {
            return Err(Error::InvalidConfig("filter count must be > 0".to_owned()));
        }
        if self.filter_h == 0 || self.filter_w == 0 {
            return Err(Error::InvalidConfig(format!(
                "filter extent must be > 0, got {}x{}",
                self.filter_h, self.filter_w
            )));
        }
        if self.stride_h == 0 || self.stride_w == 0 {
            return Err(Error::InvalidConfig(format!(
                "stride must be > 0, got {}x{}",
                self.stride_h, self.stride_w
            )));
        }
        Ok(())
    }

    pub(crate) fn window(&self, input_dims: &[usize]) -> Result<Window2d> {
        let (pad_h, pad_w) = self.padding.resolve(self.filter_h, self.filter_w);
        Window2d::new(
            input_dims,
            self.filter_h,
            self.filter_w,
            self.stride_h,
            self.stride_w,
            pad_h,
            pad_w,
        )
    }
}

/// 2-D max-pooling settings. Stride defaults to the pool extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pool2DConfig {
    pub pool_h: usize,
    pub pool_w: usize,
    pub stride_h: usize,
    pub stride_w: usize,
    pub padding: Padding,
}

impl Pool2DConfig {
    pub fn new(pool_h: usize, pool_w: usize) -> Self {
        Self {
            pool_h,
            pool_w,
            stride_h: pool_h,
            stride_w: pool_w,
            padding: Padding::default(),
        }
    }

    pub fn with_stride(mut self, stride_h: usize, stride_w: usize) -> Self {
        self.stride_h = stride_h;
        self.stride_w = stride_w;
        self
    }

    pub fn with_border(mut self, mode: BorderMode) -> Self {
        self.padding = Padding::Border(mode);
        self
    }

    pub fn with_padding(mut self, pad_h: usize, pad_w: usize) -> Self {
        self.padding = Padding::Explicit { h: pad_h, w: pad_w };
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.pool_h == 0 || self.pool_w == 0 {
            return Err(Error::InvalidConfig(format!(
                "pool extent must be > 0, got {}x{}",
                self.pool_h, self.pool_w
            )));
        }
        if self.stride_h == 0 || self.stride_w == 0 {
            return Err(Error::InvalidConfig(format!(
                "stride must be > 0, got {}x{}",
                self.stride_h, self.stride_w
            )));
        }
        // A window lying entirely in the padding would have no maximum.
        let (pad_h, pad_w) = self.padding.resolve(self.pool_h, self.pool_w);
        if pad_h >= self.pool_h || pad_w >= self.pool_w {
            return Err(Error::InvalidConfig(format!(
                "padding {pad_h}x{pad_w} must be smaller than the pool extent {}x{}",
                self.pool_h, self.pool_w
            )));
        }
        Ok(())
    }

    pub(crate) fn window(&self, input_dims: &[usize]) -> Result<Window2d> {
        let (pad_h, pad_w) = self.padding.resolve(self.pool_h, self.pool_w);
        Window2d::new(
            input_dims,
            self.pool_h,
            self.pool_w,
            self.stride_h,
            self.stride_w,
            pad_h,
            pad_w,
        )
    }
}

/// Shape-free description of a layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LayerSpec {
    Dense { units: usize },
    Activation(Activation),
    Conv2D(Conv2DConfig),
    MaxPool2D(Pool2DConfig),
    BatchNorm { momentum: f32 },
    Dropout { ratio: f32 },
}

impl LayerSpec {
    pub fn validate(&self) -> Result<()> {
        match self {
            LayerSpec::Dense { units } => {
                if *units == 0 {
                    return Err(Error::InvalidConfig("dense units must be > 0".to_owned()));
                }
                Ok(())
            }
            LayerSpec::Activation(a) => a.validate(),
            LayerSpec::Conv2D(c) => c.validate(),
            LayerSpec::MaxPool2D(p) => p.validate(),
            LayerSpec::BatchNorm { momentum } => {
                if !(0.0..1.0).contains(momentum) {
                    return Err(Error::InvalidConfig(format!(
                        "batch norm momentum must be in [0, 1), got {momentum}"
                    )));
                }
                Ok(())
            }
            LayerSpec::Dropout { ratio } => {
                if !(0.0..1.0).contains(ratio) {
                    return Err(Error::InvalidConfig(format!(
                        "dropout ratio must be in [0, 1), got {ratio}"
                    )));
                }
                Ok(())
            }
        }
    }

    /// Create the layer on top of `input`, allocating and seeding its
    /// parameters in `storage`.
    pub fn initialize(
        &self,
        input: &Variable,
        storage: &mut Storage,
        rng: &mut StdRng,
        init: Init,
    ) -> Result<Box<dyn Layer>> {
        self.validate()?;
        Ok(match *self {
            LayerSpec::Dense { units } => {
                Box::new(DenseLayer::initialize(units, input, storage, rng, init)?)
            }
            LayerSpec::Activation(a) => Box::new(ActivationLayer::initialize(a, input)),
            LayerSpec::Conv2D(c) => Box::new(Conv2DLayer::initialize(c, input, storage, rng, init)?),
            LayerSpec::MaxPool2D(p) => Box::new(MaxPool2DLayer::initialize(p, input)?),
            LayerSpec::BatchNorm { momentum } => {
                Box::new(BatchNormLayer::initialize(momentum, input, storage)?)
            }
            LayerSpec::Dropout { ratio } => Box::new(DropoutLayer::initialize(ratio, input, rng)),
        })
    }
}

/// Fresh trainable/preservable variable carrying `var`'s value from `src`.
pub(crate) fn copy_state(var: &Variable, src: &Storage, dst: &mut Storage) -> Result<Variable> {
    let copy = var.detached();
    dst.insert_value(&copy, src.value(var)?.clone())?;
    Ok(copy)
}

/// `[batch, sample_dims...]` with the batch size taken from `input`.
pub(crate) fn batched_like(input: &Variable, sample_dims: &[usize]) -> Result<crate::Shape> {
    crate::Shape::batched(input.shape().batch_size(), sample_dims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn border_modes_resolve_to_padding() {
        assert_eq!(BorderMode::Valid.padding(5), 0);
        assert_eq!(BorderMode::Same.padding(5), 2);
        assert_eq!(BorderMode::Same.padding(4), 2);
        assert_eq!(BorderMode::Full.padding(5), 4);
    }

    #[test]
    fn conv_config_rejects_degenerate_settings() {
        assert!(Conv2DConfig::new(0, 3, 3).validate().is_err());
        assert!(Conv2DConfig::new(4, 0, 3).validate().is_err());
        assert!(Conv2DConfig::new(4, 3, 3).with_stride(1, 0).validate().is_err());
        assert!(Conv2DConfig::new(4, 3, 3).validate().is_ok());
    }

    #[test]
    fn pool_config_rejects_padding_at_or_above_extent() {
        assert!(Pool2DConfig::new(2, 2).validate().is_ok());
        assert!(Pool2DConfig::new(2, 2).with_padding(1, 1).validate().is_ok());
        assert!(Pool2DConfig::new(2, 2).with_padding(2, 0).validate().is_err());
        assert!(Pool2DConfig::new(3, 3).with_border(BorderMode::Full).validate().is_err());
        assert!(Pool2DConfig::new(0, 2).validate().is_err());
    }

    #[test]
    fn layer_spec_ranges() {
        assert!(LayerSpec::Dense { units: 0 }.validate().is_err());
        assert!(LayerSpec::Dropout { ratio: 1.0 }.validate().is_err());
        assert!(LayerSpec::Dropout { ratio: 0.0 }.validate().is_ok());
        assert!(LayerSpec::BatchNorm { momentum: -0.1 }.validate().is_err());
        assert!(LayerSpec::BatchNorm { momentum: 0.99 }.validate().is_ok());
    }
}
