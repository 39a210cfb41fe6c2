//! Network builder.
//!
//! `NetworkBuilder` is the recommended way to define a network. Every step
//! validates its configuration immediately; shape errors that depend on the
//! input geometry (a kernel larger than the padded input, say) surface at
//! [`Network::initialize`].

use crate::layers::{BATCH_NORM_MOMENTUM, Conv2DConfig, LayerSpec, Pool2DConfig};
use crate::{Activation, Error, Init, Network, Result};

#[derive(Debug, Clone)]
/// Builder for a `Network`.
///
/// Example:
///
/// ```rust
/// use rust_convnet::layers::{Conv2DConfig, Pool2DConfig};
/// use rust_convnet::{Activation, NetworkBuilder};
///
/// # fn main() -> rust_convnet::Result<()> {
/// let mut net = NetworkBuilder::new(&[1, 28, 28])?
///     .conv2d(Conv2DConfig::new(8, 5, 5))?
///     .activation(Activation::ReLU)?
///     .max_pool2d(Pool2DConfig::new(2, 2))?
///     .dense(10)?
///     .build_with_seed(0)?;
/// net.initialize(16)?;
/// assert_eq!(net.output()?.dims(), &[16, 10]);
/// # Ok(())
/// # }
/// ```
pub struct NetworkBuilder {
    sample_dims: Vec<usize>,
    specs: Vec<LayerSpec>,
    init: Init,
}

impl NetworkBuilder {
    /// Start building a network over samples of `sample_dims`
    /// (`[features]` or `[channels, h, w]`).
    pub fn new(sample_dims: &[usize]) -> Result<Self> {
        if sample_dims.is_empty() || sample_dims.contains(&0) {
            return Err(Error::InvalidConfig(format!(
                "sample dims must be non-empty and positive, got {sample_dims:?}"
            )));
        }
        Ok(Self {
            sample_dims: sample_dims.to_vec(),
            specs: Vec::new(),
            init: Init::default(),
        })
    }

    /// Append any validated layer description.
    pub fn layer(mut self, spec: LayerSpec) -> Result<Self> {
        spec.validate()?;
        self.specs.push(spec);
        Ok(self)
    }

    pub fn dense(self, units: usize) -> Result<Self> {
        self.layer(LayerSpec::Dense { units })
    }

    pub fn activation(self, activation: Activation) -> Result<Self> {
        self.layer(LayerSpec::Activation(activation))
    }

    pub fn conv2d(self, config: Conv2DConfig) -> Result<Self> {
        self.layer(LayerSpec::Conv2D(config))
    }

    pub fn max_pool2d(self, config: Pool2DConfig) -> Result<Self> {
        self.layer(LayerSpec::MaxPool2D(config))
    }

    /// Batch normalization with the default running-average momentum.
    pub fn batch_norm(self) -> Result<Self> {
        self.batch_norm_with_momentum(BATCH_NORM_MOMENTUM)
    }

    pub fn batch_norm_with_momentum(self, momentum: f32) -> Result<Self> {
        self.layer(LayerSpec::BatchNorm { momentum })
    }

    /// Dropout dropping each activation with probability `ratio` in training.
    pub fn dropout(self, ratio: f32) -> Result<Self> {
        self.layer(LayerSpec::Dropout { ratio })
    }

    /// Weight initialization scheme for dense and convolution layers.
    pub fn initialization(mut self, init: Init) -> Self {
        self.init = init;
        self
    }

    /// Build an uninitialized network whose weights and dropout masks are
    /// drawn from `seed`.
    pub fn build_with_seed(self, seed: u64) -> Result<Network> {
        if self.specs.is_empty() {
            return Err(Error::InvalidConfig(
                "network must have at least one layer".to_owned(),
            ));
        }
        Ok(Network::new(self.sample_dims, self.specs, self.init, seed))
    }
}
