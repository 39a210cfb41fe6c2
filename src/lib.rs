//! A small convolutional network core.
//!
//! `rust-convnet` is a from-scratch implementation of a feed-forward network
//! chain with dense, convolution, max-pooling, batch-norm and dropout layers,
//! hand-written backpropagation and a mini-batch training loop.
//!
//! # Design goals
//!
//! - Explicit data flow: layers never own tensors. They hold [`Variable`]
//!   handles, and every value and gradient lives in the network's [`Storage`].
//! - Predictable performance: per-batch buffers are allocated once and reused;
//!   convolution is lowered to GEMM through `im2col`/`col2im`.
//! - Clear contracts: shapes are validated at layer boundaries and reported
//!   as [`Error`] values, never panics.
//!
//! # Data layout and shapes
//!
//! - Scalars are `f32`, stored row-major.
//! - The leading axis of every batched tensor is the sample axis.
//! - Image batches are `[N, C, H, W]`; dense batches are `[N, features]`.
//! - Dense weights are `[fan_in, units]`; convolution weights are
//!   `[filters, channels·kh·kw]`.
//!
//! # Layers at two levels
//!
//! - [`ops`]: stateless forward/backward functions over variables in a
//!   [`Storage`]. Useful for testing and custom chains.
//! - [`layers`]: stateful objects implementing [`layers::Layer`], created
//!   from a [`layers::LayerSpec`] and driven by a [`Network`].
//!
//! # MSRV
//!
//! This crate's minimum supported Rust version (MSRV) is specified in `Cargo.toml`.

//! # Quick start
//!
//! ```rust
//! use rust_convnet::{Activation, Dataset, FitConfig, Loss, NetworkBuilder, Optimizer};
//!
//! # fn main() -> rust_convnet::Result<()> {
//! let xs = vec![
//!     vec![0.0, 0.0],
//!     vec![0.0, 1.0],
//!     vec![1.0, 0.0],
//!     vec![1.0, 1.0],
//! ];
//! let ys = vec![vec![0.0], vec![0.0], vec![0.0], vec![1.0]];
//! let train = Dataset::from_rows(&xs, &ys)?;
//!
//! let mut net = NetworkBuilder::new(&[2])?
//!     .dense(8)?
//!     .activation(Activation::ReLU)?
//!     .dense(1)?
//!     .build_with_seed(0)?;
//!
//! let report = net.fit(
//!     &train,
//!     None,
//!     FitConfig {
//!         epochs: 200,
//!         lr: 0.05,
//!         batch_size: 4,
//!         shuffle: rust_convnet::Shuffle::Seeded(0),
//!         optimizer: Optimizer::adam(),
//!         l1_decay: 0.0,
//!         l2_decay: 0.0,
//!         loss: Loss::BinaryCrossEntropyWithLogits,
//!     },
//! )?;
//! let mut trained = report.network;
//! let logits = trained.predict(train.observations())?;
//! assert_eq!(logits.dims(), &[4, 1]);
//! # Ok(())
//! # }
//! ```

//! # Driving a training step by hand
//!
//! [`Network::fit`] is a thin loop over the same public steps:
//!
//! ```rust
//! use rust_convnet::{Activation, Loss, NetworkBuilder, Optimizer, Tensor, WeightDecay};
//!
//! # fn main() -> rust_convnet::Result<()> {
//! let mut net = NetworkBuilder::new(&[3])?
//!     .dense(8)?
//!     .activation(Activation::Tanh)?
//!     .dense(2)?
//!     .build_with_seed(0)?;
//! net.initialize(1)?;
//! let mut state = Optimizer::Sgd.state(&net.parameters())?;
//!
//! net.input_tensor_mut()?.data_mut().copy_from_slice(&[0.1, -0.2, 0.3]);
//! let target = Tensor::from_dims(vec![0.0, 1.0], &[1, 2])?;
//!
//! net.forward(true)?;
//! let _loss = net.apply_loss(Loss::Mse, &target)?;
//! net.backward()?;
//! net.step(&mut state, 1e-2, WeightDecay::default())?;
//! # Ok(())
//! # }
//! ```

pub mod activation;
pub mod batcher;
pub mod builder;
pub mod data;
pub mod error;
pub mod init;
pub mod layers;
pub mod loss;
pub(crate) mod matmul;
pub mod network;
pub mod ops;
pub mod optim;
pub mod shape;
pub mod storage;
pub mod tensor;
pub mod train;
pub mod variable;

pub use activation::Activation;
pub use batcher::{Batcher, Shuffle};
pub use builder::NetworkBuilder;
pub use data::{Dataset, one_of_n};
pub use error::{Error, Result};
pub use init::Init;
pub use loss::Loss;
pub use network::Network;
pub use optim::{Optimizer, OptimizerState, WeightDecay};
pub use shape::Shape;
pub use storage::Storage;
pub use tensor::{DataLayout, Tensor};
pub use train::{EpochReport, FitConfig, FitReport, Learner};
pub use variable::{Variable, VariableId};
