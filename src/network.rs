//! The layer chain and its storage.
//!
//! A `Network` starts uninitialized: it knows the per-sample input dims and
//! the list of [`LayerSpec`]s. [`Network::initialize`] fixes a batch size,
//! creates every layer (seeding weights from the network's own rng) and
//! allocates parameters. After that:
//!
//! - [`Network::forward`] / [`Network::backward`] run the chain,
//! - [`Network::update_dimensions`] switches the batch size,
//! - [`Network::predict`] handles any number of samples,
//! - [`Network::copy`] produces an independent inference snapshot.

use std::fmt::Write as _;

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::layers::{Layer, LayerSpec};
use crate::optim::{OptimizerState, WeightDecay};
use crate::train::{FitConfig, FitReport, Learner};
use crate::{Dataset, Error, Init, Loss, Result, Shape, Storage, Tensor, Variable};

#[derive(Debug)]
pub struct Network {
    sample_dims: Vec<usize>,
    specs: Vec<LayerSpec>,
    init: Init,
    rng: StdRng,
    input: Option<Variable>,
    layers: Vec<Box<dyn Layer>>,
    storage: Storage,
}

impl Network {
    pub(crate) fn new(sample_dims: Vec<usize>, specs: Vec<LayerSpec>, init: Init, seed: u64) -> Self {
        Self {
            sample_dims,
            specs,
            init,
            rng: StdRng::seed_from_u64(seed),
            input: None,
            layers: Vec::new(),
            storage: Storage::new(),
        }
    }

    #[inline]
    pub fn sample_dims(&self) -> &[usize] {
        &self.sample_dims
    }

    #[inline]
    pub fn specs(&self) -> &[LayerSpec] {
        &self.specs
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.input.is_some()
    }

    #[inline]
    pub fn layers(&self) -> &[Box<dyn Layer>] {
        &self.layers
    }

    #[inline]
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn input(&self) -> Result<&Variable> {
        self.input.as_ref().ok_or(Error::Uninitialized)
    }

    pub fn output(&self) -> Result<&Variable> {
        self.layers
            .last()
            .map(|l| l.output())
            .ok_or(Error::Uninitialized)
    }

    /// Current batch size.
    pub fn batch_size(&self) -> Result<usize> {
        Ok(self.input()?.shape().batch_size())
    }

    /// Create every layer for inputs of `batch_size` samples.
    pub fn initialize(&mut self, batch_size: usize) -> Result<()> {
        let shape = Shape::batched(batch_size, &self.sample_dims)?;
        self.initialize_with(Variable::new(shape))
    }

    /// Create every layer on top of an existing input variable.
    ///
    /// Re-initializing discards all previous weights and state.
    pub fn initialize_with(&mut self, input: Variable) -> Result<()> {
        if input.shape().sample_dims() != self.sample_dims.as_slice() {
            return Err(Error::InvalidShape(format!(
                "network expects samples of {:?}, input variable is {}",
                self.sample_dims,
                input.shape()
            )));
        }
        self.storage = Storage::new();
        self.layers.clear();
        self.input = None;

        let mut current = input.clone();
        for spec in &self.specs {
            let layer = spec.initialize(&current, &mut self.storage, &mut self.rng, self.init)?;
            current = layer.output().clone();
            self.layers.push(layer);
        }
        self.input = Some(input);
        log::debug!("initialized network:\n{}", self.summary());
        Ok(())
    }

    /// Run every layer in order.
    pub fn forward(&mut self, training: bool) -> Result<()> {
        if !self.is_initialized() {
            return Err(Error::Uninitialized);
        }
        for layer in &mut self.layers {
            layer.forward(&mut self.storage, training)?;
        }
        Ok(())
    }

    /// Run every layer in reverse. The output gradient must already be set
    /// (see [`Network::apply_loss`]).
    pub fn backward(&mut self) -> Result<()> {
        if !self.is_initialized() {
            return Err(Error::Uninitialized);
        }
        for layer in self.layers.iter_mut().rev() {
            layer.backward(&mut self.storage)?;
        }
        Ok(())
    }

    /// Switch to a new batch size.
    ///
    /// Per-batch storage is released; weights and running statistics are
    /// kept.
    pub fn update_dimensions(&mut self, batch_size: usize) -> Result<()> {
        let input = self.input.as_mut().ok_or(Error::Uninitialized)?;
        let shape = input.shape().with_batch_size(batch_size)?;
        log::debug!("batch size {} -> {batch_size}", input.shape().batch_size());
        input.set_shape(shape);

        self.storage.drop_non_preservable();
        let mut current = input.clone();
        for layer in &mut self.layers {
            layer.update_dimensions(&current)?;
            current = layer.output().clone();
        }
        Ok(())
    }

    /// Input value buffer, sized for the current batch.
    pub fn input_tensor_mut(&mut self) -> Result<&mut Tensor> {
        let input = self.input.as_ref().ok_or(Error::Uninitialized)?;
        Ok(self.storage.value_mut(input))
    }

    /// Output value of the last forward pass.
    pub fn output_tensor(&self) -> Result<&Tensor> {
        self.storage.value(self.output()?)
    }

    /// Compute the loss of the last forward pass against `targets` and seed
    /// the output gradient for [`Network::backward`].
    pub fn apply_loss(&mut self, loss: Loss, targets: &Tensor) -> Result<f32> {
        let output = self
            .layers
            .last()
            .map(|l| l.output())
            .ok_or(Error::Uninitialized)?;
        let mut grad = self.storage.take_gradient(output);
        let result = self
            .storage
            .value(output)
            .and_then(|pred| loss.gradient(pred, targets, &mut grad));
        self.storage.restore_gradient(output, grad);
        result
    }

    /// Apply one optimizer step to every trainable parameter.
    pub fn step(&mut self, state: &mut OptimizerState, lr: f32, decay: WeightDecay) -> Result<()> {
        state.step(&mut self.storage, lr, decay)
    }

    /// Inference on `observations` (`[n, sample_dims...]`).
    pub fn predict(&mut self, observations: &Tensor) -> Result<Tensor> {
        let n = observations.shape().batch_size();
        let out_dims = self.output()?.shape().with_batch_size(n)?;
        let mut out = Tensor::zeros(out_dims);
        self.predict_into(observations, &mut out)?;
        Ok(out)
    }

    /// Inference writing into a caller buffer with `n · output_len` elements.
    ///
    /// Switches the batch size when `n` differs from the current one.
    pub fn predict_into(&mut self, observations: &Tensor, out: &mut Tensor) -> Result<()> {
        if observations.shape().sample_dims() != self.sample_dims.as_slice() {
            return Err(Error::InvalidShape(format!(
                "network expects samples of {:?}, got observations {}",
                self.sample_dims,
                observations.shape()
            )));
        }
        let n = observations.shape().batch_size();
        if self.batch_size()? != n {
            self.update_dimensions(n)?;
        }
        self.input_tensor_mut()?
            .data_mut()
            .copy_from_slice(observations.data());
        self.forward(false)?;

        let y = self.output_tensor()?;
        if out.element_count() != y.element_count() {
            return Err(Error::ShapeMismatch {
                expected: y.shape().clone(),
                got: out.shape().clone(),
            });
        }
        out.data_mut().copy_from_slice(y.data());
        Ok(())
    }

    /// Independent network with fresh variables and storage.
    ///
    /// Parameters and batch-norm running statistics are deep-copied; dropout
    /// layers are left out.
    pub fn copy(&self) -> Result<Network> {
        let input = self.input()?;
        let new_input = Variable::new(input.shape().clone());
        let mut storage = Storage::new();
        let mut layers = Vec::with_capacity(self.layers.len());
        let mut current = new_input.clone();
        for layer in &self.layers {
            if let Some(copy) = layer.copy(&current, &self.storage, &mut storage)? {
                current = copy.output().clone();
                layers.push(copy);
            }
        }
        Ok(Network {
            sample_dims: self.sample_dims.clone(),
            specs: self
                .specs
                .iter()
                .filter(|s| !matches!(s, LayerSpec::Dropout { .. }))
                .copied()
                .collect(),
            init: self.init,
            rng: self.rng.clone(),
            input: Some(new_input),
            layers,
            storage,
        })
    }

    /// Trainable variables of every layer, in chain order.
    pub fn parameters(&self) -> Vec<Variable> {
        self.layers
            .iter()
            .flat_map(|l| l.parameters())
            .cloned()
            .collect()
    }

    pub fn parameter_count(&self) -> usize {
        self.layers.iter().map(|l| l.parameter_count()).sum()
    }

    /// Value of a variable owned by this network.
    pub fn value(&self, var: &Variable) -> Result<&Tensor> {
        self.storage.value(var)
    }

    /// One line per layer: name, input and output shapes, parameter count.
    pub fn summary(&self) -> String {
        let mut s = String::new();
        let _ = writeln!(s, "{:<12} {:<20} {:<20} {:>10}", "layer", "input", "output", "params");
        for layer in &self.layers {
            let _ = writeln!(
                s,
                "{:<12} {:<20} {:<20} {:>10}",
                layer.name(),
                layer.input().shape().to_string(),
                layer.output().shape().to_string(),
                layer.parameter_count()
            );
        }
        let _ = write!(s, "total parameters: {}", self.parameter_count());
        s
    }

    /// Not defined for neural networks.
    pub fn variable_importance(&self) -> Result<Vec<f32>> {
        Err(Error::Unsupported(
            "variable importance is not available for neural networks".to_owned(),
        ))
    }

    /// Train with mini-batch gradient descent. See [`Learner::learn`].
    pub fn fit(
        &mut self,
        train: &Dataset,
        validation: Option<&Dataset>,
        cfg: FitConfig,
    ) -> Result<FitReport> {
        Learner::new(cfg)?.learn(self, train, validation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{BorderMode, Conv2DConfig, Pool2DConfig};
    use crate::{Activation, NetworkBuilder};

    fn conv_net(seed: u64) -> Network {
        NetworkBuilder::new(&[1, 6, 6])
            .unwrap()
            .conv2d(Conv2DConfig::new(2, 3, 3).with_border(BorderMode::Same))
            .unwrap()
            .batch_norm()
            .unwrap()
            .activation(Activation::ReLU)
            .unwrap()
            .max_pool2d(Pool2DConfig::new(2, 2))
            .unwrap()
            .dropout(0.25)
            .unwrap()
            .dense(3)
            .unwrap()
            .build_with_seed(seed)
            .unwrap()
    }

    fn ramp(n: usize, sample_len: usize) -> Vec<f32> {
        (0..n * sample_len).map(|i| ((i % 13) as f32 - 6.0) * 0.1).collect()
    }

    #[test]
    fn uninitialized_network_refuses_to_run() {
        let mut net = conv_net(0);
        assert!(matches!(net.forward(false), Err(Error::Uninitialized)));
        assert!(matches!(net.copy(), Err(Error::Uninitialized)));
        let x = Tensor::from_dims(vec![0.0; 36], &[1, 1, 6, 6]).unwrap();
        assert!(matches!(net.predict(&x), Err(Error::Uninitialized)));
    }

    #[test]
    fn initialize_wires_shapes_through_the_chain() {
        let mut net = conv_net(0);
        net.initialize(4).unwrap();
        let dims: Vec<Vec<usize>> = net
            .layers()
            .iter()
            .map(|l| l.output().dims().to_vec())
            .collect();
        assert_eq!(
            dims,
            vec![
                vec![4, 2, 6, 6],
                vec![4, 2, 6, 6],
                vec![4, 2, 6, 6],
                vec![4, 2, 3, 3],
                vec![4, 2, 3, 3],
                vec![4, 3],
            ]
        );
        // conv 2·9 + 2, batch norm 2 + 2, dense 18·3 + 3
        assert_eq!(net.parameter_count(), 20 + 4 + 57);
        assert!(net.summary().contains("total parameters: 81"));
    }

    #[test]
    fn seeded_builds_are_identical() {
        let mut a = conv_net(5);
        let mut b = conv_net(5);
        a.initialize(2).unwrap();
        b.initialize(2).unwrap();
        let x = Tensor::from_dims(ramp(2, 36), &[2, 1, 6, 6]).unwrap();
        assert_eq!(a.predict(&x).unwrap(), b.predict(&x).unwrap());
    }

    #[test]
    fn update_dimensions_keeps_parameters() {
        let mut net = conv_net(1);
        net.initialize(8).unwrap();
        let before: Vec<Tensor> = net
            .parameters()
            .iter()
            .map(|p| net.value(p).unwrap().clone())
            .collect();

        net.update_dimensions(3).unwrap();
        assert_eq!(net.output().unwrap().dims(), &[3, 3]);
        for (p, old) in net.parameters().iter().zip(&before) {
            assert_eq!(net.value(p).unwrap(), old);
        }
        // Per-batch buffers were released; the input must be written again.
        assert!(matches!(net.forward(false), Err(Error::Unallocated { .. })));
        net.input_tensor_mut()
            .unwrap()
            .data_mut()
            .copy_from_slice(&ramp(3, 36));
        net.forward(true).unwrap();
        assert_eq!(net.output_tensor().unwrap().dims(), &[3, 3]);
    }

    #[test]
    fn predict_is_independent_of_batch_size() {
        let mut net = conv_net(2);
        net.initialize(4).unwrap();
        let x = Tensor::from_dims(ramp(4, 36), &[4, 1, 6, 6]).unwrap();
        let all = net.predict(&x).unwrap();

        for i in 0..4 {
            let one = net.predict(&x.slice_copy(i, 1).unwrap()).unwrap();
            for (a, b) in one.data().iter().zip(all.row(i)) {
                assert!((a - b).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn predict_rejects_wrong_sample_dims() {
        let mut net = conv_net(0);
        net.initialize(1).unwrap();
        let x = Tensor::from_dims(vec![0.0; 25], &[1, 1, 5, 5]).unwrap();
        assert!(matches!(net.predict(&x), Err(Error::InvalidShape(_))));
    }

    #[test]
    fn copy_is_independent_and_drops_dropout() {
        let mut net = conv_net(3);
        net.initialize(2).unwrap();
        let x = Tensor::from_dims(ramp(2, 36), &[2, 1, 6, 6]).unwrap();

        let mut copy = net.copy().unwrap();
        assert_eq!(copy.layers().len(), net.layers().len() - 1);
        assert!(copy.layers().iter().all(|l| l.name() != "dropout"));
        assert!(
            !copy
                .specs()
                .iter()
                .any(|s| matches!(s, LayerSpec::Dropout { .. }))
        );
        assert_eq!(copy.parameter_count(), net.parameter_count());
        assert_eq!(copy.predict(&x).unwrap(), net.predict(&x).unwrap());

        // Disjoint identities and storage.
        for (a, b) in copy.parameters().iter().zip(net.parameters().iter()) {
            assert_ne!(a, b);
        }
        let first = net.parameters()[0].clone();
        net.storage.value_mut(&first).fill(0.0);
        assert_ne!(copy.predict(&x).unwrap(), net.predict(&x).unwrap());
    }

    #[test]
    fn training_forward_then_backward_fills_every_parameter_gradient() {
        let mut net = conv_net(4);
        net.initialize(2).unwrap();
        net.input_tensor_mut()
            .unwrap()
            .data_mut()
            .copy_from_slice(&ramp(2, 36));
        net.forward(true).unwrap();
        let targets = Tensor::from_dims(vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0], &[2, 3]).unwrap();
        let loss = net.apply_loss(Loss::SoftmaxCrossEntropy, &targets).unwrap();
        assert!(loss.is_finite() && loss > 0.0);
        net.backward().unwrap();
        for p in net.parameters() {
            let g = net.storage().gradient(&p).unwrap();
            assert_eq!(g.shape(), p.shape());
        }
    }

    #[test]
    fn variable_importance_is_unsupported() {
        let net = conv_net(0);
        assert!(matches!(
            net.variable_importance(),
            Err(Error::Unsupported(_))
        ));
    }
}
