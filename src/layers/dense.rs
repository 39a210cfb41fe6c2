use rand::rngs::StdRng;

use super::{Layer, batched_like, copy_state};
use crate::init::Fans;
use crate::{Error, Init, Result, Shape, Storage, Variable, ops};

/// Fully connected layer over the flattened sample.
#[derive(Debug, Clone)]
pub struct DenseLayer {
    units: usize,
    input: Variable,
    weights: Variable,
    bias: Variable,
    output: Variable,
}

impl DenseLayer {
    pub fn initialize(
        units: usize,
        input: &Variable,
        storage: &mut Storage,
        rng: &mut StdRng,
        init: Init,
    ) -> Result<Self> {
        let fan_in = input.shape().sample_len();
        let weights = Variable::trainable(Shape::new(&[fan_in, units])?);
        let bias = Variable::trainable(Shape::new(&[units])?);

        let sampler = init.sampler(Fans::new(fan_in, units))?;
        storage.assign_value_with(&weights, || sampler.sample(&mut *rng));
        storage.value_mut(&bias).fill(0.0);

        Ok(Self {
            units,
            input: input.clone(),
            weights,
            bias,
            output: Variable::new(batched_like(input, &[units])?),
        })
    }

    pub fn weights(&self) -> &Variable {
        &self.weights
    }

    pub fn bias(&self) -> &Variable {
        &self.bias
    }
}

impl Layer for DenseLayer {
    fn name(&self) -> &'static str {
        "dense"
    }

    fn input(&self) -> &Variable {
        &self.input
    }

    fn output(&self) -> &Variable {
        &self.output
    }

    fn forward(&mut self, storage: &mut Storage, _training: bool) -> Result<()> {
        ops::dense::forward(storage, &self.input, &self.weights, &self.bias, &self.output)
    }

    fn backward(&mut self, storage: &mut Storage) -> Result<()> {
        ops::dense::backward(storage, &self.input, &self.weights, &self.bias, &self.output)
    }

    fn update_dimensions(&mut self, input: &Variable) -> Result<()> {
        let fan_in = self.weights.dims()[0];
        if input.shape().sample_len() != fan_in {
            return Err(Error::InvalidShape(format!(
                "dense layer expects {fan_in} input features, got input {}",
                input.shape()
            )));
        }
        self.input = input.clone();
        self.output.set_shape(batched_like(input, &[self.units])?);
        Ok(())
    }

    fn copy(
        &self,
        input: &Variable,
        src: &Storage,
        dst: &mut Storage,
    ) -> Result<Option<Box<dyn Layer>>> {
        Ok(Some(Box::new(Self {
            units: self.units,
            input: input.clone(),
            weights: copy_state(&self.weights, src, dst)?,
            bias: copy_state(&self.bias, src, dst)?,
            output: Variable::new(batched_like(input, &[self.units])?),
        })))
    }

    fn parameters(&self) -> Vec<&Variable> {
        vec![&self.weights, &self.bias]
    }
}
