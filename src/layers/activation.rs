use super::Layer;
use crate::{Activation, Result, Storage, Variable, ops};

#[derive(Debug, Clone)]
pub struct ActivationLayer {
    activation: Activation,
    input: Variable,
    output: Variable,
}

impl ActivationLayer {
    pub fn initialize(activation: Activation, input: &Variable) -> Self {
        Self {
            activation,
            input: input.clone(),
            output: Variable::new(input.shape().clone()),
        }
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }
}

impl Layer for ActivationLayer {
    fn name(&self) -> &'static str {
        "activation"
    }

    fn input(&self) -> &Variable {
        &self.input
    }

    fn output(&self) -> &Variable {
        &self.output
    }

    fn forward(&mut self, storage: &mut Storage, _training: bool) -> Result<()> {
        ops::activation::forward(storage, self.activation, &self.input, &self.output)
    }

    fn backward(&mut self, storage: &mut Storage) -> Result<()> {
        ops::activation::backward(storage, self.activation, &self.input, &self.output)
    }

    fn update_dimensions(&mut self, input: &Variable) -> Result<()> {
        self.input = input.clone();
        self.output.set_shape(input.shape().clone());
        Ok(())
    }

    fn copy(
        &self,
        input: &Variable,
        _src: &Storage,
        _dst: &mut Storage,
    ) -> Result<Option<Box<dyn Layer>>> {
        Ok(Some(Box::new(Self::initialize(self.activation, input))))
    }
}
