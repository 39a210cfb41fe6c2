use super::{BATCH_NORM_EPS, Layer, copy_state};
use crate::ops::batch_norm::{self, NormVariables};
use crate::{Error, Result, Shape, Storage, Variable};

/// Per-channel batch normalization (channel = axis 1).
///
/// Training forwards normalize with batch statistics and update the running
/// mean/variance; inference forwards use the running values. The running
/// statistics are preservable, so they survive batch-size changes and are
/// carried by `copy`.
#[derive(Debug, Clone)]
pub struct BatchNormLayer {
    momentum: f32,
    eps: f32,
    input: Variable,
    scale: Variable,
    bias: Variable,
    running_mean: Variable,
    running_var: Variable,
    batch_mean: Variable,
    batch_inv_std: Variable,
    output: Variable,
}

fn channels(input: &Variable) -> Result<usize> {
    match input.dims() {
        [_, c, ..] => Ok(*c),
        _ => Err(Error::InvalidShape(format!(
            "batch norm needs a [batch, channels, ...] input, got {}",
            input.shape()
        ))),
    }
}

impl BatchNormLayer {
    pub fn initialize(momentum: f32, input: &Variable, storage: &mut Storage) -> Result<Self> {
        let c = Shape::new(&[channels(input)?])?;
        let layer = Self {
            momentum,
            eps: BATCH_NORM_EPS,
            input: input.clone(),
            scale: Variable::trainable(c.clone()),
            bias: Variable::trainable(c.clone()),
            running_mean: Variable::preservable(c.clone()),
            running_var: Variable::preservable(c.clone()),
            batch_mean: Variable::new(c.clone()),
            batch_inv_std: Variable::new(c),
            output: Variable::new(input.shape().clone()),
        };
        storage.value_mut(&layer.scale).fill(1.0);
        storage.value_mut(&layer.bias).fill(0.0);
        storage.value_mut(&layer.running_mean).fill(0.0);
        storage.value_mut(&layer.running_var).fill(1.0);
        Ok(layer)
    }

    pub fn running_mean(&self) -> &Variable {
        &self.running_mean
    }

    pub fn running_var(&self) -> &Variable {
        &self.running_var
    }

    fn vars(&self) -> NormVariables<'_> {
        NormVariables {
            input: &self.input,
            scale: &self.scale,
            bias: &self.bias,
            running_mean: &self.running_mean,
            running_var: &self.running_var,
            batch_mean: &self.batch_mean,
            batch_inv_std: &self.batch_inv_std,
            output: &self.output,
        }
    }
}

impl Layer for BatchNormLayer {
    fn name(&self) -> &'static str {
        "batch_norm"
    }

    fn input(&self) -> &Variable {
        &self.input
    }

    fn output(&self) -> &Variable {
        &self.output
    }

    fn forward(&mut self, storage: &mut Storage, training: bool) -> Result<()> {
        if training {
            batch_norm::forward_training(storage, &self.vars(), self.momentum, self.eps)
        } else {
            batch_norm::forward_inference(storage, &self.vars(), self.eps)
        }
    }

    fn backward(&mut self, storage: &mut Storage) -> Result<()> {
        batch_norm::backward(storage, &self.vars())
    }

    fn update_dimensions(&mut self, input: &Variable) -> Result<()> {
        let c = channels(input)?;
        if c != self.scale.element_count() {
            return Err(Error::InvalidShape(format!(
                "batch norm was built for {} channels, got input {}",
                self.scale.element_count(),
                input.shape()
            )));
        }
        self.input = input.clone();
        self.output.set_shape(input.shape().clone());
        Ok(())
    }

    fn copy(
        &self,
        input: &Variable,
        src: &Storage,
        dst: &mut Storage,
    ) -> Result<Option<Box<dyn Layer>>> {
        Ok(Some(Box::new(Self {
            momentum: self.momentum,
            eps: self.eps,
            input: input.clone(),
            scale: copy_state(&self.scale, src, dst)?,
            bias: copy_state(&self.bias, src, dst)?,
            running_mean: copy_state(&self.running_mean, src, dst)?,
            running_var: copy_state(&self.running_var, src, dst)?,
            batch_mean: self.batch_mean.detached(),
            batch_inv_std: self.batch_inv_std.detached(),
            output: Variable::new(input.shape().clone()),
        })))
    }

    fn parameters(&self) -> Vec<&Variable> {
        vec![&self.scale, &self.bias]
    }
}
