use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use super::Layer;
use crate::{Result, Storage, Variable, ops};

/// Inverted dropout with its own random stream, seeded from the network's.
#[derive(Debug, Clone)]
pub struct DropoutLayer {
    ratio: f32,
    input: Variable,
    mask: Variable,
    output: Variable,
    rng: StdRng,
}

impl DropoutLayer {
    pub fn initialize(ratio: f32, input: &Variable, rng: &mut StdRng) -> Self {
        Self {
            ratio,
            input: input.clone(),
            mask: Variable::new(input.shape().clone()),
            output: Variable::new(input.shape().clone()),
            rng: StdRng::seed_from_u64(rng.next_u64()),
        }
    }

    pub fn ratio(&self) -> f32 {
        self.ratio
    }
}

impl Layer for DropoutLayer {
    fn name(&self) -> &'static str {
        "dropout"
    }

    fn input(&self) -> &Variable {
        &self.input
    }

    fn output(&self) -> &Variable {
        &self.output
    }

    fn forward(&mut self, storage: &mut Storage, training: bool) -> Result<()> {
        if training {
            ops::dropout::forward_training(
                storage,
                &self.input,
                &self.mask,
                &self.output,
                self.ratio,
                &mut self.rng,
            )
        } else {
            ops::dropout::forward_inference(storage, &self.input, &self.output)
        }
    }

    fn backward(&mut self, storage: &mut Storage) -> Result<()> {
        ops::dropout::backward(storage, &self.input, &self.mask, &self.output)
    }

    fn update_dimensions(&mut self, input: &Variable) -> Result<()> {
        self.input = input.clone();
        self.mask.set_shape(input.shape().clone());
        self.output.set_shape(input.shape().clone());
        Ok(())
    }

    /// Dropout only acts during training, so copies leave it out.
    fn copy(
        &self,
        _input: &Variable,
        _src: &Storage,
        _dst: &mut Storage,
    ) -> Result<Option<Box<dyn Layer>>> {
        Ok(None)
    }
}
