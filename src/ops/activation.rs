use super::{expect_shape, write_gradient, write_value};
use crate::{Activation, Result, Storage, Variable};

pub fn forward(
    storage: &mut Storage,
    activation: Activation,
    input: &Variable,
    output: &Variable,
) -> Result<()> {
    expect_shape(output, input.shape())?;
    write_value(storage, output, |s, y| {
        activation.forward_slice(s.value(input)?.data(), y.data_mut());
        Ok(())
    })
}

/// Uses the cached output, so `forward` must have run on the same batch.
pub fn backward(
    storage: &mut Storage,
    activation: Activation,
    input: &Variable,
    output: &Variable,
) -> Result<()> {
    expect_shape(output, input.shape())?;
    write_gradient(storage, input, |s, dx| {
        activation.backward_slice(
            s.value(output)?.data(),
            s.gradient(output)?.data(),
            dx.data_mut(),
        );
        Ok(())
    })
}
