//! Fully connected operator.
//!
//! Input `[N, fan_in...]` is read as an `N x fan_in` matrix (trailing axes
//! flattened), weights are `[fan_in, units]`, bias is `[units]`.

use super::{expect_shape, write_gradient, write_value};
use crate::matmul::{gemm_nn, gemm_nt, gemm_tn};
use crate::{Error, Result, Shape, Storage, Variable};

#[derive(Debug, Clone, Copy)]
struct Dims {
    batch: usize,
    fan_in: usize,
    units: usize,
}

fn dims(input: &Variable, weights: &Variable, bias: &Variable, output: &Variable) -> Result<Dims> {
    let batch = input.shape().batch_size();
    let fan_in = input.shape().sample_len();
    let w = weights.dims();
    if w.len() != 2 || w[0] != fan_in {
        return Err(Error::InvalidShape(format!(
            "dense weights {} do not accept {fan_in} input features",
            weights.shape()
        )));
    }
    let units = w[1];
    expect_shape(bias, &Shape::new(&[units])?)?;
    expect_shape(output, &Shape::new(&[batch, units])?)?;
    Ok(Dims {
        batch,
        fan_in,
        units,
    })
}

/// `output = input × weights + bias`.
pub fn forward(
    storage: &mut Storage,
    input: &Variable,
    weights: &Variable,
    bias: &Variable,
    output: &Variable,
) -> Result<()> {
    let d = dims(input, weights, bias, output)?;
    write_value(storage, output, |s, out| {
        let x = s.value(input)?.data();
        let w = s.value(weights)?.data();
        let b = s.value(bias)?.data();
        let y = out.data_mut();
        for row in y.chunks_exact_mut(d.units) {
            row.copy_from_slice(b);
        }
        gemm_nn(d.batch, d.units, d.fan_in, x, w, 1.0, y);
        Ok(())
    })
}

/// Weight, bias and input gradients from the output gradient.
pub fn backward(
    storage: &mut Storage,
    input: &Variable,
    weights: &Variable,
    bias: &Variable,
    output: &Variable,
) -> Result<()> {
    let d = dims(input, weights, bias, output)?;

    write_gradient(storage, weights, |s, dw| {
        let x = s.value(input)?.data();
        let dy = s.gradient(output)?.data();
        gemm_tn(d.fan_in, d.units, d.batch, x, dy, 0.0, dw.data_mut());
        Ok(())
    })?;

    write_gradient(storage, bias, |s, db| {
        let dy = s.gradient(output)?.data();
        let db = db.data_mut();
        db.fill(0.0);
        for row in dy.chunks_exact(d.units) {
            for (acc, g) in db.iter_mut().zip(row) {
                *acc += g;
            }
        }
        Ok(())
    })?;

    write_gradient(storage, input, |s, dx| {
        let w = s.value(weights)?.data();
        let dy = s.gradient(output)?.data();
        gemm_nt(d.batch, d.fan_in, d.units, dy, w, 0.0, dx.data_mut());
        Ok(())
    })
}
