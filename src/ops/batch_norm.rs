//! Batch normalization over axis 1.
//!
//! An input `[N, C, rest...]` is treated as `C` channels of
//! `M = N · prod(rest)` values each (rank-2 inputs have one value per
//! sample and channel). Element `(n, c, s)` lives at `(n·C + c)·S + s`.

use super::{expect_shape, write_gradient, write_value};
use crate::{Error, Result, Shape, Storage, Variable};

/// Variables touched by one batch-norm layer.
#[derive(Debug, Clone)]
pub struct NormVariables<'a> {
    pub input: &'a Variable,
    pub scale: &'a Variable,
    pub bias: &'a Variable,
    pub running_mean: &'a Variable,
    pub running_var: &'a Variable,
    pub batch_mean: &'a Variable,
    pub batch_inv_std: &'a Variable,
    pub output: &'a Variable,
}

#[derive(Debug, Clone, Copy)]
struct Layout {
    batch: usize,
    channels: usize,
    spatial: usize,
}

impl Layout {
    fn of(input: &Variable) -> Result<Self> {
        let dims = input.dims();
        if dims.len() < 2 {
            return Err(Error::InvalidShape(format!(
                "batch norm needs a [batch, channels, ...] input, got {}",
                input.shape()
            )));
        }
        Ok(Self {
            batch: dims[0],
            channels: dims[1],
            spatial: dims[2..].iter().product(),
        })
    }

    /// Layout of `vars.input`, after checking every other variable against it.
    fn checked(vars: &NormVariables<'_>) -> Result<Self> {
        let layout = Self::of(vars.input)?;
        let channel = Shape::new(&[layout.channels])?;
        for v in [
            vars.scale,
            vars.bias,
            vars.running_mean,
            vars.running_var,
            vars.batch_mean,
            vars.batch_inv_std,
        ] {
            expect_shape(v, &channel)?;
        }
        expect_shape(vars.output, vars.input.shape())?;
        Ok(layout)
    }

    #[inline]
    fn per_channel(&self) -> usize {
        self.batch * self.spatial
    }

    /// Visit every element of channel `c` as a contiguous run of `spatial`.
    #[inline]
    fn runs(&self, c: usize) -> impl Iterator<Item = std::ops::Range<usize>> + '_ {
        (0..self.batch).map(move |n| {
            let start = (n * self.channels + c) * self.spatial;
            start..start + self.spatial
        })
    }
}

/// Normalize with batch statistics and fold them into the running averages:
/// `running = momentum · running + (1 − momentum) · batch`.
pub fn forward_training(
    storage: &mut Storage,
    vars: &NormVariables<'_>,
    momentum: f32,
    eps: f32,
) -> Result<()> {
    let layout = Layout::checked(vars)?;

    // batch_inv_std holds the variance until the running averages are updated.
    let mut mean = storage.take_value(vars.batch_mean);
    let mut inv_std = storage.take_value(vars.batch_inv_std);
    let stats = batch_statistics(
        storage,
        vars.input,
        layout,
        mean.data_mut(),
        inv_std.data_mut(),
    );
    if let Err(e) = stats {
        storage.restore_value(vars.batch_mean, mean);
        storage.restore_value(vars.batch_inv_std, inv_std);
        return Err(e);
    }

    {
        let rm = storage.value_mut(vars.running_mean).data_mut();
        for (r, &mu) in rm.iter_mut().zip(mean.data()) {
            *r = momentum * *r + (1.0 - momentum) * mu;
        }
    }
    {
        let rv = storage.value_mut(vars.running_var).data_mut();
        for (r, &var) in rv.iter_mut().zip(inv_std.data()) {
            *r = momentum * *r + (1.0 - momentum) * var;
        }
    }
    inv_std.map_inplace(|var| 1.0 / (var + eps).sqrt());
    storage.restore_value(vars.batch_mean, mean);
    storage.restore_value(vars.batch_inv_std, inv_std);

    normalize(storage, vars, layout, vars.batch_mean, vars.batch_inv_std, None)
}

/// Per-channel mean and biased variance.
fn batch_statistics(
    storage: &Storage,
    input: &Variable,
    layout: Layout,
    mean: &mut [f32],
    variance: &mut [f32],
) -> Result<()> {
    let x = storage.value(input)?.data();
    let m = layout.per_channel() as f32;
    for c in 0..layout.channels {
        let sum: f32 = layout.runs(c).map(|r| x[r].iter().sum::<f32>()).sum();
        let mu = sum / m;
        let sq: f32 = layout
            .runs(c)
            .map(|r| x[r].iter().map(|v| (v - mu) * (v - mu)).sum::<f32>())
            .sum();
        mean[c] = mu;
        variance[c] = sq / m;
    }
    Ok(())
}

/// Normalize with the running statistics.
pub fn forward_inference(storage: &mut Storage, vars: &NormVariables<'_>, eps: f32) -> Result<()> {
    let layout = Layout::checked(vars)?;
    normalize(
        storage,
        vars,
        layout,
        vars.running_mean,
        vars.running_var,
        Some(eps),
    )
}

/// `y = γ · (x − mean) · inv_std + β`. When `eps` is given, `spread` holds
/// variances and is converted on the fly.
fn normalize(
    storage: &mut Storage,
    vars: &NormVariables<'_>,
    layout: Layout,
    mean: &Variable,
    spread: &Variable,
    eps: Option<f32>,
) -> Result<()> {
    write_value(storage, vars.output, |s, out| {
        let x = s.value(vars.input)?.data();
        let gamma = s.value(vars.scale)?.data();
        let beta = s.value(vars.bias)?.data();
        let mean = s.value(mean)?.data();
        let spread = s.value(spread)?.data();
        let y = out.data_mut();
        for c in 0..layout.channels {
            let inv = match eps {
                Some(eps) => 1.0 / (spread[c] + eps).sqrt(),
                None => spread[c],
            };
            let (g, b, mu) = (gamma[c], beta[c], mean[c]);
            for r in layout.runs(c) {
                for (o, &v) in y[r.clone()].iter_mut().zip(&x[r]) {
                    *o = g * (v - mu) * inv + b;
                }
            }
        }
        Ok(())
    })
}

/// Gradients for a training-mode forward:
/// `dγ = Σ dy·x̂`, `dβ = Σ dy`, `dx = γ·inv_std/M · (M·dy − dβ − x̂·dγ)`.
pub fn backward(storage: &mut Storage, vars: &NormVariables<'_>) -> Result<()> {
    let layout = Layout::checked(vars)?;
    let m = layout.per_channel() as f32;

    let mut d_gamma = storage.take_gradient(vars.scale);
    let mut d_beta = storage.take_gradient(vars.bias);
    let result = write_gradient(storage, vars.input, |s, dx| {
        let x = s.value(vars.input)?.data();
        let dy = s.gradient(vars.output)?.data();
        let gamma = s.value(vars.scale)?.data();
        let mean = s.value(vars.batch_mean)?.data();
        let inv_std = s.value(vars.batch_inv_std)?.data();
        let (dg, db, dx) = (d_gamma.data_mut(), d_beta.data_mut(), dx.data_mut());

        for c in 0..layout.channels {
            let (mu, inv) = (mean[c], inv_std[c]);
            let mut sum_dy = 0.0;
            let mut sum_dy_xhat = 0.0;
            for r in layout.runs(c) {
                for (&v, &g) in x[r.clone()].iter().zip(&dy[r]) {
                    sum_dy += g;
                    sum_dy_xhat += g * (v - mu) * inv;
                }
            }
            dg[c] = sum_dy_xhat;
            db[c] = sum_dy;

            let k = gamma[c] * inv / m;
            for r in layout.runs(c) {
                for ((d, &v), &g) in dx[r.clone()].iter_mut().zip(&x[r.clone()]).zip(&dy[r]) {
                    let xhat = (v - mu) * inv;
                    *d = k * (m * g - sum_dy - xhat * sum_dy_xhat);
                }
            }
        }
        Ok(())
    });
    storage.restore_gradient(vars.scale, d_gamma);
    storage.restore_gradient(vars.bias, d_beta);
    result
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::Shape;
    use crate::ops::gradcheck;

    const EPS: f32 = 1e-6;

    struct Fixture {
        storage: Storage,
        v: [Variable; 8],
    }

    fn fixture(input: &[usize]) -> Fixture {
        let c = input[1];
        let ch = || Shape::new(&[c]).unwrap();
        let v = [
            Variable::new(Shape::new(input).unwrap()),
            Variable::trainable(ch()),
            Variable::trainable(ch()),
            Variable::preservable(ch()),
            Variable::preservable(ch()),
            Variable::new(ch()),
            Variable::new(ch()),
            Variable::new(Shape::new(input).unwrap()),
        ];
        let mut storage = Storage::new();
        let mut rng = StdRng::seed_from_u64(13);
        storage.assign_value_with(&v[0], || rng.gen_range(-2.0..2.0));
        storage.assign_value_with(&v[1], || rng.gen_range(0.5..1.5));
        storage.assign_value_with(&v[2], || rng.gen_range(-0.5..0.5));
        storage.value_mut(&v[3]).fill(0.0);
        storage.value_mut(&v[4]).fill(1.0);
        Fixture { storage, v }
    }

    fn norm_vars(v: &[Variable; 8]) -> NormVariables<'_> {
        NormVariables {
            input: &v[0],
            scale: &v[1],
            bias: &v[2],
            running_mean: &v[3],
            running_var: &v[4],
            batch_mean: &v[5],
            batch_inv_std: &v[6],
            output: &v[7],
        }
    }

    #[test]
    fn training_output_is_standardized_per_channel() {
        let mut f = fixture(&[4, 2, 3]);
        let v = f.v.clone();
        f.storage.value_mut(&v[1]).fill(1.0);
        f.storage.value_mut(&v[2]).fill(0.0);
        forward_training(&mut f.storage, &norm_vars(&v), 0.9, EPS).unwrap();

        let y = f.storage.value(&v[7]).unwrap().data();
        let layout = Layout::of(&v[0]).unwrap();
        for c in 0..2 {
            let vals: Vec<f32> = layout.runs(c).flat_map(|r| y[r].to_vec()).collect();
            let mean = vals.iter().sum::<f32>() / vals.len() as f32;
            let var = vals.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / vals.len() as f32;
            assert!(mean.abs() < 1e-5);
            assert!((var - 1.0).abs() < 1e-3);
        }
    }

    #[test]
    fn running_statistics_follow_momentum() {
        let mut f = fixture(&[2, 1]);
        let v = f.v.clone();
        f.storage.assign_value(&v[0], &[1.0, 3.0]).unwrap();
        forward_training(&mut f.storage, &norm_vars(&v), 0.75, EPS).unwrap();
        // batch mean 2, biased variance 1
        assert!((f.storage.value(&v[3]).unwrap().data()[0] - 0.5).abs() < 1e-6);
        assert!((f.storage.value(&v[4]).unwrap().data()[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn inference_uses_running_statistics() {
        let mut f = fixture(&[2, 1]);
        let v = f.v.clone();
        f.storage.assign_value(&v[0], &[5.0, 7.0]).unwrap();
        f.storage.assign_value(&v[1], &[2.0]).unwrap();
        f.storage.assign_value(&v[2], &[1.0]).unwrap();
        f.storage.assign_value(&v[3], &[5.0]).unwrap();
        f.storage.assign_value(&v[4], &[4.0]).unwrap();
        forward_inference(&mut f.storage, &norm_vars(&v), 0.0).unwrap();
        assert_eq!(f.storage.value(&v[7]).unwrap().data(), &[1.0, 3.0]);
    }

    #[test]
    fn gradients_match_finite_differences() {
        let inputs: [&[usize]; 2] = [&[3, 2, 2, 2], &[5, 3]];
        for input in inputs {
            let mut f = fixture(input);
            let v = f.v.clone();
            forward_training(&mut f.storage, &norm_vars(&v), 0.9, EPS).unwrap();
            gradcheck::seed_output_gradient(&mut f.storage, &v[7], 2);
            backward(&mut f.storage, &norm_vars(&v)).unwrap();

            for wrt in &v[..3] {
                gradcheck::check(&mut f.storage, wrt, &v[7], 1e-2, 2e-2, |s| {
                    forward_training(s, &norm_vars(&v), 0.9, EPS).unwrap()
                });
            }
        }
    }

    #[test]
    fn rank_one_input_is_rejected() {
        let x = Variable::new(Shape::new(&[4]).unwrap());
        assert!(Layout::of(&x).is_err());
    }

    #[test]
    fn channel_vectors_of_the_wrong_length_are_errors() {
        let mut f = fixture(&[3, 2, 2]);
        let mut v = f.v.clone();
        v[1] = Variable::trainable(Shape::new(&[3]).unwrap());
        f.storage.value_mut(&v[1]).fill(1.0);
        for result in [
            forward_training(&mut f.storage, &norm_vars(&v), 0.9, EPS),
            forward_inference(&mut f.storage, &norm_vars(&v), EPS),
            backward(&mut f.storage, &norm_vars(&v)),
        ] {
            assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
        }

        let mut v = f.v.clone();
        v[7] = Variable::new(Shape::new(&[3, 4]).unwrap());
        assert!(matches!(
            forward_inference(&mut f.storage, &norm_vars(&v), EPS),
            Err(Error::ShapeMismatch { .. })
        ));
    }
}
